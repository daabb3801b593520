/*!
 * # Authenticator Module
 *
 * Enforces the `407 Proxy Authentication Required` challenge when the
 * decision hook sets `require_auth`. Credential comparison itself happens
 * inside the hook (it sees the decoded username/password); this module only
 * writes the challenge and closes the connection.
 */

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write a `407` challenge naming `realm`. The caller closes the
/// connection immediately afterward — credentials must be resubmitted on a
/// fresh request, there is no retry-on-same-socket path.
pub async fn write_auth_challenge<S: AsyncWrite + Unpin>(stream: &mut S, realm: &str) -> std::io::Result<()> {
    let body = b"Proxy authentication required";
    let response = format!(
        "HTTP/1.1 407 Proxy Authentication Required\r\n\
         Proxy-Authentication: Basic realm=\"{realm}\"\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n",
        realm = realm,
        len = body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}
