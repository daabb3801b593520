/*!
 * # Custom Response Emitter Module
 *
 * Serializes a hook-supplied `CustomResponseSpec` directly to the client
 * without contacting any origin. The caller-provided
 * `Content-Length`/`Transfer-Encoding` are always discarded in favor of a
 * freshly computed length — the body is already fully in memory, so there
 * is no reason to trust (or forward) framing hints from the hook.
 */

use crate::hook::CustomResponseSpec;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub(crate) fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        418 => "I'm a teapot",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "OK",
    }
}

/// Write a minimal `status` response with a plain-text body explaining
/// `reason`, then leave the connection ready for the caller to close.
/// Used for the client-protocol and hook-failure error paths that don't
/// have a dedicated emitter: `400`, `431`, `500`, `408`.
pub async fn write_simple_error<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: u16,
    reason: &str,
) -> std::io::Result<()> {
    let body = format!("{}\n", reason);
    let response = format!(
        "HTTP/1.1 {status} {phrase}\r\nConnection: close\r\nContent-Length: {len}\r\n\r\n{body}",
        status = status,
        phrase = reason_phrase(status),
        len = body.len(),
        body = body
    );
    stream.write_all(response.as_bytes()).await
}

/// Write `spec` to `stream` as a complete HTTP/1.1 response, then leave the
/// connection ready for the caller to close — a custom response always
/// closes the connection afterward rather than keeping it open for reuse.
pub async fn write_custom_response<S: AsyncWrite + Unpin>(
    stream: &mut S,
    spec: &CustomResponseSpec,
) -> std::io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        spec.status,
        reason_phrase(spec.status)
    );
    for (name, value) in spec.headers.iter() {
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("transfer-encoding") {
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(&format!("Content-Length: {}\r\n", spec.body.len()));
    head.push_str("Connection: close\r\n\r\n");

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&spec.body).await?;
    stream.flush().await
}
