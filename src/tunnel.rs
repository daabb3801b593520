/*!
 * # CONNECT-Tunnel Handler Module
 *
 * Establishes a TCP tunnel to a target, either directly or by chaining
 * through an upstream proxy's own CONNECT method (with Basic auth), then
 * pumps bytes opaquely in both directions until either side closes. The
 * direct-connect and chained-through-upstream paths are explicit siblings;
 * the duplex pump is factored out so `helpers::create_tunnel` can reuse it
 * for its own client-role handshake.
 */

use crate::error::{Error, Result};
use crate::url::ProxyUrl;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

/// Bytes copied in each direction once a tunnel is established.
#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Timeouts governing tunnel setup. There is deliberately no byte-idle
/// timeout for an established tunnel.
#[derive(Debug, Clone, Copy)]
pub struct ConnectTimeouts {
    pub connect: Duration,
    pub upstream_response: Duration,
}

impl Default for ConnectTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            upstream_response: Duration::from_secs(10),
        }
    }
}

/// Dial `host:port` directly, honoring `timeouts.connect`.
pub async fn connect_direct(host: &str, port: u16, timeouts: &ConnectTimeouts) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);
    match timeout(timeouts.connect, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::UpstreamUnavailable(format!("{}: {}", addr, e))),
        Err(_) => Err(Error::Timeout("connect")),
    }
}

/// Perform a client-role CONNECT handshake against `upstream` for
/// `target_host:target_port`, returning the established tunnel stream.
/// Used both by the server's chaining branch and by `helpers::create_tunnel`.
pub async fn connect_via_upstream(
    upstream: &ProxyUrl,
    target_host: &str,
    target_port: u16,
    timeouts: &ConnectTimeouts,
) -> Result<TcpStream> {
    let mut stream = connect_direct(&upstream.host, upstream.port, timeouts).await?;

    let authority = format!("{}:{}", target_host, target_port);
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(auth) = upstream.basic_auth_value() {
        request.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;

    let status_line = match timeout(timeouts.upstream_response, read_status_line(&mut stream)).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::Timeout("upstream CONNECT response")),
    };

    let code = parse_status_code(&status_line)?;
    if !(200..300).contains(&code) {
        return Err(Error::UpstreamBadStatus(code));
    }
    Ok(stream)
}

async fn read_status_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String> {
    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::UpstreamUnavailable(
                "upstream closed connection before sending a status line".to_string(),
            ));
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n") {
            break;
        }
        if buf.len() > 4096 {
            return Err(Error::UpstreamUnavailable(
                "upstream status line too large".to_string(),
            ));
        }
    }
    // Drain the remaining header block so the stream is positioned at the
    // start of tunneled bytes before the pump takes over.
    drain_headers(stream).await?;
    Ok(String::from_utf8_lossy(&buf).trim_end().to_string())
}

async fn drain_headers<S: AsyncRead + Unpin>(stream: &mut S) -> Result<()> {
    let mut seen = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Ok(());
        }
        seen.push(byte[0]);
        if seen.ends_with(b"\r\n\r\n") || seen == b"\r\n" {
            return Ok(());
        }
        if seen.len() > 64 * 1024 {
            return Err(Error::UpstreamUnavailable(
                "upstream response headers too large".to_string(),
            ));
        }
    }
}

fn parse_status_code(status_line: &str) -> Result<u16> {
    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::UpstreamUnavailable(format!("malformed status line: {}", status_line)))
}

/// Opaque duplex pump: copy bytes client<->upstream concurrently until
/// either side signals end-of-stream or error. Relies on
/// `tokio::io::copy_bidirectional`, which already half-closes the
/// corresponding peer direction on EOF and only fully returns once both
/// halves have drained, preserving per-direction byte order without extra
/// bookkeeping.
pub async fn pump<C, U>(client: &mut C, upstream: &mut U) -> TunnelStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(client, upstream).await {
        Ok((from_client, from_upstream)) => {
            debug!(
                "tunnel closed: client->upstream {} bytes, upstream->client {} bytes",
                from_client, from_upstream
            );
            TunnelStats {
                client_to_upstream: from_client,
                upstream_to_client: from_upstream,
            }
        }
        Err(e) => {
            warn!("tunnel pump ended with error: {}", e);
            TunnelStats::default()
        }
    }
}

/// Server-side CONNECT handler: establish the tunnel (direct or via an
/// upstream), write the `200`/`502` response to the client, then pump.
/// Returns the byte counters for the caller's connection-closed stats.
pub async fn handle_connect<C>(
    client: &mut C,
    target_host: &str,
    target_port: u16,
    upstream: Option<&ProxyUrl>,
    timeouts: &ConnectTimeouts,
) -> Result<TunnelStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let connect_result = match upstream {
        Some(upstream) => connect_via_upstream(upstream, target_host, target_port, timeouts).await,
        None => connect_direct(target_host, target_port, timeouts).await,
    };

    let mut upstream_stream = match connect_result {
        Ok(stream) => stream,
        Err(e) => {
            let (status, phrase, reason) = match &e {
                Error::UpstreamBadStatus(code) => (502, "Bad Gateway", format!("upstream returned {}", code)),
                Error::Timeout(_) => (504, "Gateway Timeout", "gateway timeout".to_string()),
                other => (502, "Bad Gateway", other.to_string()),
            };
            let body = format!("{}\n", reason);
            let response = format!(
                "HTTP/1.1 {status} {phrase}\r\nConnection: close\r\nContent-Length: {len}\r\n\r\n{body}",
                status = status,
                phrase = phrase,
                len = body.len(),
                body = body
            );
            client.write_all(response.as_bytes()).await?;
            return Err(e);
        }
    };

    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;

    Ok(pump(client, &mut upstream_stream).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_code() {
        assert_eq!(parse_status_code("HTTP/1.1 200 Connection Established").unwrap(), 200);
        assert_eq!(parse_status_code("HTTP/1.1 403 Forbidden").unwrap(), 403);
    }

    #[test]
    fn rejects_malformed_status_line() {
        assert!(parse_status_code("garbage").is_err());
    }
}
