/*!
 * # Forward-HTTP Handler Module
 *
 * Rewrites and relays a single HTTP request/response pair, with or without
 * upstream chaining. Handles both the direct-to-origin branch and the
 * chained-through-upstream branch, a full hop-by-hop header rewrite (the
 * complete RFC 7230 §6.1 set, not just `Proxy-Connection`), and explicit
 * `Content-Length`/chunked body framing rather than relying on
 * `copy_bidirectional` to paper over request/response boundaries.
 */

use crate::decoder::IncomingRequest;
use crate::error::{Error, Result};
use crate::headers::{strip_hop_by_hop, HeaderMap};
use crate::hook::Decision;
use crate::tunnel::{pump, TunnelStats};
use crate::url::ProxyUrl;
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

/// Timeout governing the TCP connect to the target or upstream.
#[derive(Debug, Clone, Copy)]
pub struct ForwardTimeouts {
    pub connect: Duration,
}

impl Default for ForwardTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardOutcome {
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub switched_protocols: bool,
}

/// A decoded HTTP/1.1 response head (status line + headers), with any body
/// bytes that were read past the header block while scanning for it.
struct ResponseHead {
    status: u16,
    reason: String,
    headers: HeaderMap,
    body_prefix: Vec<u8>,
}

/// Combines leftover prefix bytes (already read while decoding the request
/// head) with further reads from the underlying stream, so chunked/
/// content-length body parsing doesn't care which bytes came from where.
struct BodySource<'s, S> {
    prefix: Vec<u8>,
    pos: usize,
    stream: &'s mut S,
}

impl<'s, S: AsyncRead + Unpin> BodySource<'s, S> {
    fn new(prefix: Vec<u8>, stream: &'s mut S) -> Self {
        Self { prefix, pos: 0, stream }
    }

    async fn read_byte(&mut self) -> Result<u8> {
        if self.pos < self.prefix.len() {
            let b = self.prefix[self.pos];
            self.pos += 1;
            return Ok(b);
        }
        let mut byte = [0u8; 1];
        self.stream.read_exact(&mut byte).await?;
        Ok(byte[0])
    }

    async fn read_exact_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        let available = self.prefix.len().saturating_sub(self.pos);
        let take = available.min(n);
        out.extend_from_slice(&self.prefix[self.pos..self.pos + take]);
        self.pos += take;
        if out.len() < n {
            let mut rest = vec![0u8; n - out.len()];
            self.stream.read_exact(&mut rest).await?;
            out.extend_from_slice(&rest);
        }
        Ok(out)
    }

    /// Read bytes up to and including the next `\r\n`.
    async fn read_line_raw(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let b = self.read_byte().await?;
            out.push(b);
            if out.ends_with(b"\r\n") {
                return Ok(out);
            }
            if out.len() > 8192 {
                return Err(Error::BadRequest("chunk line too long".to_string()));
            }
        }
    }

    /// Drain any leftover prefix, then read from the stream until EOF. Used
    /// for close-delimited bodies, where the origin signals the end of the
    /// body by closing the connection rather than framing it.
    async fn read_to_eof(&mut self) -> Result<Vec<u8>> {
        let mut out = self.prefix[self.pos..].to_vec();
        self.pos = self.prefix.len();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers.get("content-length").and_then(|v| v.trim().parse().ok())
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get("transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
}

/// A response to a `HEAD` request, or a `1xx`/`204`/`304` status, always has
/// an empty body regardless of framing headers (RFC 7230 §3.3.3). Without
/// this check a close-delimited fallback read would block waiting for EOF
/// on a connection the origin has no intention of closing.
fn response_always_has_no_body(request_method: &str, status: u16) -> bool {
    request_method.eq_ignore_ascii_case("HEAD") || status < 200 || status == 204 || status == 304
}

/// Read a full body from `source` honoring `Content-Length` or
/// `Transfer-Encoding: chunked`, returned as the exact bytes that must be
/// forwarded (chunked bodies are returned encoded, not decoded, since the
/// `Transfer-Encoding` header itself is forwarded unchanged).
///
/// When neither framing header is present and `close_delimited_fallback` is
/// set, the body is read to EOF instead of assumed empty — the framing an
/// HTTP/1.0 or `Connection: close` origin uses for a response body. Request
/// bodies never take this fallback: without a framing header there simply
/// is no request body to read, and reading to EOF would block forever on a
/// connection the client intends to keep sending requests on.
async fn read_body_raw<S: AsyncRead + Unpin>(
    source: &mut BodySource<'_, S>,
    headers: &HeaderMap,
    close_delimited_fallback: bool,
) -> Result<Vec<u8>> {
    if let Some(len) = content_length(headers) {
        return source.read_exact_bytes(len).await;
    }
    if is_chunked(headers) {
        let mut out = Vec::new();
        loop {
            let line = source.read_line_raw().await?;
            out.extend_from_slice(&line);
            let size_str = std::str::from_utf8(&line)
                .ok()
                .map(|s| s.trim_end().split(';').next().unwrap_or("").trim())
                .unwrap_or("");
            let size = usize::from_str_radix(size_str, 16)
                .map_err(|_| Error::BadRequest(format!("invalid chunk size: {}", size_str)))?;
            if size == 0 {
                // Trailer headers, terminated by a blank line.
                loop {
                    let trailer = source.read_line_raw().await?;
                    out.extend_from_slice(&trailer);
                    if trailer == b"\r\n" {
                        break;
                    }
                }
                break;
            }
            let chunk = source.read_exact_bytes(size + 2).await?;
            out.extend_from_slice(&chunk);
        }
        return Ok(out);
    }
    if close_delimited_fallback {
        return source.read_to_eof().await;
    }
    Ok(Vec::new())
}

async fn connect_with_timeout(host: &str, port: u16, timeouts: &ForwardTimeouts) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);
    match timeout(timeouts.connect, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::UpstreamUnavailable(format!("{}: {}", addr, e))),
        Err(_) => Err(Error::Timeout("connect")),
    }
}

async fn write_bad_gateway<C: AsyncWrite + Unpin>(client: &mut C, reason: &str) -> std::io::Result<()> {
    let body = format!("{}\n", reason);
    let response = format!(
        "HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    client.write_all(response.as_bytes()).await
}

/// Forward one HTTP exchange. `client` must already have had its request
/// head decoded by `decoder::decode_request`; `uri` is the parsed
/// absolute-form request-target.
pub async fn handle_forward<C>(
    client: &mut C,
    request: &IncomingRequest,
    uri: &url::Url,
    decision: &Decision,
    timeouts: &ForwardTimeouts,
) -> Result<ForwardOutcome>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let target_host = uri
        .host_str()
        .ok_or_else(|| Error::BadRequest("request-target missing host".to_string()))?
        .to_string();
    let target_port = uri.port_or_known_default().unwrap_or(80);

    let (dial_host, dial_port): (&str, u16) = match &decision.upstream {
        Some(ProxyUrl { host, port, .. }) => (host.as_str(), *port),
        None => (target_host.as_str(), target_port),
    };

    let mut upstream = match connect_with_timeout(dial_host, dial_port, timeouts).await {
        Ok(stream) => stream,
        Err(e) => {
            write_bad_gateway(client, &e.to_string()).await?;
            return Err(e);
        }
    };

    let wants_upgrade = request.headers.contains("upgrade");
    let mut outbound_headers = request.headers.clone();
    strip_hop_by_hop(&mut outbound_headers, wants_upgrade);

    let request_target = match &decision.upstream {
        Some(_) => uri.to_string(),
        None => {
            let mut origin_form = uri.path().to_string();
            if origin_form.is_empty() {
                origin_form.push('/');
            }
            if let Some(query) = uri.query() {
                origin_form.push('?');
                origin_form.push_str(query);
            }
            origin_form
        }
    };

    let mut head = format!("{} {} HTTP/1.1\r\n", request.method, request_target);
    head.push_str(&outbound_headers.to_wire());
    if let Some(upstream_url) = &decision.upstream {
        if let Some(auth) = upstream_url.basic_auth_value() {
            head.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
        }
    }
    head.push_str("\r\n");

    let mut source = BodySource::new(request.body_prefix.clone(), client);
    let body = read_body_raw(&mut source, &request.headers, false).await?;

    upstream.write_all(head.as_bytes()).await?;
    upstream.write_all(&body).await?;
    let request_bytes = (head.len() + body.len()) as u64;

    let response_head = read_response_head(&mut upstream).await?;

    if response_head.status == 101 {
        let mut client_headers = response_head.headers.clone();
        strip_hop_by_hop(&mut client_headers, true);
        let mut line = format!("HTTP/1.1 101 {}\r\n", response_head.reason);
        line.push_str(&client_headers.to_wire());
        line.push_str("\r\n");
        client.write_all(line.as_bytes()).await?;
        client.write_all(&response_head.body_prefix).await?;
        let TunnelStats {
            client_to_upstream,
            upstream_to_client,
        } = pump(client, &mut upstream).await;
        debug!("switched protocols after 101 response");
        return Ok(ForwardOutcome {
            request_bytes: request_bytes + client_to_upstream,
            response_bytes: upstream_to_client,
            switched_protocols: true,
        });
    }

    let mut response_headers = response_head.headers.clone();
    strip_hop_by_hop(&mut response_headers, false);

    let close_delimited_fallback = !response_always_has_no_body(&request.method, response_head.status);
    let mut response_source = BodySource::new(response_head.body_prefix, &mut upstream);
    let response_body = read_body_raw(&mut response_source, &response_head.headers, close_delimited_fallback).await?;

    let mut out = format!("HTTP/1.1 {} {}\r\n", response_head.status, response_head.reason);
    out.push_str(&response_headers.to_wire());
    out.push_str("\r\n");
    client.write_all(out.as_bytes()).await?;
    client.write_all(&response_body).await?;
    let response_bytes = (out.len() + response_body.len()) as u64;

    Ok(ForwardOutcome {
        request_bytes,
        response_bytes,
        switched_protocols: false,
    })
}

async fn read_response_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<ResponseHead> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4) {
            break end;
        }
        if buf.len() > 64 * 1024 {
            return Err(Error::UpstreamUnavailable("upstream response headers too large".to_string()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::UpstreamUnavailable(
                "upstream closed connection before sending a complete response".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Response::new(&mut header_storage);
    parsed
        .parse(&buf[..header_end])
        .map_err(|_| Error::UpstreamUnavailable("malformed upstream response".to_string()))?;

    let status = parsed
        .code
        .ok_or_else(|| Error::UpstreamUnavailable("missing status code".to_string()))?;
    let reason = parsed.reason.unwrap_or("").to_string();

    let mut headers = HeaderMap::new();
    for h in parsed.headers.iter() {
        headers.push(h.name.to_string(), String::from_utf8_lossy(h.value).to_string());
    }

    Ok(ResponseHead {
        status,
        reason,
        headers,
        body_prefix: buf[header_end..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderMap;

    #[tokio::test]
    async fn reads_content_length_body() {
        let raw = b"hello".to_vec();
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let mut headers = HeaderMap::new();
        headers.push("Content-Length", "5");
        let mut source = BodySource::new(raw, &mut cursor);
        let body = read_body_raw(&mut source, &headers, false).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn reads_chunked_body_raw() {
        let raw = b"5\r\nhello\r\n0\r\n\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let mut headers = HeaderMap::new();
        headers.push("Transfer-Encoding", "chunked");
        let mut source = BodySource::new(raw.clone(), &mut cursor);
        let body = read_body_raw(&mut source, &headers, false).await.unwrap();
        assert_eq!(body, raw);
    }

    #[tokio::test]
    async fn no_body_when_no_framing_header_and_fallback_disabled() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let headers = HeaderMap::new();
        let mut source = BodySource::new(Vec::new(), &mut cursor);
        let body = read_body_raw(&mut source, &headers, false).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn reads_to_eof_when_no_framing_header_and_fallback_enabled() {
        let mut cursor = std::io::Cursor::new(b"close-delimited body".to_vec());
        let headers = HeaderMap::new();
        let mut source = BodySource::new(Vec::new(), &mut cursor);
        let body = read_body_raw(&mut source, &headers, true).await.unwrap();
        assert_eq!(body, b"close-delimited body");
    }

    #[tokio::test]
    async fn reads_to_eof_includes_body_prefix_already_buffered() {
        let mut cursor = std::io::Cursor::new(b"-rest".to_vec());
        let headers = HeaderMap::new();
        let mut source = BodySource::new(b"prefix".to_vec(), &mut cursor);
        let body = read_body_raw(&mut source, &headers, true).await.unwrap();
        assert_eq!(body, b"prefix-rest");
    }

    #[test]
    fn head_response_and_no_content_statuses_never_fall_back_to_eof() {
        assert!(response_always_has_no_body("HEAD", 200));
        assert!(response_always_has_no_body("GET", 204));
        assert!(response_always_has_no_body("GET", 304));
        assert!(response_always_has_no_body("GET", 100));
        assert!(!response_always_has_no_body("GET", 200));
    }
}
