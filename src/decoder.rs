/*!
 * # Request Decoder Module
 *
 * Reads a client connection up to the end of the request headers and
 * classifies it as a CONNECT tunnel or a forward-HTTP request. The
 * accumulate-until-`\r\n\r\n` loop is shared by both request kinds instead
 * of being duplicated per kind.
 */

use crate::error::{Error, Result};
use crate::headers::HeaderMap;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default ceiling on the size of the header block (request line +
/// headers) before the engine gives up with `431`.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

/// The first line + headers of a client request, decoded once and then
/// consumed by whichever handler (forward, tunnel, custom-response) the
/// Decision selects.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: String,
    pub target: String,
    pub version: u8,
    pub headers: HeaderMap,
    /// Any body bytes that were already read past the header block while
    /// scanning for `\r\n\r\n`. Must be replayed before reading more from
    /// the socket.
    pub body_prefix: Vec<u8>,
}

/// How the decoder classified this request.
#[derive(Debug, Clone)]
pub enum RequestKind {
    /// `CONNECT host:port HTTP/1.1`.
    Connect { host: String, port: u16 },
    /// Any other method with an absolute-form request-target.
    Forward { uri: url::Url },
}

impl IncomingRequest {
    pub fn classify(&self) -> Result<RequestKind> {
        if self.method.eq_ignore_ascii_case("CONNECT") {
            let (host, port) = parse_authority(&self.target)?;
            return Ok(RequestKind::Connect { host, port });
        }

        let uri = url::Url::parse(&self.target).map_err(|_| {
            Error::BadRequest(format!(
                "non-CONNECT request-target must be absolute-form: {}",
                self.target
            ))
        })?;
        Ok(RequestKind::Forward { uri })
    }
}

/// `host:port`, port required, as used by a CONNECT request-target.
fn parse_authority(target: &str) -> Result<(String, u16)> {
    let (host, port_str) = target
        .rsplit_once(':')
        .ok_or_else(|| Error::BadRequest(format!("CONNECT target missing port: {}", target)))?;
    let port: u16 = port_str
        .parse()
        .map_err(|_| Error::BadRequest(format!("CONNECT target has invalid port: {}", target)))?;
    if host.is_empty() {
        return Err(Error::BadRequest(format!(
            "CONNECT target missing host: {}",
            target
        )));
    }
    Ok((host.to_string(), port))
}

/// Read from `stream` until the end of the header block (`\r\n\r\n`),
/// parse the first line and headers, and return the decoded request plus
/// whatever body bytes were read past the header boundary.
pub async fn decode_request<S: AsyncRead + Unpin>(
    stream: &mut S,
    max_header_bytes: usize,
) -> Result<IncomingRequest> {
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
        if buf.len() > max_header_bytes {
            return Err(Error::HeaderTooLarge);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::BadRequest(
                "client closed connection before sending complete request headers".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut header_storage);
    let status = parsed.parse(&buf[..header_end])?;
    if status.is_partial() {
        return Err(Error::BadRequest(
            "incomplete request line or headers".to_string(),
        ));
    }

    let method = parsed
        .method
        .ok_or_else(|| Error::BadRequest("missing method".to_string()))?
        .to_string();
    let target = parsed
        .path
        .ok_or_else(|| Error::BadRequest("missing request-target".to_string()))?
        .to_string();
    let version = parsed
        .version
        .ok_or_else(|| Error::BadRequest("missing HTTP version".to_string()))?;

    let mut headers = HeaderMap::new();
    for h in parsed.headers.iter() {
        headers.push(h.name.to_string(), String::from_utf8_lossy(h.value).to_string());
    }

    let body_prefix = buf[header_end..].to_vec();

    Ok(IncomingRequest {
        method,
        target,
        version,
        headers,
        body_prefix,
    })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decodes_simple_get() {
        let raw = b"GET http://example.com/path HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(raw);
        let req = decode_request(&mut cursor, DEFAULT_MAX_HEADER_BYTES)
            .await
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "http://example.com/path");
        assert_eq!(req.headers.get("host"), Some("example.com"));
        assert!(req.body_prefix.is_empty());
    }

    #[tokio::test]
    async fn captures_body_prefix_read_past_headers() {
        let raw = b"POST http://example.com/ HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello".to_vec();
        let mut cursor = std::io::Cursor::new(raw);
        let req = decode_request(&mut cursor, DEFAULT_MAX_HEADER_BYTES)
            .await
            .unwrap();
        assert_eq!(req.body_prefix, b"hello");
    }

    #[tokio::test]
    async fn classifies_connect_target() {
        let raw = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(raw);
        let req = decode_request(&mut cursor, DEFAULT_MAX_HEADER_BYTES)
            .await
            .unwrap();
        match req.classify().unwrap() {
            RequestKind::Connect { host, port } => {
                assert_eq!(host, "example.com");
                assert_eq!(port, 443);
            }
            _ => panic!("expected Connect"),
        }
    }

    #[tokio::test]
    async fn rejects_connect_without_port() {
        let raw = b"CONNECT example.com HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(raw);
        let req = decode_request(&mut cursor, DEFAULT_MAX_HEADER_BYTES)
            .await
            .unwrap();
        assert!(req.classify().is_err());
    }

    #[tokio::test]
    async fn rejects_oversized_headers() {
        let mut raw = b"GET http://example.com/ HTTP/1.1\r\n".to_vec();
        raw.extend(std::iter::repeat(b'a').take(128));
        let mut cursor = std::io::Cursor::new(raw);
        let result = decode_request(&mut cursor, 16).await;
        assert!(matches!(result, Err(Error::HeaderTooLarge)));
    }

    #[tokio::test]
    async fn classifies_non_absolute_form_as_bad_request() {
        let raw = b"GET /path HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(raw);
        let req = decode_request(&mut cursor, DEFAULT_MAX_HEADER_BYTES)
            .await
            .unwrap();
        assert!(req.classify().is_err());
    }
}
