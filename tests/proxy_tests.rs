use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use proxyhook::hook::{CustomResponseSpec, Decision, DecisionHook, HookInput};
use proxyhook::server::{Server, ServerConfig};
use proxyhook::url::{ProxyUrl, Scheme};

async fn spawn_echo_origin(expected_auth: Option<&'static str>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_string();

            if let Some(expected) = expected_auth {
                assert!(
                    request.contains(expected),
                    "request missing expected Proxy-Authorization: {}",
                    request
                );
            }

            let body = "hello";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    addr
}

#[tokio::test]
async fn get_request_round_trips_through_proxy() {
    let origin_addr = spawn_echo_origin(None).await;
    let server = Server::new(ServerConfig::default(), None);
    let proxy_addr = server.listen().await.unwrap();

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = format!(
        "GET http://{}/ HTTP/1.1\r\nHost: {}\r\n\r\n",
        origin_addr, origin_addr
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("hello"));

    server.close(true).await.unwrap();
}

struct UpstreamChainHook(ProxyUrl);

#[async_trait::async_trait]
impl DecisionHook for UpstreamChainHook {
    async fn decide(&self, _input: HookInput) -> proxyhook::error::Result<Decision> {
        Ok(Decision {
            upstream: Some(self.0.clone()),
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn forward_chains_through_upstream_with_basic_auth_header() {
    // The "upstream" here is just another echo origin that asserts it
    // received the injected Proxy-Authorization header.
    let upstream_addr = spawn_echo_origin(Some("Proxy-Authorization: Basic dTpw")).await;

    let upstream_url = ProxyUrl {
        scheme: Scheme::Http,
        host: upstream_addr.ip().to_string(),
        port: upstream_addr.port(),
        user: Some("u".to_string()),
        pass: Some("p".to_string()),
    };

    let hook: Arc<dyn DecisionHook> = Arc::new(UpstreamChainHook(upstream_url));
    let server = Server::new(ServerConfig::default(), Some(hook));
    let proxy_addr = server.listen().await.unwrap();

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = "GET http://example.invalid/ HTTP/1.1\r\nHost: example.invalid\r\n\r\n";
    client.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 200 OK"));

    server.close(true).await.unwrap();
}

struct AuthRequiredHook;

#[async_trait::async_trait]
impl DecisionHook for AuthRequiredHook {
    async fn decide(&self, _input: HookInput) -> proxyhook::error::Result<Decision> {
        Ok(Decision {
            require_auth: true,
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn hook_demanding_auth_yields_407_challenge() {
    let hook: Arc<dyn DecisionHook> = Arc::new(AuthRequiredHook);
    let server = Server::new(ServerConfig::default(), Some(hook));
    let proxy_addr = server.listen().await.unwrap();

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = "GET http://example.invalid/ HTTP/1.1\r\nHost: example.invalid\r\n\r\n";
    client.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 407 Proxy Authentication Required"));

    server.close(true).await.unwrap();
}

struct TeapotHook;

#[async_trait::async_trait]
impl DecisionHook for TeapotHook {
    async fn decide(&self, _input: HookInput) -> proxyhook::error::Result<Decision> {
        Ok(Decision {
            custom_response: Some(CustomResponseSpec {
                status: 418,
                headers: proxyhook::headers::HeaderMap::new(),
                body: b"I'm a teapot".to_vec(),
                encoding: "utf-8".to_string(),
            }),
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn hook_supplied_custom_response_short_circuits_origin() {
    let hook: Arc<dyn DecisionHook> = Arc::new(TeapotHook);
    let server = Server::new(ServerConfig::default(), Some(hook));
    let proxy_addr = server.listen().await.unwrap();

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = "GET http://example.invalid/ HTTP/1.1\r\nHost: example.invalid\r\n\r\n";
    client.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 418 I'm a teapot"));
    assert!(response.ends_with("I'm a teapot"));

    server.close(true).await.unwrap();
}
