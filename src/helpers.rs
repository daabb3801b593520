/*!
 * # Helper Primitives Module
 *
 * `anonymize_proxy`/`create_tunnel` and their process-wide registries.
 * There is no owning struct to hang these registries off of — both helpers
 * are free functions callable without first constructing a `Server` — so
 * they live as `once_cell::sync::Lazy<Mutex<HashMap<...>>>` singletons
 * instead.
 */

use crate::error::Result;
use crate::hook::{Decision, DecisionHook, HookInput};
use crate::server::{Server, ServerConfig};
use crate::tunnel::{connect_via_upstream, pump, ConnectTimeouts};
use crate::url::ProxyUrl;
use async_trait::async_trait;
use log::{debug, info};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

fn next_handle_id() -> u64 {
    NEXT_HANDLE_ID.fetch_add(1, Ordering::SeqCst)
}

/// A hook that always chains to a single fixed upstream, used internally by
/// `anonymize_proxy`.
struct FixedUpstreamHook(ProxyUrl);

#[async_trait]
impl DecisionHook for FixedUpstreamHook {
    async fn decide(&self, _input: HookInput) -> Result<Decision> {
        Ok(Decision {
            upstream: Some(self.0.clone()),
            ..Default::default()
        })
    }
}

/// A live anonymizing front: a `Server` bound to an ephemeral local port
/// that forwards every request to a single upstream, stripping whatever
/// `Proxy-Authorization` the caller supplies to it in favor of the
/// upstream's own credentials.
pub struct AnonymizerHandle {
    id: u64,
    server: Arc<Server>,
}

static ANONYMIZER_REGISTRY: Lazy<Mutex<HashMap<u64, Arc<Server>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Front a credential-bearing upstream with a local, credential-less proxy.
/// A `url` that already carries no credentials is returned unchanged and
/// unregistered — calling `close_anonymized_proxy` on it is a harmless
/// no-op, making this operation idempotent for callers that don't track
/// whether a given URL needed anonymizing.
pub async fn anonymize_proxy(url: &ProxyUrl) -> Result<(ProxyUrl, Option<AnonymizerHandle>)> {
    if !url.has_credentials() {
        return Ok((url.clone(), None));
    }

    let config = ServerConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    };
    let hook: Arc<dyn DecisionHook> = Arc::new(FixedUpstreamHook(url.clone()));
    let server = Server::new(config, Some(hook));
    let bound = server.listen().await?;

    let id = next_handle_id();
    ANONYMIZER_REGISTRY.lock().await.insert(id, Arc::clone(&server));
    info!("anonymizer {} listening on {} for upstream {}", id, bound, url.host_port());

    let anonymized = ProxyUrl {
        scheme: url.scheme,
        host: bound.ip().to_string(),
        port: bound.port(),
        user: None,
        pass: None,
    };
    Ok((anonymized, Some(AnonymizerHandle { id, server })))
}

/// Tear down an anonymizer started by `anonymize_proxy`. Removes the entry
/// from the registry before destroying the server, so a concurrent
/// `close_anonymized_proxy` racing on the same id cannot double-close it.
pub async fn close_anonymized_proxy(handle: AnonymizerHandle) -> Result<()> {
    let removed = ANONYMIZER_REGISTRY.lock().await.remove(&handle.id);
    if removed.is_some() {
        debug!("closing anonymizer {}", handle.id);
        handle.server.close(true).await?;
    }
    Ok(())
}

/// A live tunnel front: a local listener that, per accepted connection,
/// performs a client-role CONNECT handshake against `proxy_url` for a fixed
/// `host:port` and then pumps bytes opaquely.
pub struct TunnelHandle {
    id: u64,
    shutdown: Arc<tokio::sync::Notify>,
    accept_task: AbortHandle,
}

static TUNNEL_REGISTRY: Lazy<Mutex<HashMap<u64, Arc<tokio::sync::Notify>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Open a local listener that tunnels every accepted connection through
/// `proxy_url` to `target` (`"host:port"`), via a client-role CONNECT
/// handshake reusing `tunnel::connect_via_upstream`/`tunnel::pump`.
pub async fn create_tunnel(proxy_url: ProxyUrl, target: String) -> Result<(SocketAddr, TunnelHandle)> {
    let (target_host, target_port) = target
        .rsplit_once(':')
        .ok_or_else(|| crate::error::Error::BadRequest(format!("invalid tunnel target: {}", target)))?;
    let target_host = target_host.to_string();
    let target_port: u16 = target_port
        .parse()
        .map_err(|_| crate::error::Error::BadRequest(format!("invalid tunnel target port: {}", target)))?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let id = next_handle_id();
    let shutdown = Arc::new(tokio::sync::Notify::new());
    TUNNEL_REGISTRY.lock().await.insert(id, Arc::clone(&shutdown));

    let timeouts = ConnectTimeouts::default();
    let shutdown_for_loop = Arc::clone(&shutdown);
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_for_loop.notified() => break,
                accepted = listener.accept() => {
                    let (mut client, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            debug!("tunnel {} accept error: {}", id, e);
                            continue;
                        }
                    };
                    let proxy_url = proxy_url.clone();
                    let target_host = target_host.clone();
                    tokio::spawn(async move {
                        debug!("tunnel {} accepted connection from {}", id, peer);
                        match connect_via_upstream(&proxy_url, &target_host, target_port, &timeouts).await {
                            Ok(mut upstream) => {
                                pump(&mut client, &mut upstream).await;
                            }
                            Err(e) => {
                                debug!("tunnel {} failed to establish upstream leg: {}", id, e);
                            }
                        }
                    });
                }
            }
        }
    });

    info!("tunnel {} listening on {} -> {} via {}", id, addr, target, proxy_url.host_port());

    Ok((
        addr,
        TunnelHandle {
            id,
            shutdown,
            accept_task: join.abort_handle(),
        },
    ))
}

/// Tear down a tunnel started by `create_tunnel`. Removes the registry
/// entry before signaling shutdown, matching the remove-then-destroy
/// ordering used by `close_anonymized_proxy` and `Server::close`.
pub async fn close_tunnel(handle: TunnelHandle) -> Result<()> {
    let removed = TUNNEL_REGISTRY.lock().await.remove(&handle.id);
    if removed.is_some() {
        debug!("closing tunnel {}", handle.id);
        handle.shutdown.notify_one();
        handle.accept_task.abort();
    }
    Ok(())
}
