/*!
 * # proxyhook
 *
 * A programmable forward HTTP proxy. Clients issue plain HTTP requests or
 * CONNECT tunnels; a per-request decision hook can demand Basic proxy auth,
 * chain the request through an upstream proxy, or substitute a synthetic
 * response, before the engine relays bytes to the origin.
 *
 * ## Modules
 *
 * - `url`: proxy URL parsing and credential redaction
 * - `headers`: ordered, case-insensitive header map and hop-by-hop stripping
 * - `decoder`: client request decoding and CONNECT/forward classification
 * - `hook`: the `DecisionHook` trait and its invocation
 * - `auth`: the `407` challenge writer
 * - `response`: synthetic response emitter
 * - `forward`: single-shot HTTP request/response relay
 * - `tunnel`: CONNECT tunnel establishment and duplex pump
 * - `server`: connection accept loop, registry, and lifecycle
 * - `helpers`: `anonymize_proxy`/`create_tunnel` and their registries
 * - `config`: command-line configuration for the standalone binary
 * - `api`: the ambient management API (`GET /health`)
 * - `error`: crate-wide error type
 */

/// The ambient management API (`GET /health`)
pub mod api;
/// The `407` proxy-authentication challenge writer
pub mod auth;
/// Configuration module for handling command line arguments and settings
pub mod config;
/// Client request decoding and CONNECT/forward classification
pub mod decoder;
/// Error handling module with custom error types
pub mod error;
/// Single-shot HTTP request/response relay
pub mod forward;
/// Ordered, case-insensitive header map and hop-by-hop stripping
pub mod headers;
/// `anonymize_proxy`/`create_tunnel` and their process-wide registries
pub mod helpers;
/// The `DecisionHook` trait and its invocation
pub mod hook;
/// Synthetic response emitter
pub mod response;
/// Connection accept loop, registry, and lifecycle
pub mod server;
/// CONNECT tunnel establishment and duplex pump
pub mod tunnel;
/// Proxy URL parsing and credential redaction
pub mod url;

use std::sync::Arc;
use std::time::Instant;

use log::info;

use crate::config::Config;
use crate::error::Result;
use crate::hook::DecisionHook;
use crate::server::{Server, ServerConfig};

/// Run the standalone proxy binary with the given configuration and an
/// optional decision hook: bind the raw proxy listener and the management
/// API, then wait for `Ctrl+C` before draining connections.
///
/// # Example
///
/// ```no_run
/// use proxyhook::config::Config;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_args();
///     proxyhook::run(config, None).await?;
///     Ok(())
/// }
/// ```
pub async fn run(config: Config, hook: Option<Arc<dyn DecisionHook>>) -> Result<()> {
    info!("starting proxy server on {}", config.bind);

    let server_config = ServerConfig {
        bind: config.get_bind_addr()?,
        realm: config.realm.clone(),
        header_timeout: config.header_timeout(),
        connect_timeouts: config.connect_timeouts(),
    };

    let server = Server::new(server_config, hook);
    let bound = server.listen().await?;
    info!("proxy listening on {}", bound);

    let api_bind = config.get_api_bind_addr()?;
    let started_at = Instant::now();
    let routes = api::create_routes(Arc::clone(&server), started_at);
    info!("management API listening on {}", api_bind);

    let (_, api_server) = warp::serve(routes).bind_with_graceful_shutdown(api_bind, async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
    });

    info!("server started, waiting for connections");
    api_server.await;
    info!("shutdown signal received, draining connections");
    server.close(false).await?;
    info!("server shutdown complete");
    Ok(())
}
