/*!
 * # Management API Module
 *
 * The standalone binary's ambient observability surface: a `GET /health`
 * endpoint reporting process uptime and live connection count, built on
 * `warp`'s filter-based routing and reporting against a single `Server`'s
 * connection registry (there is exactly one proxy listener in this crate).
 */

use crate::server::Server;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use warp::{Filter, Rejection, Reply};

/// Build the management API's routes. `started_at` anchors the reported
/// uptime.
pub fn create_routes(
    server: Arc<Server>,
    started_at: Instant,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let server_filter = warp::any().map(move || (Arc::clone(&server), started_at));

    warp::path("health")
        .and(warp::get())
        .and(server_filter)
        .and_then(handle_health_request)
}

async fn handle_health_request(
    (server, started_at): (Arc<Server>, Instant),
) -> std::result::Result<impl Reply, Infallible> {
    let active_connections = server.connection_count().await;
    Ok(warp::reply::json(&json!({
        "status": "ok",
        "uptime_secs": started_at.elapsed().as_secs(),
        "active_connections": active_connections,
        "bind": server.config().bind.to_string(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerConfig;

    #[tokio::test]
    async fn health_route_reports_zero_connections_when_idle() {
        let server = Server::new(ServerConfig::default(), None);
        let routes = create_routes(Arc::clone(&server), Instant::now());

        let resp = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_connections"], 0);
    }
}
