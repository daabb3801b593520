/*!
 * # Configuration Module
 *
 * Command-line configuration for the standalone proxy binary. Defaults to
 * port 8000 with verbose logging off, plus the timeout and realm knobs the
 * rest of the engine needs.
 */

use crate::error::Result;
use crate::tunnel::ConnectTimeouts;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Proxy server configuration, populated from command line arguments using
/// the `clap` crate.
///
/// # Example
///
/// ```no_run
/// use proxyhook::config::Config;
///
/// let config = Config::from_args();
/// println!("Binding to: {}", config.bind);
/// ```
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Address to bind the proxy server to, e.g. `127.0.0.1:8000`. Use
    /// port `0` to let the OS assign one.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub bind: String,

    /// Enable verbose (debug-level) logging.
    #[arg(long)]
    pub verbose: bool,

    /// Realm reported in the `Proxy-Authentication: Basic realm="..."`
    /// challenge.
    #[arg(long, default_value = "proxyhook")]
    pub realm: String,

    /// Maximum time to wait for the client's initial request headers,
    /// in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub header_timeout_ms: u64,

    /// Maximum time to wait for a TCP connect to the target or upstream,
    /// in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub connect_timeout_ms: u64,

    /// Maximum time to wait for an upstream's CONNECT response,
    /// in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub upstream_timeout_ms: u64,

    /// Bind address for the management API's health endpoint.
    #[arg(long, default_value = "127.0.0.1:8088")]
    pub api_bind: String,
}

impl Config {
    /// Parse command line arguments into a `Config`.
    pub fn from_args() -> Self {
        Config::parse()
    }

    /// The socket address to bind the raw proxy listener to.
    pub fn get_bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| format!("invalid bind address ({}): {}", self.bind, e).into())
    }

    /// The socket address to bind the management API to.
    pub fn get_api_bind_addr(&self) -> Result<SocketAddr> {
        self.api_bind
            .parse()
            .map_err(|e| format!("invalid API bind address ({}): {}", self.api_bind, e).into())
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_millis(self.header_timeout_ms)
    }

    pub fn connect_timeouts(&self) -> ConnectTimeouts {
        ConnectTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            upstream_response: Duration::from_millis(self.upstream_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            bind: "127.0.0.1:8000".to_string(),
            verbose: false,
            realm: "proxyhook".to_string(),
            header_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            upstream_timeout_ms: 10_000,
            api_bind: "127.0.0.1:8088".to_string(),
        }
    }

    #[test]
    fn default_bind_round_trips() {
        let config = sample();
        let addr = config.get_bind_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8000");
    }

    #[test]
    fn invalid_bind_addr_is_an_error() {
        let mut config = sample();
        config.bind = "invalid:address".to_string();
        assert!(config.get_bind_addr().is_err());
    }

    #[test]
    fn header_timeout_matches_configured_millis() {
        let config = sample();
        assert_eq!(config.header_timeout().as_millis(), 10_000);
    }
}
