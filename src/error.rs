/*!
 * # Error Handling Module
 *
 * Crate-wide error type and the `Result` alias used throughout the proxy
 * engine, plus a `warp::reject::Reject` wrapper for surfacing errors from
 * the management API.
 */

use std::error::Error as StdError;
use std::fmt;
use std::io;
use warp::reject::Reject;

/// Crate-wide error type.
///
/// Each HTTP-facing variant carries enough information for the caller to
/// pick the right client status code (see `Error::status_code`).
#[derive(Debug)]
pub enum Error {
    /// IO errors from the standard library / tokio.
    Io(io::Error),
    /// HTTP parsing errors from the httparse crate.
    HttpParse(httparse::Error),
    /// URL parsing errors from the url crate.
    UrlParse(url::ParseError),
    /// JSON serialization/deserialization errors from serde_json.
    Json(serde_json::Error),
    /// The client's first request line could not be parsed.
    BadRequest(String),
    /// The header block exceeded the configured maximum size.
    HeaderTooLarge,
    /// Proxy authentication is required but was not supplied or was rejected.
    AuthRequired,
    /// The decision hook returned an error.
    HookFailed(String),
    /// A target or upstream could not be reached.
    UpstreamUnavailable(String),
    /// An upstream CONNECT handshake returned a non-2xx status.
    UpstreamBadStatus(u16),
    /// A custom response was supplied for a CONNECT request.
    CustomResponseForConnect,
    /// Reading the initial request headers, connecting upstream, or the
    /// upstream CONNECT response took longer than the configured timeout.
    Timeout(&'static str),
    /// Catch-all for messages that don't need their own variant.
    Custom(String),
}

impl Error {
    /// The status code this error should be reported to the client as,
    /// when a status line has not already been committed.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::HeaderTooLarge => 431,
            Error::AuthRequired => 407,
            Error::HookFailed(_) => 500,
            Error::UpstreamUnavailable(_) => 502,
            Error::UpstreamBadStatus(_) => 502,
            Error::CustomResponseForConnect => 400,
            Error::Timeout("headers") => 408,
            Error::Timeout(_) => 504,
            Error::Io(_) | Error::HttpParse(_) | Error::UrlParse(_) | Error::Json(_) | Error::Custom(_) => 500,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::HttpParse(err) => write!(f, "HTTP parse error: {}", err),
            Error::UrlParse(err) => write!(f, "URL parse error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::BadRequest(msg) => write!(f, "bad request: {}", msg),
            Error::HeaderTooLarge => write!(f, "request header block too large"),
            Error::AuthRequired => write!(f, "proxy authentication required"),
            Error::HookFailed(msg) => write!(f, "decision hook failed: {}", msg),
            Error::UpstreamUnavailable(msg) => write!(f, "upstream unavailable: {}", msg),
            Error::UpstreamBadStatus(code) => write!(f, "upstream returned status {}", code),
            Error::CustomResponseForConnect => {
                write!(f, "custom response cannot be used for CONNECT requests")
            }
            Error::Timeout(what) => write!(f, "timed out waiting for {}", what),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::HttpParse(err) => Some(err),
            Error::UrlParse(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Self {
        Error::HttpParse(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::UrlParse(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Custom(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Custom(msg)
    }
}

/// Wraps `Error` so it can be returned from a warp filter chain.
#[derive(Debug)]
pub struct CustomRejection(pub Error);

impl Reject for CustomRejection {}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
