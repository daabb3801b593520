/*!
 * # Decision Hook Module
 *
 * The programmable core of the proxy: a per-request callback that decides
 * whether to demand credentials, which upstream (if any) to chain through,
 * and whether to short-circuit with a synthetic response. Modeled as an
 * `async_trait` object (`Arc<dyn DecisionHook>`) so embedders can supply
 * either a plain closure-backed hook or something stateful, and swap it in
 * at runtime the same way an upstream address is configured elsewhere.
 */

use crate::error::{Error, Result};
use crate::headers::HeaderMap;
use crate::url::ProxyUrl;
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;

/// The inputs available to a decision hook for one client request.
#[derive(Debug, Clone)]
pub struct HookInput {
    pub method: String,
    pub target: String,
    pub headers: HeaderMap,
    pub username: String,
    pub password: String,
    pub hostname: String,
    pub port: u16,
    pub is_http: bool,
}

/// A synthetic HTTP response the hook can supply instead of contacting an
/// origin. HTTP-only; rejected for CONNECT by the engine before it reaches
/// the emitter.
#[derive(Debug, Clone)]
pub struct CustomResponseSpec {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub encoding: String,
}

impl Default for CustomResponseSpec {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            body: Vec::new(),
            encoding: "utf-8".to_string(),
        }
    }
}

/// The hook's verdict for one request.
///
/// Invariant: at most one of `upstream`/`custom_response` is set. The
/// engine enforces `custom_response` being rejected for CONNECT requests
/// rather than the `Decision` type itself, so a hook author can still
/// construct one uniformly and let the engine report the mismatch as a
/// `400`.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub require_auth: bool,
    pub upstream: Option<ProxyUrl>,
    pub custom_response: Option<CustomResponseSpec>,
    pub fail_with: Option<u16>,
}

impl Decision {
    pub fn validate(&self, is_http: bool) -> Result<()> {
        if self.upstream.is_some() && self.custom_response.is_some() {
            return Err(Error::Custom(
                "Decision may set at most one of upstream/custom_response".to_string(),
            ));
        }
        if self.custom_response.is_some() && !is_http {
            return Err(Error::CustomResponseForConnect);
        }
        Ok(())
    }
}

/// A programmable decision hook, invoked once per client request.
#[async_trait]
pub trait DecisionHook: Send + Sync {
    async fn decide(&self, input: HookInput) -> Result<Decision>;
}

/// The hook used when the server is configured without one: never demands
/// auth, never chains, never substitutes a response.
pub struct NoopHook;

#[async_trait]
impl DecisionHook for NoopHook {
    async fn decide(&self, _input: HookInput) -> Result<Decision> {
        Ok(Decision::default())
    }
}

/// Wraps a plain closure (sync or returning a future) as a `DecisionHook`,
/// for embedders who don't need a struct.
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> DecisionHook for FnHook<F>
where
    F: Fn(HookInput) -> Decision + Send + Sync,
{
    async fn decide(&self, input: HookInput) -> Result<Decision> {
        Ok((self.0)(input))
    }
}

/// Decode a `Proxy-Authorization: Basic <b64>` header into `(username,
/// password)`. Missing header or a non-Basic scheme both yield empty
/// strings for both fields rather than an error — absence of credentials
/// is a valid, common case the hook is free to reject on its own terms.
pub fn decode_basic_auth(headers: &HeaderMap) -> (String, String) {
    let Some(value) = headers.get("proxy-authorization") else {
        return (String::new(), String::new());
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return (String::new(), String::new());
    };
    let Ok(decoded_bytes) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return (String::new(), String::new());
    };
    let Ok(decoded) = String::from_utf8(decoded_bytes) else {
        return (String::new(), String::new());
    };
    match decoded.split_once(':') {
        Some((user, pass)) => (user.to_string(), pass.to_string()),
        None => (decoded, String::new()),
    }
}

/// Invoke `hook` and map a failure into `Error::HookFailed`. The engine
/// decides which status to actually emit for the failure (500 for HTTP,
/// a 502-framed close for CONNECT); this just normalizes the error shape.
pub async fn invoke_hook(hook: &Arc<dyn DecisionHook>, input: HookInput) -> Result<Decision> {
    let is_http = input.is_http;
    let decision = hook
        .decide(input)
        .await
        .map_err(|e| Error::HookFailed(e.to_string()))?;
    decision.validate(is_http)?;
    Ok(decision)
}
