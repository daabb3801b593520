/*!
 * # Header Map Module
 *
 * A small ordered, case-insensitive multimap for HTTP headers. `httparse`
 * hands back `(name, value)` pairs with original casing preserved; this
 * module keeps that casing for re-serialization while still answering
 * lookups case-insensitively, and centralizes the hop-by-hop header set
 * that the forward and tunnel handlers both need to strip.
 */

use std::collections::HashSet;

/// An ordered multimap of header name/value pairs. Original casing is kept
/// for forwarding; lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value matching `name`, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values matching `name`, case-insensitively, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every header whose name matches `name`, case-insensitively.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Serialize as `Name: value\r\n` lines, in insertion order.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.entries {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out
    }
}

/// The canonical set of hop-by-hop headers (RFC 7230 §6.1) that must never
/// be forwarded between hops as-is. `Upgrade` is special-cased by the
/// forward handler: it is stripped unless the exchange is actually
/// switching protocols (see `forward::handle_forward`).
pub const HOP_BY_HOP: &[&str] = &[
    "proxy-authorization",
    "proxy-connection",
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "upgrade",
];

/// The hop-by-hop set plus any extra token the incoming `Connection` header
/// names for this exchange (RFC 7230 §6.1: a `Connection` header lists
/// additional hop-by-hop headers for that message only).
pub fn hop_by_hop_set(connection_header: Option<&str>) -> HashSet<String> {
    let mut set: HashSet<String> = HOP_BY_HOP.iter().map(|s| s.to_string()).collect();
    if let Some(value) = connection_header {
        for token in value.split(',') {
            let token = token.trim().to_ascii_lowercase();
            if !token.is_empty() {
                set.insert(token);
            }
        }
    }
    set
}

/// Strip every hop-by-hop header from `headers`, honoring any extra tokens
/// named in its own `Connection` header. `keep_upgrade` should be `true`
/// only when relaying a `101 Switching Protocols` exchange.
pub fn strip_hop_by_hop(headers: &mut HeaderMap, keep_upgrade: bool) {
    let connection_value = headers.get("connection").map(|s| s.to_string());
    let mut set = hop_by_hop_set(connection_value.as_deref());
    if keep_upgrade {
        set.remove("upgrade");
        set.remove("connection");
    }
    for name in set {
        headers.remove(&name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut h = HeaderMap::new();
        h.push("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn preserves_original_casing_on_wire() {
        let mut h = HeaderMap::new();
        h.push("X-Custom-Header", "1");
        assert!(h.to_wire().starts_with("X-Custom-Header: 1\r\n"));
    }

    #[test]
    fn strips_canonical_hop_by_hop_set() {
        let mut h = HeaderMap::new();
        h.push("Proxy-Authorization", "Basic xyz");
        h.push("Connection", "close");
        h.push("Host", "example.com");
        strip_hop_by_hop(&mut h, false);
        assert!(!h.contains("proxy-authorization"));
        assert!(!h.contains("connection"));
        assert!(h.contains("host"));
    }

    #[test]
    fn strips_tokens_named_in_connection_header() {
        let mut h = HeaderMap::new();
        h.push("Connection", "close, X-Custom");
        h.push("X-Custom", "value");
        strip_hop_by_hop(&mut h, false);
        assert!(!h.contains("x-custom"));
    }

    #[test]
    fn keep_upgrade_preserves_upgrade_and_connection() {
        let mut h = HeaderMap::new();
        h.push("Upgrade", "websocket");
        h.push("Connection", "Upgrade");
        strip_hop_by_hop(&mut h, true);
        assert!(h.contains("upgrade"));
        assert!(h.contains("connection"));
    }
}
