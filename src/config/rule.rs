//! Proxy rules and the ordered prefix table they live in.

use http::Uri;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Forwarding rule attached to a path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProxyRule {
    /// Base URL of the upstream service
    pub target: String,
    /// Rewrite the outbound `Host` header to the target's authority
    #[serde(default)]
    pub change_origin: bool,
    /// Tunnel WebSocket upgrades to the target
    #[serde(default)]
    pub ws: bool,
    /// Append `X-Forwarded-*` headers
    #[serde(default)]
    pub xfwd: bool,
    /// Extra headers set on every forwarded request
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Upstream connect/response timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ProxyRule {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            change_origin: false,
            ws: false,
            xfwd: false,
            headers: BTreeMap::new(),
            timeout_ms: None,
        }
    }

    pub fn change_origin(mut self, enabled: bool) -> Self {
        self.change_origin = enabled;
        self
    }

    pub fn ws(mut self, enabled: bool) -> Self {
        self.ws = enabled;
        self
    }

    /// Parse `target` into its connectable parts.
    pub fn upstream(&self) -> Result<UpstreamTarget, String> {
        UpstreamTarget::parse(&self.target)
    }
}

/// A rule may be written as a bare target URL.
#[derive(Deserialize)]
#[serde(untagged)]
enum RuleDecl {
    Shorthand(String),
    Full(ProxyRule),
}

impl From<RuleDecl> for ProxyRule {
    fn from(decl: RuleDecl) -> Self {
        match decl {
            RuleDecl::Shorthand(target) => ProxyRule::new(target),
            RuleDecl::Full(rule) => rule,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamScheme {
    Http,
    Https,
}

impl UpstreamScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamScheme::Http => "http",
            UpstreamScheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            UpstreamScheme::Http => 80,
            UpstreamScheme::Https => 443,
        }
    }
}

/// Connectable form of a rule's `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub scheme: UpstreamScheme,
    pub host: String,
    pub port: u16,
    /// Value for the `Host` header when `changeOrigin` is set
    pub authority: String,
    /// Path prepended to forwarded request paths, without trailing slash
    pub base_path: String,
}

impl UpstreamTarget {
    pub fn parse(target: &str) -> Result<Self, String> {
        let uri: Uri = target.parse().map_err(|e: http::uri::InvalidUri| e.to_string())?;

        let scheme = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("http") => UpstreamScheme::Http,
            Some(s) if s.eq_ignore_ascii_case("https") => UpstreamScheme::Https,
            Some(other) => return Err(format!("unsupported scheme {other:?}")),
            None => return Err("missing scheme".to_string()),
        };
        let authority = uri
            .authority()
            .ok_or_else(|| "missing authority".to_string())?;
        let host = authority.host();
        if host.is_empty() {
            return Err("missing host".to_string());
        }
        let port = match authority.port() {
            Some(port) => port.as_u16(),
            None => scheme.default_port(),
        };
        let host_header = match authority.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self {
            scheme,
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            authority: host_header,
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    /// `host:port` string used to open the TCP connection.
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Path sent upstream for a client request target.
    pub fn outbound_path(&self, request_path: &str) -> String {
        if self.base_path.is_empty() {
            return request_path.to_string();
        }
        format!("{}{}", self.base_path, request_path)
    }

    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme.as_str(), self.authority, self.base_path)
    }
}

/// A declared prefix and its rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    pub prefix: String,
    pub rule: ProxyRule,
}

/// Proxy rules in declaration order.
///
/// Duplicates are kept as declared so validation can report them; lookups
/// always take the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyTable {
    entries: Vec<ProxyEntry>,
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, prefix: impl Into<String>, rule: ProxyRule) {
        self.entries.push(ProxyEntry {
            prefix: prefix.into(),
            rule,
        });
    }

    pub fn with(mut self, prefix: impl Into<String>, rule: ProxyRule) -> Self {
        self.push(prefix, rule);
        self
    }

    pub fn entries(&self) -> &[ProxyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, prefix: &str) -> Option<&ProxyRule> {
        self.entries
            .iter()
            .find(|entry| entry.prefix == prefix)
            .map(|entry| &entry.rule)
    }
}

impl<'de> Deserialize<'de> for ProxyTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = ProxyTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a table mapping path prefixes to proxy rules")
            }

            fn visit_map<A>(self, mut map: A) -> Result<ProxyTable, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut table = ProxyTable::new();
                while let Some((prefix, decl)) = map.next_entry::<String, RuleDecl>()? {
                    table.push(prefix, decl.into());
                }
                Ok(table)
            }

            fn visit_unit<E>(self) -> Result<ProxyTable, E>
            where
                E: de::Error,
            {
                Ok(ProxyTable::new())
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

impl Serialize for ProxyTable {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.prefix, &entry.rule)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_target() {
        let target = UpstreamTarget::parse("http://devops_backend:8000").unwrap();
        assert_eq!(target.scheme, UpstreamScheme::Http);
        assert_eq!(target.host, "devops_backend");
        assert_eq!(target.port, 8000);
        assert_eq!(target.authority, "devops_backend:8000");
        assert_eq!(target.base_path, "");
        assert_eq!(target.socket_addr(), "devops_backend:8000");
    }

    #[test]
    fn default_ports_follow_scheme() {
        let https = UpstreamTarget::parse("https://api.example.com").unwrap();
        assert_eq!(https.port, 443);
        assert_eq!(https.authority, "api.example.com");

        let http = UpstreamTarget::parse("http://api.example.com/").unwrap();
        assert_eq!(http.port, 80);
        assert_eq!(http.base_path, "");
    }

    #[test]
    fn base_path_is_prepended() {
        let target = UpstreamTarget::parse("http://backend:8000/v2/").unwrap();
        assert_eq!(target.base_path, "/v2");
        assert_eq!(target.outbound_path("/api/hello?x=1"), "/v2/api/hello?x=1");
        assert_eq!(target.url(), "http://backend:8000/v2");
    }

    #[test]
    fn ipv6_targets_bracket_socket_addr() {
        let target = UpstreamTarget::parse("http://[::1]:9000").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.socket_addr(), "[::1]:9000");
        assert_eq!(target.authority, "[::1]:9000");
    }

    #[test]
    fn rejects_malformed_targets() {
        assert!(UpstreamTarget::parse("devops_backend:8000").is_err());
        assert!(UpstreamTarget::parse("ftp://files.example.com").is_err());
        assert!(UpstreamTarget::parse("http://").is_err());
        assert!(UpstreamTarget::parse("not a url").is_err());
        assert!(UpstreamTarget::parse("/relative/only").is_err());
    }

    #[test]
    fn table_keeps_declaration_order_and_shorthand() {
        let json = r#"{
            "/health": { "target": "http://backend:8000", "changeOrigin": true },
            "/api": "http://backend:9000"
        }"#;
        let table: ProxyTable = serde_json::from_str(json).unwrap();
        let prefixes: Vec<_> = table.entries().iter().map(|e| e.prefix.as_str()).collect();
        assert_eq!(prefixes, ["/health", "/api"]);
        assert!(table.get("/health").unwrap().change_origin);
        assert_eq!(table.get("/api").unwrap(), &ProxyRule::new("http://backend:9000"));
    }

    #[test]
    fn table_serializes_as_ordered_map() {
        let table = ProxyTable::new()
            .with("/b", ProxyRule::new("http://b:1"))
            .with("/a", ProxyRule::new("http://a:1").change_origin(true));
        let json = serde_json::to_string(&table).unwrap();
        assert!(json.find("\"/b\"").unwrap() < json.find("\"/a\"").unwrap());
        assert!(json.contains("\"changeOrigin\":true"));
    }
}
