//! Exchange model
//!
//! One record per request handled by the dev server, proxied or not.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// How a request was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeOutcome {
    /// Forwarded to an upstream and the response relayed
    Proxied,
    /// Answered by the default handler
    Served,
    /// Tunnelled after a WebSocket upgrade
    Upgraded,
    /// Ended with an error response generated by the server
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyExchange {
    /// Unique identifier for this exchange
    pub id: String,
    /// Milliseconds since epoch when the request head was read
    pub started_at: i64,
    pub method: String,
    /// Request target as received (path and query)
    pub path: String,
    /// Proxy prefix that claimed the request, if any
    pub matched_prefix: Option<String>,
    /// Upstream base URL the request went to
    pub upstream: Option<String>,
    /// `Host` header sent upstream
    pub upstream_host: Option<String>,
    pub status_code: Option<u16>,
    pub outcome: ExchangeOutcome,
    /// Response body bytes relayed to the client
    pub response_size: Option<u64>,
    pub duration_ms: Option<u32>,
    /// Error detail for failed exchanges
    pub error: Option<String>,
}

impl ProxyExchange {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now().timestamp_millis(),
            method: method.to_string(),
            path: path.to_string(),
            matched_prefix: None,
            upstream: None,
            upstream_host: None,
            status_code: None,
            outcome: ExchangeOutcome::Served,
            response_size: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn is_proxied(&self) -> bool {
        self.matched_prefix.is_some()
    }

    /// Get duration as formatted string
    pub fn duration_str(&self) -> String {
        match self.duration_ms {
            Some(ms) if ms < 1000 => format!("{}ms", ms),
            Some(ms) => format!("{:.1}s", ms as f64 / 1000.0),
            None => "-".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_exchange_is_unrouted() {
        let a = ProxyExchange::new("GET", "/index.html");
        let b = ProxyExchange::new("GET", "/index.html");
        assert_ne!(a.id, b.id);
        assert!(!a.is_proxied());
        assert_eq!(a.outcome, ExchangeOutcome::Served);
        assert_eq!(a.duration_str(), "-");
    }

    #[test]
    fn duration_formatting() {
        let mut ex = ProxyExchange::new("GET", "/api");
        ex.duration_ms = Some(42);
        assert_eq!(ex.duration_str(), "42ms");
        ex.duration_ms = Some(1500);
        assert_eq!(ex.duration_str(), "1.5s");
    }

    #[test]
    fn serializes_outcome_in_snake_case() {
        let mut ex = ProxyExchange::new("POST", "/api/sentiment");
        ex.outcome = ExchangeOutcome::Proxied;
        ex.matched_prefix = Some("/api".into());
        let json = serde_json::to_value(&ex).unwrap();
        assert_eq!(json["outcome"], "proxied");
        assert_eq!(json["matched_prefix"], "/api");
    }
}
