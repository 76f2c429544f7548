//! Error types surfaced by configuration loading and request forwarding.

use std::path::PathBuf;
use thiserror::Error;

/// Startup failure: the declaration is malformed or cannot be honoured.
///
/// Every variant except [`ConfigError::Bind`] is raised before any socket is
/// bound.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("proxy rule {prefix:?} has invalid target {target:?}: {reason}")]
    InvalidTarget {
        prefix: String,
        target: String,
        reason: String,
    },

    #[error("invalid proxy prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: String },

    #[error("proxy rule {prefix:?} sets invalid header name {name:?}")]
    InvalidHeader { prefix: String, name: String },

    #[error("invalid host {value:?}: {reason}")]
    InvalidHost { value: String, reason: String },

    #[error("duplicate proxy prefix {0:?}")]
    DuplicatePrefix(String),

    #[error("invalid plugin entry {name:?}: {reason}")]
    InvalidPlugin { name: String, reason: String },

    #[error("invalid override {name}={value:?}: {reason}")]
    InvalidOverride {
        name: String,
        value: String,
        reason: String,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn parse(origin: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            origin: origin.into(),
            message: message.to_string(),
        }
    }
}

/// Per-request forwarding failure. Only the requester sees these; the server
/// keeps running.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream {authority} unavailable: {reason}")]
    UpstreamUnavailable { authority: String, reason: String },

    #[error("upstream {authority} timed out after {timeout_ms} ms")]
    UpstreamTimeout { authority: String, timeout_ms: u64 },

    #[error("upstream {authority} sent an unreadable response: {reason}")]
    BadUpstreamResponse { authority: String, reason: String },

    #[error("request body exceeds configured limit of {limit} bytes")]
    RequestBodyTooLarge { limit: usize },
}

impl ProxyError {
    /// Status line sent to the client for this failure.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            ProxyError::UpstreamUnavailable { .. } => (502, "Bad Gateway"),
            ProxyError::UpstreamTimeout { .. } => (504, "Gateway Timeout"),
            ProxyError::BadUpstreamResponse { .. } => (502, "Bad Gateway"),
            ProxyError::RequestBodyTooLarge { .. } => (413, "Payload Too Large"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_prefix_display_names_prefix() {
        let err = ConfigError::DuplicatePrefix("/api".into());
        assert!(err.to_string().contains("\"/api\""));
    }

    #[test]
    fn read_error_keeps_source() {
        let err = ConfigError::Read {
            path: PathBuf::from("devgate.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("devgate.toml"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn proxy_errors_map_to_gateway_statuses() {
        let unavailable = ProxyError::UpstreamUnavailable {
            authority: "devops_backend:8000".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(unavailable.status(), (502, "Bad Gateway"));

        let timeout = ProxyError::UpstreamTimeout {
            authority: "devops_backend:8000".into(),
            timeout_ms: 50,
        };
        assert_eq!(timeout.status().0, 504);

        let too_large = ProxyError::RequestBodyTooLarge { limit: 10 };
        assert_eq!(too_large.status().0, 413);
    }
}
