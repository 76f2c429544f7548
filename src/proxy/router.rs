//! Prefix routing
//!
//! Requests are tested against the proxy table in declaration order; the
//! first prefix the request target starts with wins.

use crate::config::{ProxyRule, ProxyTable, UpstreamTarget};
use crate::error::ConfigError;

/// A rule with its target already parsed.
#[derive(Debug, Clone)]
pub struct Route {
    pub prefix: String,
    pub rule: ProxyRule,
    pub upstream: UpstreamTarget,
}

impl Route {
    /// `Host` header for the outbound request.
    pub fn outbound_host(&self, client_host: Option<&str>) -> String {
        if self.rule.change_origin {
            return self.upstream.authority.clone();
        }
        client_host
            .map(str::to_string)
            .unwrap_or_else(|| self.upstream.authority.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new(table: &ProxyTable) -> Result<Self, ConfigError> {
        let routes = table
            .entries()
            .iter()
            .map(|entry| {
                let upstream =
                    entry
                        .rule
                        .upstream()
                        .map_err(|reason| ConfigError::InvalidTarget {
                            prefix: entry.prefix.clone(),
                            target: entry.rule.target.clone(),
                            reason,
                        })?;
                Ok(Route {
                    prefix: entry.prefix.clone(),
                    rule: entry.rule.clone(),
                    upstream,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { routes })
    }

    /// First route whose prefix the request target starts with.
    pub fn match_path(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| path.starts_with(route.prefix.as_str()))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
