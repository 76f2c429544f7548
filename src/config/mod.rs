//! Dev-server configuration
//!
//! The declaration is read once at startup, validated, and then shared
//! read-only for the lifetime of the server.

mod rule;

pub use rule::*;

use crate::error::ConfigError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File picked up from the working directory by [`load`].
pub const DEFAULT_CONFIG_FILE: &str = "devgate.toml";
pub const DEFAULT_PORT: u16 = 3000;
const BACKEND_TARGET: &str = "http://devops_backend:8000";

static BUILTIN: Lazy<ServerConfig> = Lazy::new(|| ServerConfig {
    plugins: vec!["vue".to_string()],
    root: None,
    server: ServerSection {
        port: DEFAULT_PORT,
        host: HostSetting::Flag(true),
        strict_port: false,
        proxy: ProxyTable::new()
            .with("/api", ProxyRule::new(BACKEND_TARGET).change_origin(true))
            .with("/health", ProxyRule::new(BACKEND_TARGET).change_origin(true)),
    },
});

/// Interface selection: `true` binds every interface, `false` loopback only,
/// a string names the address to bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, from = "HostDecl")]
pub enum HostSetting {
    Flag(bool),
    Address(String),
}

/// Raw `host` value as written; quoted `"true"`/`"false"` become flags.
#[derive(Deserialize)]
#[serde(untagged)]
enum HostDecl {
    Flag(bool),
    Address(String),
}

impl From<HostDecl> for HostSetting {
    fn from(decl: HostDecl) -> Self {
        match decl {
            HostDecl::Flag(flag) => HostSetting::Flag(flag),
            HostDecl::Address(addr) => match addr.parse::<HostSetting>() {
                Ok(flag @ HostSetting::Flag(_)) => flag,
                _ => HostSetting::Address(addr),
            },
        }
    }
}

impl Default for HostSetting {
    fn default() -> Self {
        HostSetting::Flag(false)
    }
}

impl HostSetting {
    pub fn bind_address(&self) -> &str {
        match self {
            HostSetting::Flag(true) => "0.0.0.0",
            HostSetting::Flag(false) => "127.0.0.1",
            HostSetting::Address(addr) => addr.as_str(),
        }
    }
}

impl FromStr for HostSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "true" => Ok(HostSetting::Flag(true)),
            "false" => Ok(HostSetting::Flag(false)),
            "" => Err("host cannot be empty".to_string()),
            _ if value.contains(char::is_whitespace) || value.contains('/') => {
                Err("not an address or host name".to_string())
            }
            _ => Ok(HostSetting::Address(value.to_string())),
        }
    }
}

impl fmt::Display for HostSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostSetting::Flag(flag) => write!(f, "{flag}"),
            HostSetting::Address(addr) => f.write_str(addr),
        }
    }
}

/// `server` section of the declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub host: HostSetting,
    #[serde(default)]
    pub strict_port: bool,
    #[serde(default)]
    pub proxy: ProxyTable,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: HostSetting::default(),
            strict_port: false,
            proxy: ProxyTable::new(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Complete dev-server declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Framework-integration plugins, in registration order
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Directory served for requests no proxy rule claims
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub server: ServerSection,
}

impl Default for ServerConfig {
    /// The built-in declaration: the `vue` plugin, port 3000 on all
    /// interfaces, `/api` and `/health` forwarded to the backend service.
    fn default() -> Self {
        BUILTIN.clone()
    }
}

impl ServerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Self::parse_toml(raw, "<inline>")
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Self::parse_json(raw, "<inline>")
    }

    fn parse_toml(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig =
            toml::from_str(raw).map_err(|e| ConfigError::parse(origin, e.message()))?;
        config.validate()?;
        Ok(config)
    }

    fn parse_json(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig =
            serde_json::from_str(raw).map_err(|e| ConfigError::parse(origin, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn port(&self) -> u16 {
        self.server.port
    }

    pub fn proxy(&self) -> &ProxyTable {
        &self.server.proxy
    }

    /// Address string the listener binds to.
    pub fn bind_host(&self) -> &str {
        self.server.host.bind_address()
    }

    /// Check every invariant of the declaration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_plugins = HashSet::new();
        for name in &self.plugins {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidPlugin {
                    name: name.clone(),
                    reason: "plugin name cannot be empty".to_string(),
                });
            }
            if !seen_plugins.insert(name.as_str()) {
                return Err(ConfigError::InvalidPlugin {
                    name: name.clone(),
                    reason: "registered more than once".to_string(),
                });
            }
        }

        if let HostSetting::Address(addr) = &self.server.host {
            let parsed = addr
                .parse::<HostSetting>()
                .map_err(|reason| ConfigError::InvalidHost {
                    value: addr.clone(),
                    reason,
                })?;
            if let HostSetting::Flag(_) = parsed {
                return Err(ConfigError::InvalidHost {
                    value: addr.clone(),
                    reason: "boolean written as an address".to_string(),
                });
            }
        }

        let mut seen_prefixes = HashSet::new();
        for entry in self.server.proxy.entries() {
            validate_prefix(&entry.prefix)?;
            if !seen_prefixes.insert(entry.prefix.as_str()) {
                return Err(ConfigError::DuplicatePrefix(entry.prefix.clone()));
            }
            entry
                .rule
                .upstream()
                .map_err(|reason| ConfigError::InvalidTarget {
                    prefix: entry.prefix.clone(),
                    target: entry.rule.target.clone(),
                    reason,
                })?;
            for name in entry.rule.headers.keys() {
                if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                    return Err(ConfigError::InvalidHeader {
                        prefix: entry.prefix.clone(),
                        name: name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Apply overrides on top of the declaration and re-validate.
    pub fn apply(&mut self, overrides: &Overrides) -> Result<(), ConfigError> {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(root) = &overrides.root {
            self.root = Some(root.clone());
        }
        self.validate()
    }
}

fn validate_prefix(prefix: &str) -> Result<(), ConfigError> {
    let reason = if prefix.is_empty() {
        "prefix cannot be empty"
    } else if !prefix.starts_with('/') {
        "prefix must start with '/'"
    } else if prefix.contains(char::is_whitespace) {
        "prefix cannot contain whitespace"
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidPrefix {
        prefix: prefix.to_string(),
        reason: reason.to_string(),
    })
}

/// Settings that take precedence over the declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub port: Option<u16>,
    pub host: Option<HostSetting>,
    pub root: Option<PathBuf>,
}

impl Overrides {
    /// Read `DEVGATE_PORT` and `DEVGATE_HOST`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(
            env::var("DEVGATE_PORT").ok().as_deref(),
            env::var("DEVGATE_HOST").ok().as_deref(),
        )
    }

    pub fn from_vars(port: Option<&str>, host: Option<&str>) -> Result<Self, ConfigError> {
        let port = port
            .map(|raw| {
                raw.trim()
                    .parse::<u16>()
                    .map_err(|e| ConfigError::InvalidOverride {
                        name: "DEVGATE_PORT".to_string(),
                        value: raw.to_string(),
                        reason: e.to_string(),
                    })
            })
            .transpose()?;
        let host = host
            .map(|raw| {
                raw.parse::<HostSetting>()
                    .map_err(|reason| ConfigError::InvalidOverride {
                        name: "DEVGATE_HOST".to_string(),
                        value: raw.to_string(),
                        reason,
                    })
            })
            .transpose()?;
        Ok(Self {
            port,
            host,
            root: None,
        })
    }

    /// Layer `other` on top of `self`; values set in `other` win.
    pub fn merge(self, other: Overrides) -> Overrides {
        Overrides {
            port: other.port.or(self.port),
            host: other.host.or(self.host),
            root: other.root.or(self.root),
        }
    }
}

/// Load `devgate.toml` from the working directory (or the built-in
/// declaration when absent), then apply environment overrides.
pub fn load() -> Result<ServerConfig, ConfigError> {
    let overrides = Overrides::from_env()?;
    let path = Path::new(DEFAULT_CONFIG_FILE);
    let path = path.exists().then_some(path);
    load_from(path, &overrides)
}

/// Loader with an explicit path and overrides. `None` selects the built-in
/// declaration. Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: Option<&Path>, overrides: &Overrides) -> Result<ServerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let origin = path.display().to_string();
            let is_json = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if is_json {
                ServerConfig::parse_json(&raw, &origin)?
            } else {
                ServerConfig::parse_toml(&raw, &origin)?
            }
        }
        None => ServerConfig::default(),
    };
    config.apply(overrides)?;
    Ok(config)
}
