//! # devgate
//!
//! Development web server for a single-page frontend. Requests whose path
//! starts with a declared prefix are forwarded to a backend service; every
//! other request is answered from the project's static root.
//!
//! ## Features
//!
//! - Ordered path-prefix proxy table with first-match routing
//! - `changeOrigin` Host rewriting, `X-Forwarded-*` headers, WebSocket tunnelling
//! - TOML/JSON declaration with environment and CLI overrides
//! - Static file serving with history-API fallback to `index.html`
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      devgate binary                      │
//! ├──────────────────────────────────────────────────────────┤
//! │   config (TOML/JSON + overrides)  ──►  api::start        │
//! │  ┌──────────┐   ┌──────────┐   ┌───────────────────────┐ │
//! │  │  Accept  │──►│  Router  │──►│ Upstream (TCP / TLS)  │ │
//! │  │   Loop   │   │ (prefix) │   └───────────────────────┘ │
//! │  └──────────┘   └────┬─────┘   ┌───────────────────────┐ │
//! │                      └────────►│  Static files (root)  │ │
//! │                                └───────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod static_files;

pub use api::{start, ServerHandle, ServerStatus};
pub use config::ServerConfig;
pub use error::{ConfigError, ProxyError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
