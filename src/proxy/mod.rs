//! Dev server proxy
//!
//! Path-prefix routing, HTTP/1.1 forwarding and the accept loop.

pub mod http;
pub mod router;
pub mod server;
pub mod upstream;

pub use router::{Route, Router};
pub use server::*;
pub use upstream::{TcpConnector, UpstreamConnector, UpstreamStream};
