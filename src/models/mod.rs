//! Data models for devgate

pub mod exchange;

pub use exchange::*;
