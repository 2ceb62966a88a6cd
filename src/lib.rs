//! netcore - portable TCP transport with optional TLS, and a minimal
//! HTTP/1.1 router on top of it.

pub mod config;
pub mod http;
pub mod net;
pub mod server;
