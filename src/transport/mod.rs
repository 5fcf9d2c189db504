//! Network primitives used by the venue adapters.
//!
//! - [`http`] - REST helper with request signing and status checking
//! - [`websocket`] - single-connection WebSocket client with keep-alive
//! - [`proxy`] - per-venue HTTP client factory
//! - [`tls`] - process-wide rustls provider installation

pub mod http;
pub mod proxy;
pub mod tls;
pub mod websocket;

pub use http::{HttpHelper, Params};
pub use proxy::{NoProxy, ProxyProvider};
pub use websocket::{WsClient, WsReader, WsWriter};
