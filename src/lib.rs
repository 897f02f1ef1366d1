//! miniwebd - embeddable HTTP/1.x server with WebSocket upgrade.
//!
//! Core library: buffer primitives, the HTTP connection engine, the
//! WebSocket driver and the server that ties them together.

pub mod buffer;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod server;
pub mod ws;
