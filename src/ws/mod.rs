//! WebSocket support (RFC 6455, version 13).
//!
//! - [`handshake`]: upgrade validation and the `101` response.
//! - [`frame`]: frame header codec and masking.
//! - [`framer`]: incremental frame reader with fragment reassembly.
//! - [`connection`]: the driver that owns an upgraded socket.

pub mod connection;
pub mod frame;
pub mod framer;
pub mod handshake;

pub use connection::{EchoHandler, MessageHandler, MessageSender, SendGuard};
pub use frame::{CloseReason, MessageKind};
pub use handshake::{HandlerFactory, WebSocketSource};
