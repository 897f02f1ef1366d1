//! Reusable I/O buffers shared by the HTTP and WebSocket drivers.
//!
//! - **`read`**: [`ReadBuffer`], a growable receive buffer that keeps
//!   consumed bytes around for parser lookback
//! - **`write`**: [`WriteQueue`], a FIFO of contiguous outgoing buffers backed
//!   by an inline region and a pool of heap buffers

pub mod read;
pub mod write;

pub use read::ReadBuffer;
pub use write::WriteQueue;
