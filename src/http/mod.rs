//! HTTP protocol implementation.
//!
//! This module implements an HTTP/1.0 and HTTP/1.1 server with keep-alive
//! connections and protocol upgrades.
//!
//! # Architecture
//!
//! - **`connection`**: The connection driver running the request-response cycle
//! - **`parser`**: Incremental request parser working on the connection's read buffer
//! - **`header`**: Header spans, borrowed header views and the header-name table
//! - **`request`**: The borrowed request handed to response sources
//! - **`query`**: Query string, url-encoded and multipart form decoding
//! - **`response`**: The `Response` trait, in-memory and error responses
//! - **`writer`**: Serializes the response head and frames the body
//! - **`source`**: Response sources and the server log
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌──────────────────┐
//!        │   RequestLine    │ ← Wait for the request line
//!        └──────┬───────────┘
//!               ▼
//!        ┌──────────────────┐
//!        │     Headers      │ ← One header line at a time
//!        └──────┬───────────┘
//!               │ POST only
//!               ▼
//!        ┌──────────────────┐
//!        │     Content      │ ← Buffered or streamed to the multipart decoder
//!        └──────┬───────────┘
//!               ▼
//!        ┌──────────────────┐
//!        │     Respond      │ ← Head, then Content-Length or chunked body
//!        └──────┬───────────┘
//!               ├─ Keep-Alive → RequestLine (same connection)
//!               ├─ Upgrade → socket moves to the new protocol driver
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod header;
pub mod parser;
pub mod query;
pub mod request;
pub mod response;
pub mod source;
pub mod writer;
