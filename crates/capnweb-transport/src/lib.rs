//! Concrete [`capnweb_core::Transport`] backends: an in-process channel
//! pair for tests and same-process wiring, a WebSocket transport for the
//! primary deployment target, and an HTTP batch transport for the
//! protocol's alternate carrier.
//!
//! None of these crates' types participate in protocol semantics — they
//! only move opaque, newline-independent frame strings in order.

mod http_batch;
mod mem;
mod websocket;

pub use http_batch::{HttpBatchClient, HttpBatchServer};
pub use mem::MemTransport;
pub use websocket::{DialedWebSocketTransport, WebSocketTransport};
