//! The transport contract the session consumes.
//!
//! The core only needs two operations against a reliable, ordered,
//! message-framed byte stream: send one frame, receive one frame. Concrete
//! backends (in-memory channel, WebSocket, HTTP batch) live in the sibling
//! `capnweb-transport` crate and implement this trait; the core never
//! references a socket type directly.

use async_trait::async_trait;
use thiserror::Error;

/// A transport-level failure. Distinct from [`crate::error::SessionError`]:
/// this is the narrow contract a backend reports, which the session then
/// wraps with its own bookkeeping context.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("io error: {0}")]
    Io(String),
}

/// One independent, UTF-8 JSON-document frame in each direction.
///
/// For a WebSocket backend, one frame is one text message. For an HTTP
/// batch backend, a frame is one newline-delimited line of the request or
/// response body. Implementations must preserve frame boundaries and
/// ordering; the core assumes both.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_frame(&self, frame: String) -> Result<(), TransportError>;
    async fn recv_frame(&self) -> Result<String, TransportError>;

    /// Tear down the transport. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
