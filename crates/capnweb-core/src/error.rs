//! The two public error enums: [`RpcError`] (in-band, per-call) and
//! [`SessionError`] (out-of-band, fatal to the whole session).

use thiserror::Error;

use capnweb_wire::{DecodeError as WireDecodeError, EncodeError as WireEncodeError};
use capnweb_wire::{ErrorKind, Value, WireError};

use crate::transport::TransportError;

/// An in-band protocol error: the payload of a `reject` or the `data?`
/// member of a rejected pipeline. Mirrors [`WireError`] but is the type
/// application code and the call engine actually construct and match on;
/// conversion to/from the wire form happens at the codec boundary.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
    pub data: Option<Box<Value>>,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(Box::new(data));
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn cap_revoked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CapRevoked, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<WireError> for RpcError {
    fn from(e: WireError) -> Self {
        Self {
            kind: e.kind,
            message: e.message,
            data: e.data,
        }
    }
}

impl From<RpcError> for WireError {
    fn from(e: RpcError) -> Self {
        WireError {
            kind: e.kind,
            message: e.message,
            data: e.data,
        }
    }
}

/// A violation of the protocol's table invariants: unknown id, double
/// resolve, over-release. Always fatal (see §7 of the protocol design) —
/// every variant here becomes a [`SessionError::Protocol`] and triggers
/// `abort`.
#[derive(Debug, Clone, Error)]
pub enum TableError {
    #[error("reference to unknown import {0}")]
    UnknownImport(i64),
    #[error("reference to unknown export {0}")]
    UnknownExport(i64),
    #[error("import {0} resolved or rejected more than once")]
    DoubleResolve(i64),
    #[error("release of {0} exceeds outstanding refcount")]
    OverRelease(i64),
}

/// Out-of-band failures: codec corruption, table protocol violations,
/// transport I/O failure, or an `abort` received from the peer. Distinct
/// from [`RpcError`], which is carried in-band per call.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed incoming frame: {0}")]
    Decode(#[from] WireDecodeError),

    #[error("failed to encode outgoing frame: {0}")]
    Encode(#[from] WireEncodeError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] TableError),

    #[error("unrecognized message shape: {0}")]
    Message(String),

    #[error("peer aborted the session: {0}")]
    AbortedByPeer(RpcError),

    #[error("session is closed")]
    Closed,
}

impl Clone for SessionError {
    fn clone(&self) -> Self {
        // SessionError is fanned out to every pending awaiter when a
        // session dies; cloning as a string loses the source chain but
        // keeps every variant that needs to reach application code
        // intact in spirit (see `SessionError::Closed`-style variants).
        match self {
            SessionError::Decode(e) => SessionError::Message(format!("decode error: {e}")),
            SessionError::Encode(e) => SessionError::Message(format!("encode error: {e}")),
            SessionError::Transport(e) => SessionError::Message(format!("transport error: {e}")),
            SessionError::Protocol(e) => SessionError::Protocol(e.clone()),
            SessionError::Message(m) => SessionError::Message(m.clone()),
            SessionError::AbortedByPeer(e) => SessionError::AbortedByPeer(e.clone()),
            SessionError::Closed => SessionError::Closed,
        }
    }
}

impl SessionError {
    /// The `RpcError` an in-flight call awaiter sees when the session dies
    /// out from under it.
    pub fn as_rpc_error(&self) -> RpcError {
        match self {
            SessionError::AbortedByPeer(e) => e.clone(),
            other => RpcError::canceled(other.to_string()),
        }
    }
}
