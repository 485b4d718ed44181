//! Wire-level value domain and JSON codec for the Cap'n Web RPC protocol.
//!
//! This crate is deliberately small and stateless: it only knows how to
//! translate between [`Value`] and the escaped JSON-array dialect
//! described in the protocol's data model. It does not know about
//! sessions, imports/exports tables, or capability targets — callers in
//! `capnweb-core` build [`Value`] trees (interning capabilities into
//! `Export`/`Import` ids themselves) and hand them to [`codec::to_json`]
//! / [`codec::from_json`].

mod codec;
mod error;
mod value;

pub use codec::{decode_from_str, encode_to_string, from_json, to_json};
pub use error::{DecodeError, EncodeError};
pub use value::{ErrorKind, PathSegment, Value, WireError};

pub use serde_json::Value as JsonValue;
