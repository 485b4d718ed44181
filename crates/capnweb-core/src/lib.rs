//! Session state machine, capability tables, and pipelining engine for
//! the Cap'n Web RPC protocol.
//!
//! This crate owns everything transport-agnostic: the four-table
//! reference model (imports/exports crossed with our view/peer view,
//! collapsed via sign convention — see [`ids`]), the call engine that
//! evaluates incoming pushes, and the stub layer client code builds
//! pipelined call chains with. Wire encoding lives in [`capnweb_wire`];
//! concrete socket/HTTP backends live in the sibling `capnweb-transport`
//! crate and only need to implement [`transport::Transport`].

mod call_engine;
mod config;
mod error;
mod exports;
mod ids;
mod imports;
mod message;
mod session;
mod stub;
mod target;
mod transport;

pub use config::{ErrorSanitizer, SessionConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_BATCH_SIZE};
pub use error::{RpcError, SessionError, TableError};
pub use exports::{ExportState, ExportsTable};
pub use ids::{exports_key, imports_key, IdAllocator};
pub use imports::{ImportState, ImportsTable};
pub use message::{Message, MessageError};
pub use session::RpcSession;
pub use stub::{Stub, StubBackend};
pub use target::{is_reserved_method, Dispatched, DispatchFuture, Dispatcher, RegisteredTarget, Target};
pub use transport::{Transport, TransportError};

pub use capnweb_wire::{DecodeError, EncodeError, ErrorKind, PathSegment, Value, WireError};
