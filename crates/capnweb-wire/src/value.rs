//! The transported value domain: JSON plus the tagged special forms
//! (`export`, `import`, `promise`, `pipeline`, `error`, `bytes`, `date`,
//! `bigint`, `undefined`, `inf`/`-inf`/`nan`) described by the wire codec.

use std::fmt;

/// A single step in a [`Value::Pipeline`] path: either a property name
/// (object / capability member access) or an array index.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Property(String),
    Index(i64),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Property(s) => write!(f, ".{s}"),
            PathSegment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// The six error kinds defined at the protocol level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    CapRevoked,
    PermissionDenied,
    Canceled,
    Internal,
}

impl ErrorKind {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::CapRevoked => "cap_revoked",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        Some(match s {
            "bad_request" => ErrorKind::BadRequest,
            "not_found" => ErrorKind::NotFound,
            "cap_revoked" => ErrorKind::CapRevoked,
            "permission_denied" => ErrorKind::PermissionDenied,
            "canceled" => ErrorKind::Canceled,
            "internal" => ErrorKind::Internal,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// An in-band protocol error value (the payload of `reject`/`abort`, or the
/// `data?` member of a `["pipeline", ...]` rejection).
#[derive(Debug, Clone, PartialEq)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
    pub data: Option<Box<Value>>,
}

impl WireError {
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

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for WireError {}

/// A value in transit between two peers.
///
/// `Value` is the decoded form of everything that can appear in a `push`,
/// `resolve`, `reject` or pipeline-argument position: plain JSON scalars and
/// objects, plain arrays (escaped on the wire), and the tagged special
/// forms (capability references, bytes, dates, bigints, `undefined`, and
/// non-finite floats).
///
/// Capability references (`Export`/`Import`/`Promise`) carry only the raw
/// wire-signed integer ID; resolving an ID to a live capability/import-table
/// entry is the job of the session layer, not the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    /// A distinct "absent" value, as opposed to `Null`.
    Undefined,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// A plain JSON array. Always round-trips through the `[[...]]` escape.
    Array(Vec<Value>),
    /// A plain JSON object. Order is preserved because peers may rely on
    /// deterministic iteration for logging/diffing, even though the
    /// protocol itself treats member order as insignificant.
    Object(Vec<(String, Value)>),
    Bytes(Vec<u8>),
    /// UTC timestamp, epoch milliseconds.
    Date(i64),
    /// Arbitrary-precision integer, carried as its exact decimal string.
    BigInt(String),
    /// A capability we (the sender) are offering. `id` is our local
    /// (negative) export id; the wire form negates it for the peer.
    Export(i64),
    /// A reference to a capability hosted by the sender, already resolved.
    Import(i64),
    /// Same as `Import` but the sender flags it as not-yet-resolved.
    Promise(i64),
    /// A reference into the result of an as-yet-unresolved push: walk
    /// `path` off of `id`'s eventual value, then optionally invoke it with
    /// `args`.
    Pipeline {
        id: i64,
        path: Vec<PathSegment>,
        args: Option<Vec<Value>>,
    },
    Error(WireError),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn from_str(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}
