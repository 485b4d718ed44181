use thiserror::Error;

/// A malformed wire payload. Every one of these is fatal at the session
/// level: the receiving peer must emit `abort` and tear down.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("array is neither a `[[...]]`-escaped plain array nor a recognized special form")]
    BadArrayShape,

    #[error("unknown special-form tag {0:?}")]
    UnknownTag(String),

    #[error("special form {tag:?} expects {expected} element(s), got {got}")]
    WrongArity {
        tag: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("special form {tag:?} expected a {expected} at position {pos}, found something else")]
    WrongType {
        tag: &'static str,
        pos: usize,
        expected: &'static str,
    },

    #[error("unknown error kind {0:?}")]
    UnknownErrorKind(String),

    #[error("invalid base64 in `bytes` special form: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("non-finite float leaked into a plain JSON number position")]
    NonFiniteLeaked,

    #[error("failed to serialize: {0}")]
    Json(#[from] serde_json::Error),
}
