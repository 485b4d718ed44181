//! Plain-struct session configuration: public fields, a `Default` impl
//! with documented constants, no config-file or env-var loading.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RpcError;

/// Rewrites an `RpcError` before it is sent to the peer, e.g. to redact an
/// internal stack trace carried in `data`.
pub type ErrorSanitizer = Arc<dyn Fn(&mut RpcError) + Send + Sync>;

/// Default per-call timeout: 30 seconds.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on pushes batched into a single flush.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 256;

#[derive(Clone)]
pub struct SessionConfig {
    /// Advisory timeout for an individual call's awaiter. Expiry fails the
    /// awaiter with `ErrorKind::Canceled` and releases the import; a
    /// resolution that arrives after timeout is accepted silently and
    /// discarded if no awaiters remain.
    pub call_timeout: Duration,
    /// Upper bound on pushes coalesced into one flush.
    pub max_batch_size: usize,
    /// Optional hook to rewrite outgoing `RpcError` bodies before they
    /// cross the wire.
    pub error_sanitizer: Option<ErrorSanitizer>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            error_sanitizer: None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("call_timeout", &self.call_timeout)
            .field("max_batch_size", &self.max_batch_size)
            .field("error_sanitizer", &self.error_sanitizer.is_some())
            .finish()
    }
}
