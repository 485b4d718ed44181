//! ID allocation and the sign-convention helpers that turn a raw wire
//! integer into a local table key.
//!
//! Every id is minted once, by whichever peer needs a fresh one, from a
//! single monotonic counter that yields negative numbers (`-1, -2, ...`).
//! The minting peer's own canonical key for that id is the literal
//! negative number — it never needs to negate its own mint. The other
//! peer, on first seeing the id (as a message field, a pipeline root, or
//! a capability tag embedded in a value), negates it to land on its own
//! canonical key: positive for "something I import", negative for
//! "something I host". [`exports_key`] and [`imports_key`] below
//! normalize a raw wire integer to whichever canonical space is relevant,
//! regardless of which peer originally minted it.

use std::sync::atomic::{AtomicI64, Ordering};

/// Normalize a raw wire id to this peer's Exports-table key (always <= 0).
/// Used for: Call Engine target-capability lookups (pipeline root id),
/// and for `pull`/`release` message fields (sent by the id's importer
/// using its own positive key).
pub fn exports_key(id: i64) -> i64 {
    if id > 0 {
        -id
    } else {
        id
    }
}

/// Normalize a raw wire id to this peer's Imports-table key (always >= 0).
/// Used for: capability values received via `export`/`promise` tags, and
/// for `resolve`/`reject` message fields (sent by the id's exporter using
/// its own negative key).
pub fn imports_key(id: i64) -> i64 {
    id.abs()
}

/// Hands out fresh negative export ids. IDs are never recycled, per the
/// protocol's no-reuse invariant; a session can mint up to `i64::MAX`
/// capabilities before wrapping, far beyond any practical session's
/// lifetime.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_export: AtomicI64,
    /// Highest-numbered import id observed from the peer so far. Purely
    /// diagnostic bookkeeping: we never allocate import ids ourselves, we
    /// only derive them by negating an export id we received.
    highest_seen_import: AtomicI64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next_export: AtomicI64::new(1),
            highest_seen_import: AtomicI64::new(0),
        }
    }

    /// Mint a fresh negative export id, for a new locally-hosted
    /// capability or for the result slot of a push we're about to send.
    pub fn alloc_export(&self) -> i64 {
        let n = self.next_export.fetch_add(1, Ordering::Relaxed);
        -n
    }

    pub fn note_import_seen(&self, id: i64) {
        self.highest_seen_import.fetch_max(id, Ordering::Relaxed);
    }

    pub fn highest_seen_import(&self) -> i64 {
        self.highest_seen_import.load(Ordering::Relaxed)
    }
}
