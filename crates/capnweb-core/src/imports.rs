//! The Imports Table: capabilities and pending call results hosted by the
//! peer that we hold references to.

use std::collections::HashMap;

use tokio::sync::oneshot;

use capnweb_wire::Value;

use crate::error::{RpcError, TableError};

#[derive(Debug, Clone)]
pub enum ImportState {
    Pending,
    Resolved(Value),
    Rejected(RpcError),
}

struct ImportEntry {
    refcount: u32,
    state: ImportState,
    waiters: Vec<oneshot::Sender<Result<Value, RpcError>>>,
}

/// Tracks every id this peer imports: both capabilities/values handed to
/// us by the peer, and the result slots of pushes we ourselves sent
/// (which we track here too, since sending a push makes us the awaiter
/// of its eventual result — see `ids` module docs).
#[derive(Default)]
pub struct ImportsTable {
    entries: HashMap<i64, ImportEntry>,
}

impl ImportsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// First reference to `id`: create a Pending entry with refcount 1.
    /// Subsequent references bump the refcount.
    pub fn acquire(&mut self, id: i64) {
        match self.entries.get_mut(&id) {
            Some(e) => e.refcount += 1,
            None => {
                self.entries.insert(
                    id,
                    ImportEntry {
                        refcount: 1,
                        state: ImportState::Pending,
                        waiters: Vec::new(),
                    },
                );
            }
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn state(&self, id: i64) -> Option<&ImportState> {
        self.entries.get(&id).map(|e| &e.state)
    }

    /// Register a one-shot waiter for `id`'s resolution. If already
    /// resolved/rejected, the receiver is immediately satisfied.
    pub fn register_waiter(
        &mut self,
        id: i64,
    ) -> Result<oneshot::Receiver<Result<Value, RpcError>>, TableError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(TableError::UnknownImport(id))?;
        let (tx, rx) = oneshot::channel();
        match &entry.state {
            ImportState::Pending => entry.waiters.push(tx),
            ImportState::Resolved(v) => {
                let _ = tx.send(Ok(v.clone()));
            }
            ImportState::Rejected(e) => {
                let _ = tx.send(Err(e.clone()));
            }
        }
        Ok(rx)
    }

    pub fn resolve(&mut self, id: i64, value: Value) -> Result<(), TableError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(TableError::UnknownImport(id))?;
        if !matches!(entry.state, ImportState::Pending) {
            return Err(TableError::DoubleResolve(id));
        }
        entry.state = ImportState::Resolved(value.clone());
        for waiter in entry.waiters.drain(..) {
            let _ = waiter.send(Ok(value.clone()));
        }
        Ok(())
    }

    pub fn reject(&mut self, id: i64, error: RpcError) -> Result<(), TableError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(TableError::UnknownImport(id))?;
        if !matches!(entry.state, ImportState::Pending) {
            return Err(TableError::DoubleResolve(id));
        }
        entry.state = ImportState::Rejected(error.clone());
        for waiter in entry.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        Ok(())
    }

    /// Local code no longer needs `delta` references to `id`. Returns
    /// `true` if the entry just dropped to zero refcount (the caller
    /// should emit an outbound `release` and may now forget the id).
    pub fn release_local(&mut self, id: i64, delta: u32) -> Result<bool, TableError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(TableError::UnknownImport(id))?;
        if delta > entry.refcount {
            return Err(TableError::OverRelease(id));
        }
        entry.refcount -= delta;
        if entry.refcount == 0 {
            self.entries.remove(&id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Fail every still-pending import with `error` (session abort or
    /// transport loss) and drop them all.
    pub fn fail_all(&mut self, error: RpcError) {
        for (_, mut entry) in self.entries.drain() {
            if matches!(entry.state, ImportState::Pending) {
                for waiter in entry.waiters.drain(..) {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_removes_entry() {
        let mut t = ImportsTable::new();
        t.acquire(1);
        t.acquire(1);
        assert!(t.contains(1));
        assert_eq!(t.release_local(1, 1).unwrap(), false);
        assert_eq!(t.release_local(1, 1).unwrap(), true);
        assert!(!t.contains(1));
    }

    #[test]
    fn over_release_is_a_table_error() {
        let mut t = ImportsTable::new();
        t.acquire(1);
        assert!(matches!(
            t.release_local(1, 5),
            Err(TableError::OverRelease(1))
        ));
    }

    #[test]
    fn resolve_wakes_waiters_exactly_once() {
        let mut t = ImportsTable::new();
        t.acquire(1);
        let rx = t.register_waiter(1).unwrap();
        t.resolve(1, Value::Integer(42)).unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap(), Value::Integer(42));
        // A second resolve for the same id is a protocol error.
        assert!(matches!(
            t.resolve(1, Value::Integer(1)),
            Err(TableError::DoubleResolve(1))
        ));
    }

    #[test]
    fn register_waiter_on_already_resolved_returns_immediately() {
        let mut t = ImportsTable::new();
        t.acquire(1);
        t.resolve(1, Value::Bool(true)).unwrap();
        let rx = t.register_waiter(1).unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap(), Value::Bool(true));
    }

    #[test]
    fn unknown_id_is_a_table_error() {
        let mut t = ImportsTable::new();
        assert!(matches!(
            t.release_local(99, 1),
            Err(TableError::UnknownImport(99))
        ));
    }
}
