//! The Exports Table: capabilities and pending push results we host that
//! the peer (or our own in-flight pipelining) holds references to.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use capnweb_wire::Value;

use crate::error::{RpcError, TableError};
use crate::target::Target;

#[derive(Clone)]
pub enum ExportState {
    /// A locally-hosted capability object, callable by the peer.
    Capability(Arc<dyn Target>),
    /// The result slot of a push we're still evaluating. Other pushes in
    /// the same flush may pipeline off this id before it resolves.
    Pending,
    Resolved(Value),
    Rejected(RpcError),
}

struct ExportEntry {
    refcount: u32,
    state: ExportState,
    waiters: Vec<oneshot::Sender<Result<Value, RpcError>>>,
}

/// Tracks every id this peer exports: capability objects handed to the
/// peer, and result slots of pushes the peer sent us that we're
/// evaluating.
#[derive(Default)]
pub struct ExportsTable {
    entries: HashMap<i64, ExportEntry>,
}

impl ExportsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export a brand-new capability at `id` with refcount 1. Used both
    /// for locally-minted capabilities and for push result slots created
    /// implicitly on receipt of a `push` frame.
    pub fn insert_capability(&mut self, id: i64, target: Arc<dyn Target>) {
        self.entries.insert(
            id,
            ExportEntry {
                refcount: 1,
                state: ExportState::Capability(target),
                waiters: Vec::new(),
            },
        );
    }

    /// Create a Pending result slot at `id` (a push we just received).
    pub fn insert_pending(&mut self, id: i64) {
        self.entries.insert(
            id,
            ExportEntry {
                refcount: 1,
                state: ExportState::Pending,
                waiters: Vec::new(),
            },
        );
    }

    /// Re-sending an already-exported capability: bump the refcount
    /// (tracks the additional outstanding peer reference) and return the
    /// existing id. Identity is by `Arc` pointer equality, not structural
    /// equality — two distinct target objects that happen to be equal are
    /// still exported under distinct ids.
    pub fn find_by_pointer(&self, target: &Arc<dyn Target>) -> Option<i64> {
        self.entries.iter().find_map(|(id, e)| match &e.state {
            ExportState::Capability(t) if Arc::ptr_eq(t, target) => Some(*id),
            _ => None,
        })
    }

    pub fn bump_refcount(&mut self, id: i64, delta: u32) {
        if let Some(e) = self.entries.get_mut(&id) {
            e.refcount += delta;
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn capability(&self, id: i64) -> Option<Arc<dyn Target>> {
        match self.entries.get(&id).map(|e| &e.state) {
            Some(ExportState::Capability(t)) => Some(t.clone()),
            _ => None,
        }
    }

    /// A snapshot of `id`'s current state, for callers (the `pull`
    /// handler) that need to distinguish Pending/Resolved/Rejected/
    /// Capability without holding the table lock across the decision.
    pub fn state(&self, id: i64) -> Option<ExportState> {
        self.entries.get(&id).map(|e| e.state.clone())
    }

    /// Register a one-shot waiter for a pending result slot's resolution.
    /// Used when a push's pipeline root references another, not-yet-
    /// resolved push from the same flush.
    pub fn register_waiter(
        &mut self,
        id: i64,
    ) -> Result<oneshot::Receiver<Result<Value, RpcError>>, TableError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(TableError::UnknownExport(id))?;
        let (tx, rx) = oneshot::channel();
        match &entry.state {
            ExportState::Pending => entry.waiters.push(tx),
            ExportState::Resolved(v) => {
                let _ = tx.send(Ok(v.clone()));
            }
            ExportState::Rejected(e) => {
                let _ = tx.send(Err(e.clone()));
            }
            ExportState::Capability(_) => {
                // A capability reached by pipeline is immediately
                // "resolved" to itself; callers go through `capability`
                // instead, this path only matters for Pending slots.
            }
        }
        Ok(rx)
    }

    pub fn resolve(&mut self, id: i64, value: Value) -> Result<(), TableError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(TableError::UnknownExport(id))?;
        if !matches!(entry.state, ExportState::Pending) {
            return Err(TableError::DoubleResolve(id));
        }
        entry.state = ExportState::Resolved(value.clone());
        for waiter in entry.waiters.drain(..) {
            let _ = waiter.send(Ok(value.clone()));
        }
        Ok(())
    }

    pub fn reject(&mut self, id: i64, error: RpcError) -> Result<(), TableError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(TableError::UnknownExport(id))?;
        if !matches!(entry.state, ExportState::Pending) {
            return Err(TableError::DoubleResolve(id));
        }
        entry.state = ExportState::Rejected(error.clone());
        for waiter in entry.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        Ok(())
    }

    /// Inbound `release(id, delta)` from the peer. Returns the disposed
    /// target if refcount just hit zero and it was a capability (the
    /// caller invokes `Target::dispose` outside the table lock).
    pub fn release_inbound(
        &mut self,
        id: i64,
        delta: u32,
    ) -> Result<Option<Arc<dyn Target>>, TableError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(TableError::UnknownExport(id))?;
        if delta > entry.refcount {
            return Err(TableError::OverRelease(id));
        }
        entry.refcount -= delta;
        if entry.refcount == 0 {
            let removed = self.entries.remove(&id).unwrap();
            return Ok(match removed.state {
                ExportState::Capability(t) => Some(t),
                _ => None,
            });
        }
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tear down every entry at once: wakes any remaining waiters with
    /// `error` and returns every still-live capability for disposal.
    /// Used when a session dies and the teardown sweep (fail imports →
    /// dispose exports → close transport) reaches the exports half.
    pub fn drain_all(&mut self, error: &RpcError) -> Vec<Arc<dyn Target>> {
        let mut disposable = Vec::new();
        for (_, entry) in self.entries.drain() {
            for waiter in entry.waiters {
                let _ = waiter.send(Err(error.clone()));
            }
            if let ExportState::Capability(target) = entry.state {
                disposable.push(target);
            }
        }
        disposable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;

    struct Noop;
    impl Target for Noop {
        fn dispatch<'a>(
            &'a self,
            _method: &'a str,
            _args: Vec<Value>,
        ) -> Pin<Box<dyn Future<Output = Result<crate::target::Dispatched, RpcError>> + Send + 'a>>
        {
            Box::pin(async { Ok(crate::target::Dispatched::value(Value::Undefined)) })
        }
    }

    #[test]
    fn reexporting_same_pointer_is_found_and_bumped() {
        let mut t = ExportsTable::new();
        let target: Arc<dyn Target> = Arc::new(Noop);
        t.insert_capability(-1, target.clone());
        assert_eq!(t.find_by_pointer(&target), Some(-1));
        t.bump_refcount(-1, 1);
        assert!(t.release_inbound(-1, 1).unwrap().is_none());
        assert!(t.contains(-1));
        assert!(t.release_inbound(-1, 1).unwrap().is_some());
        assert!(!t.contains(-1));
    }

    #[test]
    fn pending_slot_resolves_and_wakes_waiters() {
        let mut t = ExportsTable::new();
        t.insert_pending(-1);
        let rx = t.register_waiter(-1).unwrap();
        t.resolve(-1, Value::Integer(25)).unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap(), Value::Integer(25));
    }

    #[test]
    fn over_release_is_a_table_error() {
        let mut t = ExportsTable::new();
        let target: Arc<dyn Target> = Arc::new(Noop);
        t.insert_capability(-1, target);
        assert!(matches!(
            t.release_inbound(-1, 5),
            Err(TableError::OverRelease(-1))
        ));
    }

    #[test]
    fn unknown_export_release_is_an_error() {
        let mut t = ExportsTable::new();
        assert!(matches!(
            t.release_inbound(-5, 1),
            Err(TableError::UnknownExport(-5))
        ));
    }

    #[test]
    fn drain_all_wakes_waiters_and_returns_capabilities_for_disposal() {
        let mut t = ExportsTable::new();
        t.insert_capability(-1, Arc::new(Noop));
        t.insert_pending(-2);
        let rx = t.register_waiter(-2).unwrap();

        let disposed = t.drain_all(&RpcError::canceled("session closed"));

        assert_eq!(disposed.len(), 1);
        assert!(rx.try_recv().unwrap().is_err());
        assert!(t.is_empty());
    }
}
