//! Evaluates an incoming `push` expression against this peer's Exports
//! Table and produces the `resolve`/`reject` payload.
//!
//! A push's expression is almost always a `pipeline` referencing a
//! capability we host (the main capability, or a capability exported
//! earlier, or the still-pending result slot of an earlier push in the
//! same flush). This module does the walk described in the protocol's
//! evaluation rules: resolve the root, walk the property path, invoke the
//! target if arguments are present.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;

use capnweb_wire::{PathSegment, Value};

use crate::error::RpcError;
use crate::exports::ExportsTable;
use crate::ids::{exports_key, imports_key, IdAllocator};
use crate::imports::ImportsTable;
use crate::target::{Dispatched, Target};

/// What a path walk is currently standing on: either a live capability, or
/// a plain value reached by property/index access.
enum Slot {
    Capability(Arc<dyn Target>),
    Value(Value),
}

/// Evaluates pushed expressions against the shared tables. Cheap to
/// clone; everything it touches is already behind `Arc`/`Mutex`.
#[derive(Clone)]
pub struct CallEngine {
    exports: Arc<Mutex<ExportsTable>>,
    imports: Arc<Mutex<ImportsTable>>,
    ids: Arc<IdAllocator>,
}

impl CallEngine {
    pub fn new(
        exports: Arc<Mutex<ExportsTable>>,
        imports: Arc<Mutex<ImportsTable>>,
        ids: Arc<IdAllocator>,
    ) -> Self {
        Self {
            exports,
            imports,
            ids,
        }
    }

    /// Evaluate a pushed expression to completion, returning the value (or
    /// capability) that becomes the payload of the matching
    /// `resolve`/`reject`.
    pub async fn evaluate(&self, expr: Value) -> Result<Dispatched, RpcError> {
        match expr {
            Value::Pipeline { id, path, args } => self.evaluate_pipeline(id, path, args).await,
            other => {
                self.acquire_capability_refs(&other);
                Ok(Dispatched::Value(other))
            }
        }
    }

    async fn evaluate_pipeline(
        &self,
        id: i64,
        path: Vec<PathSegment>,
        args: Option<Vec<Value>>,
    ) -> Result<Dispatched, RpcError> {
        let mut slot = self.resolve_root(id).await?;

        for (i, segment) in path.iter().enumerate() {
            let is_last = i + 1 == path.len();
            slot = match slot {
                Slot::Capability(target) => {
                    if is_last && args.is_some() {
                        // The final path segment names the method; defer
                        // the actual call to after the loop so we still
                        // have `args` by value.
                        Slot::Capability(target)
                    } else {
                        return Err(RpcError::bad_request(format!(
                            "cannot access property {segment} on a capability outside of a method call"
                        )));
                    }
                }
                Slot::Value(value) => Slot::Value(step_into(value, segment)?),
            };
        }

        match (slot, args) {
            (Slot::Capability(target), Some(args)) => {
                let method = match path.last() {
                    Some(PathSegment::Property(name)) => name.clone(),
                    Some(PathSegment::Index(_)) => {
                        return Err(RpcError::bad_request(
                            "a capability method name must be a property, not an index",
                        ));
                    }
                    None => {
                        return Err(RpcError::bad_request(
                            "a capability call requires a method name in the path",
                        ));
                    }
                };
                if crate::target::is_reserved_method(&method) {
                    return Err(RpcError::bad_request(format!(
                        "method {method:?} is reserved"
                    )));
                }
                let mut resolved_args = Vec::with_capacity(args.len());
                for arg in args {
                    let resolved = self.resolve_embedded_pipelines(arg).await?;
                    self.acquire_capability_refs(&resolved);
                    resolved_args.push(resolved);
                }
                target.dispatch(&method, resolved_args).await
            }
            (Slot::Capability(target), None) => Ok(Dispatched::Capability(target)),
            (Slot::Value(value), Some(_)) => Err(RpcError::bad_request(format!(
                "value {value:?} is not callable"
            ))),
            (Slot::Value(value), None) => {
                self.acquire_capability_refs(&value);
                Ok(Dispatched::Value(value))
            }
        }
    }

    /// Resolve the pipeline root id to either a live capability or an
    /// already-available value, suspending on `Pending` export slots.
    ///
    /// A negative id names a push result slot from earlier in the same
    /// flush (peer-minted, stored at its positive `imports_key`); a
    /// non-negative id names a capability we host (the main capability at
    /// `0`, or one we exported, both stored at their negative
    /// `exports_key`).
    async fn resolve_root(&self, id: i64) -> Result<Slot, RpcError> {
        let key = if id < 0 { imports_key(id) } else { exports_key(id) };
        let waiter = {
            let mut exports = self.exports.lock();
            match exports.capability(key) {
                Some(target) => return Ok(Slot::Capability(target)),
                None => {}
            }
            if !exports.contains(key) {
                return Err(RpcError::not_found(format!("unknown export {key}")));
            }
            exports.register_waiter(key).map_err(|e| {
                RpcError::internal(format!("table error resolving pipeline root: {e}"))
            })?
        };
        match waiter.await {
            Ok(value) => Ok(Slot::Value(value)),
            Err(recv_err) => Err(RpcError::internal(format!(
                "pipeline root dropped before resolving: {recv_err}"
            ))),
        }
        .and_then(|slot| match slot {
            Slot::Value(Value::Error(e)) => Err(e.into()),
            other => Ok(other),
        })
    }

    /// Resolve any `Value::Pipeline` embedded in an argument — a call
    /// pipelined off another not-yet-resolved push in the same flush —
    /// before the enclosing call is dispatched. Walks arrays and objects
    /// looking for nested pipelines; everything else passes through
    /// unchanged. Boxed because it recurses through an `async fn`.
    fn resolve_embedded_pipelines<'a>(
        &'a self,
        value: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + 'a>> {
        Box::pin(async move {
            match value {
                Value::Pipeline { id, path, args } => {
                    let dispatched = self.evaluate_pipeline(id, path, args).await?;
                    Ok(self.materialize(dispatched))
                }
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.resolve_embedded_pipelines(item).await?);
                    }
                    Ok(Value::Array(out))
                }
                Value::Object(pairs) => {
                    let mut out = Vec::with_capacity(pairs.len());
                    for (k, v) in pairs {
                        out.push((k, self.resolve_embedded_pipelines(v).await?));
                    }
                    Ok(Value::Object(out))
                }
                other => Ok(other),
            }
        })
    }

    /// Turn a dispatch outcome into a wire value usable in argument
    /// position: a plain value passes through, a capability is exported
    /// (reusing an existing export if we've already exported this exact
    /// pointer) and replaced with an `export` reference.
    fn materialize(&self, dispatched: Dispatched) -> Value {
        match dispatched {
            Dispatched::Value(v) => v,
            Dispatched::Capability(target) => {
                let mut exports = self.exports.lock();
                if let Some(id) = exports.find_by_pointer(&target) {
                    exports.bump_refcount(id, 1);
                    Value::Export(id)
                } else {
                    let id = self.ids.alloc_export();
                    exports.insert_capability(id, target);
                    Value::Export(id)
                }
            }
        }
    }

    /// Walk a data value for any embedded capability references and bump
    /// their table refcounts; the call engine hands `Target::dispatch`
    /// the raw wire value, it does not materialize stubs on its behalf
    /// (see `Session::import_stub` for that ergonomic layer).
    fn acquire_capability_refs(&self, value: &Value) {
        match value {
            Value::Export(id) => {
                self.imports.lock().acquire(imports_key(*id));
            }
            Value::Promise(id) => {
                self.imports.lock().acquire(imports_key(*id));
            }
            Value::Array(items) => {
                for item in items {
                    self.acquire_capability_refs(item);
                }
            }
            Value::Object(pairs) => {
                for (_, v) in pairs {
                    self.acquire_capability_refs(v);
                }
            }
            Value::Pipeline { args, .. } => {
                if let Some(args) = args {
                    for a in args {
                        self.acquire_capability_refs(a);
                    }
                }
            }
            _ => {}
        }
    }
}

pub(crate) fn step_into(value: Value, segment: &PathSegment) -> Result<Value, RpcError> {
    match (value, segment) {
        (Value::Object(pairs), PathSegment::Property(key)) => pairs
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .ok_or_else(|| RpcError::not_found(format!("no property {key:?}"))),
        (Value::Array(items), PathSegment::Index(idx)) => {
            let idx = usize::try_from(*idx)
                .map_err(|_| RpcError::bad_request("negative array index in pipeline path"))?;
            items
                .into_iter()
                .nth(idx)
                .ok_or_else(|| RpcError::not_found(format!("array index {idx} out of range")))
        }
        (value, segment) => Err(RpcError::bad_request(format!(
            "cannot walk path segment {segment} into {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::DispatchFuture;

    struct Square;
    impl Target for Square {
        fn dispatch<'a>(&'a self, method: &'a str, args: Vec<Value>) -> DispatchFuture<'a> {
            Box::pin(async move {
                if method != "square" {
                    return Err(RpcError::not_found(format!("no method {method:?}")));
                }
                let n = args.first().and_then(Value::as_i64).unwrap_or(0);
                Ok(Dispatched::value(Value::Integer(n * n)))
            })
        }
    }

    fn engine_with_main() -> CallEngine {
        let mut exports = ExportsTable::new();
        exports.insert_capability(0, Arc::new(Square));
        CallEngine::new(
            Arc::new(Mutex::new(exports)),
            Arc::new(Mutex::new(ImportsTable::new())),
            Arc::new(IdAllocator::new()),
        )
    }

    #[tokio::test]
    async fn calls_main_capability_method() {
        let engine = engine_with_main();
        let expr = Value::Pipeline {
            id: 0,
            path: vec![PathSegment::Property("square".into())],
            args: Some(vec![Value::Integer(5)]),
        };
        match engine.evaluate(expr).await.unwrap() {
            Dispatched::Value(Value::Integer(25)) => {}
            _ => panic!("expected 25"),
        }
    }

    #[tokio::test]
    async fn unknown_export_is_not_found() {
        let engine = engine_with_main();
        let expr = Value::Pipeline {
            id: 99,
            path: vec![PathSegment::Property("x".into())],
            args: None,
        };
        let err = engine.evaluate(expr).await.unwrap_err();
        assert_eq!(err.kind, capnweb_wire::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn pipelines_off_a_pending_slot() {
        let mut exports = ExportsTable::new();
        exports.insert_capability(0, Arc::new(Square));
        // A peer-minted push `-1` lands at our positive `imports_key(-1)`.
        exports.insert_pending(imports_key(-1));
        let exports = Arc::new(Mutex::new(exports));
        let engine = CallEngine::new(
            exports.clone(),
            Arc::new(Mutex::new(ImportsTable::new())),
            Arc::new(IdAllocator::new()),
        );

        let expr = Value::Pipeline {
            id: -1,
            path: vec![PathSegment::Property("name".into())],
            args: None,
        };
        let handle = tokio::spawn({
            let engine = engine.clone();
            async move { engine.evaluate(expr).await }
        });

        exports
            .lock()
            .resolve(
                imports_key(-1),
                Value::Object(vec![("name".into(), Value::String("alice".into()))]),
            )
            .unwrap();

        match handle.await.unwrap().unwrap() {
            Dispatched::Value(Value::String(s)) => assert_eq!(s, "alice"),
            _ => panic!("expected \"alice\""),
        }
    }
}
