//! The capability-target contract exposed to application code, plus the
//! default name-dispatching registry that avoids hand-written `match`
//! blocks for static-dispatch-style implementations.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use capnweb_wire::Value;

use crate::error::RpcError;

/// What a successful dispatch produces: a plain value, or a new
/// capability the caller should export and hand back a reference to.
#[derive(Clone)]
pub enum Dispatched {
    Value(Value),
    Capability(Arc<dyn Target>),
}

impl Dispatched {
    pub fn value(v: impl Into<Value>) -> Self {
        Dispatched::Value(v.into())
    }

    pub fn capability(target: Arc<dyn Target>) -> Self {
        Dispatched::Capability(target)
    }
}

impl From<Value> for Dispatched {
    fn from(v: Value) -> Self {
        Dispatched::Value(v)
    }
}

pub type DispatchFuture<'a> = Pin<Box<dyn Future<Output = Result<Dispatched, RpcError>> + Send + 'a>>;

/// A capability target: the single seam application code implements. The
/// call engine resolves a wire pipeline down to a target and a method
/// name, materializes arguments, and awaits `dispatch`.
///
/// Method name `dispose` is reserved for lifecycle and never reaches
/// `dispatch` through the normal call path (the exports table invokes it
/// directly when refcount hits zero). Names beginning with `_` are
/// rejected by the call engine before `dispatch` is ever called.
pub trait Target: Send + Sync + 'static {
    fn dispatch<'a>(&'a self, method: &'a str, args: Vec<Value>) -> DispatchFuture<'a>;

    /// Invoked at-most-once when this target's export refcount reaches
    /// zero. The default no-op is correct for targets with nothing to
    /// release; stateful targets (holding a file handle, a subscription)
    /// override it. Errors are logged and swallowed by the exports table,
    /// never surfaced to the peer.
    fn dispose<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}

/// True for method names the call engine refuses to route to
/// `Target::dispatch`: `dispose` (lifecycle, handled separately) and
/// anything starting with `_` (reserved).
pub fn is_reserved_method(name: &str) -> bool {
    name == "dispose" || name == "dispatch" || name.starts_with('_')
}

type BoxedHandler = Arc<
    dyn for<'a> Fn(&'a [Value]) -> Pin<Box<dyn Future<Output = Result<Dispatched, RpcError>> + Send + 'a>>
        + Send
        + Sync,
>;

/// A name-to-handler registry for targets that would rather register
/// plain async closures than hand-write a `match` in `dispatch`. Built
/// once at construction time, the same shape as a method-name-to-handler
/// table elsewhere in this codebase's service registry.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<&'static str, BoxedHandler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `name`. Panics if `name` is reserved or
    /// already registered — both are programmer errors caught at
    /// construction time, not at call time.
    pub fn register<F, Fut>(mut self, name: &'static str, handler: F) -> Self
    where
        F: for<'a> Fn(&'a [Value]) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Dispatched, RpcError>> + Send + 'static,
    {
        assert!(
            !is_reserved_method(name),
            "method name {name:?} is reserved and cannot be registered"
        );
        assert!(
            !self.handlers.contains_key(name),
            "method {name:?} already registered"
        );
        self.handlers
            .insert(name, Arc::new(move |args| Box::pin(handler(args))));
        self
    }

    pub async fn dispatch(&self, method: &str, args: Vec<Value>) -> Result<Dispatched, RpcError> {
        match self.handlers.get(method) {
            Some(handler) => handler(&args).await,
            None => Err(RpcError::not_found(format!("no method {method:?}"))),
        }
    }
}

/// A target built from a [`Dispatcher`]. The common case for application
/// code that would rather register handlers than implement `Target`
/// directly.
pub struct RegisteredTarget {
    dispatcher: Dispatcher,
}

impl RegisteredTarget {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl Target for RegisteredTarget {
    fn dispatch<'a>(&'a self, method: &'a str, args: Vec<Value>) -> DispatchFuture<'a> {
        Box::pin(async move { self.dispatcher.dispatch(method, args).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatcher_routes_by_name() {
        let dispatcher = Dispatcher::new().register("square", |args| async move {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Dispatched::value(Value::Integer(n * n)))
        });
        let target = RegisteredTarget::new(dispatcher);
        let out = target
            .dispatch("square", vec![Value::Integer(5)])
            .await
            .unwrap();
        match out {
            Dispatched::Value(Value::Integer(25)) => {}
            _ => panic!("expected 25"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let target = RegisteredTarget::new(Dispatcher::new());
        let err = target.dispatch("nope", vec![]).await.unwrap_err();
        assert_eq!(err.kind, capnweb_wire::ErrorKind::NotFound);
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn registering_reserved_name_panics() {
        let _ = Dispatcher::new().register("dispose", |_| async { unreachable!() });
    }
}
