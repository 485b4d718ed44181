//! Client-side capability handles: property access, method calls, and
//! pipelined chains reified as `push` expressions instead of executed
//! immediately.
//!
//! A [`Stub`] is cheap to clone and extend (`.property`/`.index`/`.call`
//! each return a new `Stub`); only `.resolve().await` ever touches the
//! network. Everything a `Stub` needs from the owning session — minting
//! export ids, enqueuing pushes/pulls, flushing, releasing imports — is
//! expressed through [`StubBackend`] so this module stays ignorant of how
//! the session actually schedules writes.

use std::sync::Arc;

use async_trait::async_trait;

use capnweb_wire::{PathSegment, Value};

use crate::call_engine::step_into;
use crate::error::RpcError;
use crate::ids::imports_key;

/// What [`Stub`] needs from the session that owns it.
#[async_trait]
pub trait StubBackend: Send + Sync + 'static {
    /// Mint a fresh negative export id for a call about to be enqueued.
    fn alloc_export(&self) -> i64;

    /// Queue a `push` for the next flush. Does not itself write to the
    /// transport.
    fn enqueue_push(&self, export_id: i64, expr: Value);

    /// Queue a `pull` for the next flush.
    fn enqueue_pull(&self, import_id: i64);

    /// Write every queued push/pull to the transport (coalesced into one
    /// flush) and await resolution of `import_key`, which must already
    /// have a table entry (created by whichever call minted it).
    async fn flush_and_await(&self, import_key: i64) -> Result<Value, RpcError>;

    /// Drop `delta` local references to import `id`. A `0` id (the main
    /// capability) is never released; callers filter it out before
    /// calling this.
    fn release_import(&self, id: i64, delta: u32);
}

enum Root {
    /// A capability the peer already told us about (or the implicit main
    /// capability at id 0), addressed by our own positive import key.
    Import(i64),
    /// The result slot of a push we ourselves enqueued, addressed by the
    /// literal negative export id we minted for it.
    PushResult(i64),
}

struct StubInner<B: StubBackend> {
    backend: Arc<B>,
    root: Root,
}

impl<B: StubBackend> Drop for StubInner<B> {
    fn drop(&mut self) {
        match self.root {
            Root::Import(0) => {}
            Root::Import(id) => self.backend.release_import(id, 1),
            Root::PushResult(export_id) => {
                self.backend.release_import(imports_key(export_id), 1);
            }
        }
    }
}

/// A handle wrapping an import, or a not-yet-awaited pipelined call
/// result, plus a property path to walk once the root resolves.
pub struct Stub<B: StubBackend> {
    inner: Arc<StubInner<B>>,
    path: Vec<PathSegment>,
}

impl<B: StubBackend> Clone for Stub<B> {
    fn clone(&self) -> Self {
        Stub {
            inner: self.inner.clone(),
            path: self.path.clone(),
        }
    }
}

impl<B: StubBackend> Stub<B> {
    /// The bootstrap capability, always available at id 0.
    pub fn main(backend: Arc<B>) -> Self {
        Self::from_import(backend, 0)
    }

    /// A stub over an already-known import id (e.g. a capability received
    /// as an `["export", id]`/`["import", id]` argument).
    pub fn from_import(backend: Arc<B>, id: i64) -> Self {
        Stub {
            inner: Arc::new(StubInner {
                backend,
                root: Root::Import(id),
            }),
            path: Vec::new(),
        }
    }

    /// Access a named property without invoking anything.
    pub fn property(&self, name: impl Into<String>) -> Self {
        self.extend(PathSegment::Property(name.into()))
    }

    /// Access an array index without invoking anything.
    pub fn index(&self, i: i64) -> Self {
        self.extend(PathSegment::Index(i))
    }

    fn extend(&self, segment: PathSegment) -> Self {
        let mut path = self.path.clone();
        path.push(segment);
        Stub {
            inner: self.inner.clone(),
            path,
        }
    }

    /// Invoke the method named by the stub's current path with `args`.
    /// Enqueues a `push` for a fresh export slot and returns a new stub
    /// rooted at that slot, itself pipelineable without awaiting.
    pub fn call(&self, args: Vec<Value>) -> Self {
        let pipeline_root = match self.inner.root {
            Root::Import(id) => id,
            Root::PushResult(id) => id,
        };
        let expr = Value::Pipeline {
            id: pipeline_root,
            path: self.path.clone(),
            args: Some(args),
        };
        let export_id = self.inner.backend.alloc_export();
        self.inner.backend.enqueue_push(export_id, expr);
        Stub {
            inner: Arc::new(StubInner {
                backend: self.inner.backend.clone(),
                root: Root::PushResult(export_id),
            }),
            path: Vec::new(),
        }
    }

    /// Reify this stub's root and path as a `Value::Pipeline` with no
    /// arguments, for use as an argument to another not-yet-flushed call —
    /// the call engine resolves such embedded pipelines against the
    /// referenced push's result slot before dispatching the enclosing
    /// call. Does not itself enqueue or flush anything.
    pub fn as_pipeline_arg(&self) -> Value {
        let pipeline_root = match self.inner.root {
            Root::Import(id) => id,
            Root::PushResult(id) => id,
        };
        Value::Pipeline {
            id: pipeline_root,
            path: self.path.clone(),
            args: None,
        }
    }

    /// Flush any enqueued work and await this stub's value.
    ///
    /// A plain import with a trailing path is walked locally after the
    /// pull, since the whole value is ours to inspect either way. A
    /// trailing path off a not-yet-awaited call result is instead reified
    /// as a follow-up pipeline push — pipelining off the pending slot
    /// rather than pulling the whole result and walking it here, which
    /// would error if the path happened to land on a capability.
    pub async fn resolve(self) -> Result<Value, RpcError> {
        match self.inner.root {
            Root::Import(id) => {
                self.inner.backend.enqueue_pull(id);
                let mut value = self.inner.backend.flush_and_await(id).await?;
                for segment in &self.path {
                    value = step_into(value, segment)?;
                }
                Ok(value)
            }
            Root::PushResult(export_id) if self.path.is_empty() => {
                let import_key = imports_key(export_id);
                self.inner.backend.enqueue_pull(import_key);
                self.inner.backend.flush_and_await(import_key).await
            }
            Root::PushResult(export_id) => {
                let follow_up = Value::Pipeline {
                    id: export_id,
                    path: self.path.clone(),
                    args: None,
                };
                let follow_up_id = self.inner.backend.alloc_export();
                self.inner.backend.enqueue_push(follow_up_id, follow_up);
                let import_key = imports_key(follow_up_id);
                self.inner.backend.enqueue_pull(import_key);
                let result = self.inner.backend.flush_and_await(import_key).await;
                self.inner.backend.release_import(import_key, 1);
                result
            }
        }
    }

    /// Explicitly release this stub's root reference instead of waiting
    /// for `Drop`. A no-op if other clones of the same root still exist.
    pub fn dispose(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        next_export: Mutex<i64>,
        pushes: Mutex<Vec<(i64, Value)>>,
        pulls: Mutex<Vec<i64>>,
        released: Mutex<Vec<(i64, u32)>>,
    }

    #[async_trait]
    impl StubBackend for FakeBackend {
        fn alloc_export(&self) -> i64 {
            let mut n = self.next_export.lock().unwrap();
            *n -= 1;
            *n
        }
        fn enqueue_push(&self, export_id: i64, expr: Value) {
            self.pushes.lock().unwrap().push((export_id, expr));
        }
        fn enqueue_pull(&self, import_id: i64) {
            self.pulls.lock().unwrap().push(import_id);
        }
        async fn flush_and_await(&self, _import_key: i64) -> Result<Value, RpcError> {
            Ok(Value::Integer(25))
        }
        fn release_import(&self, id: i64, delta: u32) {
            self.released.lock().unwrap().push((id, delta));
        }
    }

    #[tokio::test]
    async fn call_enqueues_push_and_resolves() {
        let backend = Arc::new(FakeBackend::default());
        let main = Stub::main(backend.clone());
        let result = main
            .property("square")
            .call(vec![Value::Integer(5)])
            .resolve()
            .await
            .unwrap();
        assert_eq!(result, Value::Integer(25));
        assert_eq!(backend.pushes.lock().unwrap().len(), 1);
        assert_eq!(backend.pulls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn as_pipeline_arg_reifies_root_and_path_without_flushing() {
        let backend = Arc::new(FakeBackend::default());
        let call_result = Stub::main(backend.clone())
            .property("getUser")
            .call(vec![Value::String("alice".into())]);

        let arg = call_result.property("id").as_pipeline_arg();

        assert_eq!(
            arg,
            Value::Pipeline {
                id: -1,
                path: vec![PathSegment::Property("id".into())],
                args: None,
            }
        );
        assert!(backend.pulls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropping_an_import_stub_releases_it() {
        let backend = Arc::new(FakeBackend::default());
        {
            let _s = Stub::from_import(backend.clone(), 7);
        }
        assert_eq!(*backend.released.lock().unwrap(), vec![(7, 1)]);
    }

    #[tokio::test]
    async fn dropping_main_stub_never_releases() {
        let backend = Arc::new(FakeBackend::default());
        {
            let _s = Stub::main(backend.clone());
        }
        assert!(backend.released.lock().unwrap().is_empty());
    }
}
