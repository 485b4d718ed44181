//! Ties the tables, call engine, and a [`Transport`] together into a
//! running session: one read loop consuming frames in order, dispatching
//! each to the right table or to the call engine, and a write path shared
//! by both the stub layer's batched flushes and the call engine's
//! immediate resolve/reject replies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use capnweb_wire::{Value, WireError};

use crate::call_engine::CallEngine;
use crate::config::SessionConfig;
use crate::error::{RpcError, SessionError};
use crate::exports::{ExportState, ExportsTable};
use crate::ids::{exports_key, imports_key, IdAllocator};
use crate::imports::ImportsTable;
use crate::message::Message;
use crate::stub::{Stub, StubBackend};
use crate::target::{Dispatched, Target};
use crate::transport::Transport;

/// A live, symmetric Cap'n Web session over one transport connection.
pub struct RpcSession<T: Transport> {
    shared: Arc<SessionShared<T>>,
}

struct SessionShared<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    ids: Arc<IdAllocator>,
    exports: Arc<Mutex<ExportsTable>>,
    imports: Arc<Mutex<ImportsTable>>,
    call_engine: CallEngine,
    pending: Mutex<Vec<Message>>,
    write_gate: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    self_weak: Weak<SessionShared<T>>,
    span: tracing::Span,
}

impl<T: Transport> RpcSession<T> {
    /// Start a session over `transport`, exposing `main` as the bootstrap
    /// capability at id 0. Spawns the read loop immediately.
    pub fn new(transport: Arc<T>, main: Arc<dyn Target>, config: SessionConfig) -> Self {
        let mut exports_table = ExportsTable::new();
        exports_table.insert_capability(0, main);
        let exports = Arc::new(Mutex::new(exports_table));
        let imports = Arc::new(Mutex::new(ImportsTable::new()));
        let ids = Arc::new(IdAllocator::new());
        let call_engine = CallEngine::new(exports.clone(), imports.clone(), ids.clone());
        let span = tracing::info_span!("capnweb_session");

        let shared = Arc::new_cyclic(|weak| SessionShared {
            transport,
            config,
            ids,
            exports,
            imports,
            call_engine,
            pending: Mutex::new(Vec::new()),
            write_gate: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            self_weak: weak.clone(),
            span,
        });

        let reader = shared.clone();
        tokio::spawn(async move { reader.run_read_loop().await });

        RpcSession { shared }
    }

    /// A stub over the bootstrap capability.
    pub fn main_stub(&self) -> Stub<impl StubBackend> {
        Stub::main(self.shared.clone())
    }

    /// Export a locally-hosted capability (e.g. a callback) so it can be
    /// passed as an argument in a subsequent call. Re-exporting the same
    /// `Arc` pointer reuses its id and bumps the refcount rather than
    /// minting a second export, matching the wire codec's interning rule.
    pub fn export_capability(&self, target: Arc<dyn Target>) -> Value {
        self.shared.export_local_capability(target)
    }

    /// Convenience: call `method` on capability `cap_id` and await the
    /// result in one shot.
    pub async fn call(&self, cap_id: i64, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        let stub = Stub::from_import(self.shared.clone(), cap_id);
        stub.property(method).call(args).resolve().await
    }

    /// Wait until no imports remain outstanding (every in-flight call has
    /// resolved or rejected and every stub has been released).
    pub async fn drain(&self) {
        loop {
            if self.shared.imports.lock().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Tear down without waiting for in-flight work; pending awaiters fail
    /// with `canceled`.
    pub async fn close(&self) {
        self.shared
            .fail_session(RpcError::canceled("session closed locally"))
            .await;
    }
}

impl<T: Transport> SessionShared<T> {
    async fn run_read_loop(self: Arc<Self>) {
        use tracing::Instrument;
        let span = self.span.clone();
        self.run_read_loop_inner().instrument(span).await
    }

    async fn run_read_loop_inner(self: Arc<Self>) {
        tracing::info!("session read loop starting");
        loop {
            if self.closed.load(Ordering::Relaxed) {
                return;
            }
            let frame = match self.transport.recv_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "transport failed, failing session");
                    self.fail_session(RpcError::canceled(format!("transport error: {e}")))
                        .await;
                    return;
                }
            };
            tracing::debug!(bytes = frame.len(), "received frame");
            let message = match Message::decode_from_str(&frame) {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!(error = %e, "malformed frame, aborting session");
                    self.send_abort(WireError::bad_request(format!("malformed frame: {e}")))
                        .await;
                    self.fail_session(RpcError::internal(format!("malformed frame: {e}")))
                        .await;
                    return;
                }
            };
            if let Err(err) = self.handle_message(message).await {
                match err {
                    SessionError::AbortedByPeer(_) => return,
                    other => {
                        tracing::error!(error = %other, "protocol violation, aborting session");
                        self.send_abort(WireError::internal(other.to_string())).await;
                        self.fail_session(other.as_rpc_error()).await;
                        return;
                    }
                }
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, message: Message) -> Result<(), SessionError> {
        match message {
            Message::Push { export_id, expr } => {
                // `export_id` is the peer's own mint (negative, from its
                // `IdAllocator`). Our canonical key for the slot this push
                // fills is the positive `imports_key` space — disjoint from
                // the negative space our own `alloc_export()` mints into,
                // so a pending push result can never collide with a
                // capability we export ourselves.
                let pending_key = imports_key(export_id);
                {
                    let mut exports = self.exports.lock();
                    if exports.contains(pending_key) {
                        return Err(SessionError::Message(format!(
                            "duplicate push for export {export_id}"
                        )));
                    }
                    exports.insert_pending(pending_key);
                }
                let this = self.clone();
                tokio::spawn(async move {
                    this.evaluate_and_respond(export_id, pending_key, expr).await
                });
                Ok(())
            }
            Message::Pull { import_id } => {
                let key = imports_key(import_id);
                let wire_export_id = exports_key(import_id);
                let state = self.exports.lock().state(key);
                match state {
                    Some(ExportState::Resolved(value)) => {
                        let _ = self
                            .write_frames(vec![Message::Resolve {
                                export_id: wire_export_id,
                                value,
                            }])
                            .await;
                        Ok(())
                    }
                    Some(ExportState::Rejected(error)) => {
                        let _ = self
                            .write_frames(vec![Message::Reject {
                                export_id: wire_export_id,
                                error: error.into(),
                            }])
                            .await;
                        Ok(())
                    }
                    Some(ExportState::Pending) | Some(ExportState::Capability(_)) => {
                        tracing::trace!(id = key, "pull on a not-yet-settled export, no-op");
                        Ok(())
                    }
                    None => Err(SessionError::Message(format!("pull for unknown export {key}"))),
                }
            }
            Message::Resolve { export_id, value } => {
                let key = imports_key(export_id);
                self.imports
                    .lock()
                    .resolve(key, value)
                    .map_err(SessionError::Protocol)
            }
            Message::Reject { export_id, error } => {
                let key = imports_key(export_id);
                self.imports
                    .lock()
                    .reject(key, error.into())
                    .map_err(SessionError::Protocol)
            }
            Message::Release {
                import_id,
                refcount_delta,
            } => {
                // `import_id` can name either a capability we export
                // (negative-space key) or the result slot of a push the
                // peer sent us (positive-space key) — a release legitimately
                // targets either subspace, so try both.
                let cap_key = exports_key(import_id);
                let key = if self.exports.lock().contains(cap_key) {
                    cap_key
                } else {
                    imports_key(import_id)
                };
                match self.exports.lock().release_inbound(key, refcount_delta) {
                    Ok(Some(target)) => {
                        tokio::spawn(async move { target.dispose().await });
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(e) => Err(SessionError::Protocol(e)),
                }
            }
            Message::Abort { error } => {
                tracing::info!(%error, "peer aborted the session");
                self.fail_session(RpcError::from(error.clone())).await;
                Err(SessionError::AbortedByPeer(error.into()))
            }
        }
    }

    async fn evaluate_and_respond(self: Arc<Self>, export_id: i64, pending_key: i64, expr: Value) {
        let outcome = self.call_engine.evaluate(expr).await;
        let message = match outcome {
            Ok(Dispatched::Value(value)) => {
                if self.exports.lock().resolve(pending_key, value.clone()).is_err() {
                    return;
                }
                Message::Resolve {
                    export_id,
                    value,
                }
            }
            Ok(Dispatched::Capability(target)) => {
                let cap_id = self.ids.alloc_export();
                self.exports.lock().insert_capability(cap_id, target);
                let value = Value::Export(cap_id);
                if self.exports.lock().resolve(pending_key, value.clone()).is_err() {
                    return;
                }
                Message::Resolve {
                    export_id,
                    value,
                }
            }
            Err(mut error) => {
                if let Some(sanitizer) = &self.config.error_sanitizer {
                    sanitizer(&mut error);
                }
                if self.exports.lock().reject(pending_key, error.clone()).is_err() {
                    return;
                }
                Message::Reject {
                    export_id,
                    error: error.into(),
                }
            }
        };
        if let Err(e) = self.write_frames(vec![message]).await {
            tracing::warn!(error = %e, "failed to send push result");
        }
    }

    async fn write_frames(&self, messages: Vec<Message>) -> Result<(), RpcError> {
        if messages.is_empty() {
            return Ok(());
        }
        let _guard = self.write_gate.lock().await;
        for message in messages {
            let frame = message
                .encode_to_string()
                .map_err(|e| RpcError::internal(e.to_string()))?;
            self.transport
                .send_frame(frame)
                .await
                .map_err(|e| RpcError::internal(format!("transport write failed: {e}")))?;
        }
        Ok(())
    }

    fn export_local_capability(&self, target: Arc<dyn Target>) -> Value {
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

    async fn send_abort(&self, error: WireError) {
        let _ = self.write_frames(vec![Message::Abort { error }]).await;
    }

    /// Teardown sweep for a dying session: fail imports → dispose exports
    /// → close transport, in that order, so every pending awaiter and
    /// every locally-hosted capability gets a chance to react before the
    /// connection itself goes away.
    async fn fail_session(&self, error: RpcError) {
        self.closed.store(true, Ordering::Relaxed);
        self.imports.lock().fail_all(error.clone());
        let disposable = self.exports.lock().drain_all(&error);
        for target in disposable {
            target.dispose().await;
        }
        self.transport.close();
    }
}

#[async_trait]
impl<T: Transport> StubBackend for SessionShared<T> {
    fn alloc_export(&self) -> i64 {
        self.ids.alloc_export()
    }

    fn enqueue_push(&self, export_id: i64, expr: Value) {
        self.imports.lock().acquire(imports_key(export_id));
        self.pending.lock().push(Message::Push { export_id, expr });
    }

    fn enqueue_pull(&self, import_id: i64) {
        self.pending.lock().push(Message::Pull { import_id });
    }

    async fn flush_and_await(&self, import_key: i64) -> Result<Value, RpcError> {
        {
            let pending = self.pending.lock();
            if pending.len() > self.config.max_batch_size {
                return Err(RpcError::bad_request(format!(
                    "flush of {} messages exceeds max_batch_size {}",
                    pending.len(),
                    self.config.max_batch_size
                )));
            }
        }
        let waiter = self
            .imports
            .lock()
            .register_waiter(import_key)
            .map_err(|e| RpcError::internal(e.to_string()))?;
        let outgoing = std::mem::take(&mut *self.pending.lock());
        self.write_frames(outgoing).await?;

        match tokio::time::timeout(self.config.call_timeout, waiter).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::canceled("session closed before result arrived")),
            Err(_) => Err(RpcError::canceled("call timed out")),
        }
    }

    fn release_import(&self, id: i64, delta: u32) {
        let dropped_to_zero = match self.imports.lock().release_local(id, delta) {
            Ok(dropped) => dropped,
            Err(e) => {
                tracing::warn!(error = %e, "release of an unknown or over-released import");
                return;
            }
        };
        if dropped_to_zero {
            if let Some(strong) = self.self_weak.upgrade() {
                tokio::spawn(async move {
                    let _ = strong
                        .write_frames(vec![Message::Release {
                            import_id: id,
                            refcount_delta: delta,
                        }])
                        .await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Dispatcher, RegisteredTarget};
    use tokio::sync::{mpsc, Mutex as AsyncMutex};

    /// An in-process transport pairing two queues, enough to exercise a
    /// full session round trip without a real socket.
    struct ChannelTransport {
        outgoing: mpsc::UnboundedSender<String>,
        incoming: AsyncMutex<mpsc::UnboundedReceiver<String>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send_frame(&self, frame: String) -> Result<(), crate::transport::TransportError> {
            self.outgoing
                .send(frame)
                .map_err(|_| crate::transport::TransportError::Closed)
        }
        async fn recv_frame(&self) -> Result<String, crate::transport::TransportError> {
            self.incoming
                .lock()
                .await
                .recv()
                .await
                .ok_or(crate::transport::TransportError::Closed)
        }
        fn close(&self) {
            self.closed.store(true, Ordering::Relaxed);
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Relaxed)
        }
    }

    fn paired_transports() -> (Arc<ChannelTransport>, Arc<ChannelTransport>) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = Arc::new(ChannelTransport {
            outgoing: a_tx,
            incoming: AsyncMutex::new(a_rx),
            closed: AtomicBool::new(false),
        });
        let b = Arc::new(ChannelTransport {
            outgoing: b_tx,
            incoming: AsyncMutex::new(b_rx),
            closed: AtomicBool::new(false),
        });
        (a, b)
    }

    #[tokio::test]
    async fn square_round_trip() {
        let (client_transport, server_transport) = paired_transports();

        let dispatcher = Dispatcher::new().register("square", |args| async move {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Dispatched::value(Value::Integer(n * n)))
        });
        let server_main = Arc::new(RegisteredTarget::new(dispatcher));

        let _server = RpcSession::new(server_transport, server_main, SessionConfig::default());
        let client_main = Arc::new(RegisteredTarget::new(Dispatcher::new()));
        let client = RpcSession::new(client_transport, client_main, SessionConfig::default());

        let result = client.call(0, "square", vec![Value::Integer(5)]).await.unwrap();
        assert_eq!(result, Value::Integer(25));
    }
}
