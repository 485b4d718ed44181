//! Wires two [`RpcSession`]s together over an in-process [`MemTransport`]
//! pair, the way a unit test or the conformance suite wants a session
//! without a real socket.

use std::sync::Arc;

use capnweb_core::{RpcError, RpcSession, SessionConfig, Target};
use capnweb_transport::MemTransport;

/// A client/server pair of sessions joined by an in-process transport.
/// Both sides are fully driven — each has its own read loop running as a
/// background task, exactly as it would over a real socket.
pub struct SessionPair {
    pub client: RpcSession<MemTransport>,
    pub server: RpcSession<MemTransport>,
}

impl SessionPair {
    /// Build a pair with the given main capabilities and default
    /// session configuration on both ends.
    pub fn new(client_main: Arc<dyn Target>, server_main: Arc<dyn Target>) -> Self {
        Self::with_config(
            client_main,
            server_main,
            SessionConfig::default(),
            SessionConfig::default(),
        )
    }

    pub fn with_config(
        client_main: Arc<dyn Target>,
        server_main: Arc<dyn Target>,
        client_config: SessionConfig,
        server_config: SessionConfig,
    ) -> Self {
        let (client_transport, server_transport) = MemTransport::pair();
        let client = RpcSession::new(Arc::new(client_transport), client_main, client_config);
        let server = RpcSession::new(Arc::new(server_transport), server_main, server_config);
        Self { client, server }
    }

    /// Call a method on the server's main capability from the client.
    pub async fn call(&self, method: &str, args: Vec<capnweb_wire::Value>) -> Result<capnweb_wire::Value, RpcError> {
        self.client.call(0, method, args).await
    }

    pub async fn drain(&self) {
        self.client.drain().await;
        self.server.drain().await;
    }

    pub async fn close(&self) {
        self.client.close().await;
        self.server.close().await;
    }
}

/// A [`Target`] with no methods, for the side of a pair that only
/// receives calls and never needs to expose its own capability.
pub struct NullTarget;

impl Target for NullTarget {
    fn dispatch<'a>(
        &'a self,
        method: &'a str,
        _args: Vec<capnweb_wire::Value>,
    ) -> capnweb_core::DispatchFuture<'a> {
        let method = method.to_string();
        Box::pin(async move { Err(RpcError::not_found(format!("no method {method:?}"))) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capnweb_core::{Dispatched, Dispatcher, RegisteredTarget};
    use capnweb_wire::Value;

    fn squarer() -> Arc<dyn Target> {
        let dispatcher = Dispatcher::new().register("square", |args| async move {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Dispatched::value(Value::Integer(n * n)))
        });
        Arc::new(RegisteredTarget::new(dispatcher))
    }

    #[tokio::test]
    async fn pair_round_trips_a_call() {
        let pair = SessionPair::new(Arc::new(NullTarget), squarer());
        let result = pair.call("square", vec![Value::Integer(6)]).await.unwrap();
        assert_eq!(result, Value::Integer(36));
        pair.close().await;
    }
}
