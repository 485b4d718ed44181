//! Error-handling conformance: in-band `reject` for application errors
//! (§8 scenario e), and the protocol-violation cases that must be fatal
//! to the whole session rather than surfaced as an ordinary rejection.

use std::sync::Arc;

use capnweb_core::{Dispatched, Dispatcher, ErrorKind, RegisteredTarget, RpcError};
use capnweb_testkit::{NullTarget, SessionPair};
use capnweb_wire::Value;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Scenario (e): `throwError()` rejects with a structured `internal`
/// error, surfaced at the awaiter as an `RpcError`, not a transport
/// failure.
#[tokio::test]
async fn scenario_e_application_error_becomes_reject() {
    init_tracing();
    let dispatcher = Dispatcher::new().register("throwError", |_args| async move {
        Err(RpcError::internal("boom"))
    });
    let pair = SessionPair::new(
        Arc::new(NullTarget),
        Arc::new(RegisteredTarget::new(dispatcher)),
    );

    let err = pair.call("throwError", vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
    assert_eq!(err.message, "boom");
    pair.close().await;
}

#[tokio::test]
async fn unknown_method_is_not_found_not_a_session_failure() {
    init_tracing();
    let pair = SessionPair::new(Arc::new(NullTarget), Arc::new(RegisteredTarget::new(Dispatcher::new())));
    let err = pair.call("nope", vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    // The session itself is still usable after an ordinary rejection.
    let err2 = pair.call("stillNope", vec![]).await.unwrap_err();
    assert_eq!(err2.kind, ErrorKind::NotFound);
    pair.close().await;
}

#[tokio::test]
async fn reserved_method_names_are_rejected_before_dispatch() {
    init_tracing();
    let dispatcher = Dispatcher::new();
    let pair = SessionPair::new(
        Arc::new(NullTarget),
        Arc::new(RegisteredTarget::new(dispatcher)),
    );
    let err = pair.call("_private", vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);

    let err = pair.call("dispose", vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
    pair.close().await;
}

#[tokio::test]
async fn bad_path_into_a_scalar_is_bad_request() {
    init_tracing();
    // `echo(5).name` — walking a property path into an integer result.
    let dispatcher = Dispatcher::new().register("echo", |args| async move {
        Ok(Dispatched::Value(args.into_iter().next().unwrap_or(Value::Undefined)))
    });
    let pair = SessionPair::new(
        Arc::new(NullTarget),
        Arc::new(RegisteredTarget::new(dispatcher)),
    );

    let stub = pair.client.main_stub();
    let result = stub
        .property("echo")
        .call(vec![Value::Integer(5)])
        .property("name")
        .resolve()
        .await;
    assert_eq!(result.unwrap_err().kind, ErrorKind::BadRequest);
    pair.close().await;
}

#[tokio::test]
async fn out_of_range_array_index_is_not_found() {
    init_tracing();
    let dispatcher = Dispatcher::new().register("echo", |args| async move {
        Ok(Dispatched::Value(args.into_iter().next().unwrap_or(Value::Undefined)))
    });
    let pair = SessionPair::new(
        Arc::new(NullTarget),
        Arc::new(RegisteredTarget::new(dispatcher)),
    );

    let stub = pair.client.main_stub();
    let result = stub
        .property("echo")
        .call(vec![Value::Array(vec![Value::Integer(1)])])
        .index(5)
        .resolve()
        .await;
    assert_eq!(result.unwrap_err().kind, ErrorKind::NotFound);
    pair.close().await;
}
