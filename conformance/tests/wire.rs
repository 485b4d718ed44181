//! Wire codec conformance: the escaping and special-form rules from the
//! protocol's data model (§3/§4.1), exercised both as standalone codec
//! round trips and end-to-end through a live session.

use std::sync::Arc;

use capnweb_core::{Dispatched, Dispatcher, RegisteredTarget};
use capnweb_testkit::{NullTarget, SessionPair};
use capnweb_wire::{decode_from_str, encode_to_string, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn plain_array_is_always_double_wrapped() {
    let v = Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    assert_eq!(encode_to_string(&v).unwrap(), "[[1,2,3]]");
}

#[test]
fn bare_array_on_the_wire_is_rejected() {
    // Neither the `[[...]]` escape nor a recognized tag: a bare `[1,2,3]`
    // is a protocol error, not a plain array.
    assert!(decode_from_str("[1,2,3]").is_err());
}

#[test]
fn null_and_undefined_stay_distinct() {
    assert_eq!(decode_from_str("null").unwrap(), Value::Null);
    assert_eq!(decode_from_str(r#"["undefined"]"#).unwrap(), Value::Undefined);
    assert_ne!(Value::Null, Value::Undefined);
}

#[test]
fn integer_and_float_classes_do_not_collapse() {
    assert_eq!(encode_to_string(&Value::Integer(5)).unwrap(), "5");
    assert_eq!(encode_to_string(&Value::Float(5.0)).unwrap(), "5.0");
    assert_eq!(decode_from_str("5").unwrap(), Value::Integer(5));
    assert_eq!(decode_from_str("5.0").unwrap(), Value::Float(5.0));
}

#[test]
fn non_finite_floats_never_appear_as_bare_numbers() {
    for (v, wire) in [
        (Value::Float(f64::NAN), r#"["nan"]"#),
        (Value::Float(f64::INFINITY), r#"["inf"]"#),
        (Value::Float(f64::NEG_INFINITY), r#"["-inf"]"#),
    ] {
        assert_eq!(encode_to_string(&v).unwrap(), wire);
    }
}

/// Scenario (f): `echo([1,2,3])` round-trips through a live session with
/// the wire args escaped as `[[[1,2,3]]]` and the response decoding back
/// to the original plain array.
#[tokio::test]
async fn scenario_f_echo_array_escaping() {
    init_tracing();
    let dispatcher = Dispatcher::new().register("echo", |args| async move {
        Ok(Dispatched::Value(args.first().cloned().unwrap_or(Value::Undefined)))
    });
    let pair = SessionPair::new(
        Arc::new(NullTarget),
        Arc::new(RegisteredTarget::new(dispatcher)),
    );

    let echoed = pair
        .call(
            "echo",
            vec![Value::Array(vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(3),
            ])],
        )
        .await
        .unwrap();

    assert_eq!(
        echoed,
        Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)])
    );
    pair.close().await;
}

#[tokio::test]
async fn bytes_date_bigint_survive_a_live_round_trip() {
    init_tracing();
    let dispatcher = Dispatcher::new().register("echo", |args| async move {
        Ok(Dispatched::Value(args.first().cloned().unwrap_or(Value::Undefined)))
    });
    let pair = SessionPair::new(
        Arc::new(NullTarget),
        Arc::new(RegisteredTarget::new(dispatcher)),
    );

    for v in [
        Value::Bytes(vec![0, 1, 2, 255]),
        Value::Date(1_700_000_000_000),
        Value::BigInt("123456789012345678901234567890".into()),
    ] {
        let echoed = pair.call("echo", vec![v.clone()]).await.unwrap();
        assert_eq!(echoed, v);
    }
    pair.close().await;
}
