//! Top-level frame encode/decode: `push` / `pull` / `resolve` / `reject` /
//! `release` / `abort`. Built directly on [`capnweb_wire`]'s `Value`
//! codec — a message is just a small fixed-shape JSON array whose payload
//! positions are themselves wire values.

use capnweb_wire::{JsonValue, Value, WireError};
use capnweb_wire::{from_json, to_json};
use capnweb_wire::{DecodeError, EncodeError};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Sender asserts a computation that will yield a value at
    /// `export_id` (negative, from the sender's own id space).
    Push { export_id: i64, expr: Value },
    /// Sender requests resolution of a previously pushed result.
    Pull { import_id: i64 },
    /// Sender supplies the resolved value for `export_id`.
    Resolve { export_id: i64, value: Value },
    /// Sender reports failure for `export_id`.
    Reject { export_id: i64, error: WireError },
    /// Sender drops `refcount_delta` references to `import_id`.
    Release { import_id: i64, refcount_delta: u32 },
    /// Session-level fatal error; both sides tear down after this frame.
    Abort { error: WireError },
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("message must be a JSON array")]
    NotAnArray,
    #[error("empty message")]
    Empty,
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("message type {ty:?} expects {expected} element(s), got {got}")]
    WrongArity {
        ty: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("message type {ty:?} expected a {expected} at position {pos}")]
    WrongShape {
        ty: &'static str,
        pos: usize,
        expected: &'static str,
    },
}

impl Message {
    pub fn to_json(&self) -> Result<JsonValue, MessageError> {
        let arr = match self {
            Message::Push { export_id, expr } => vec![
                JsonValue::String("push".into()),
                JsonValue::Number((*export_id).into()),
                to_json(expr)?,
            ],
            Message::Pull { import_id } => vec![
                JsonValue::String("pull".into()),
                JsonValue::Number((*import_id).into()),
            ],
            Message::Resolve { export_id, value } => vec![
                JsonValue::String("resolve".into()),
                JsonValue::Number((*export_id).into()),
                to_json(value)?,
            ],
            Message::Reject { export_id, error } => vec![
                JsonValue::String("reject".into()),
                JsonValue::Number((*export_id).into()),
                to_json(&Value::Error(error.clone()))?,
            ],
            Message::Release {
                import_id,
                refcount_delta,
            } => vec![
                JsonValue::String("release".into()),
                JsonValue::Number((*import_id).into()),
                JsonValue::Number((*refcount_delta).into()),
            ],
            Message::Abort { error } => vec![
                JsonValue::String("abort".into()),
                to_json(&Value::Error(error.clone()))?,
            ],
        };
        Ok(JsonValue::Array(arr))
    }

    pub fn encode_to_string(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(&self.to_json()?).map_err(EncodeError::Json)?)
    }

    pub fn from_json(json: &JsonValue) -> Result<Message, MessageError> {
        let elements = match json {
            JsonValue::Array(elements) => elements,
            _ => return Err(MessageError::NotAnArray),
        };
        let ty = match elements.first() {
            Some(JsonValue::String(s)) => s.as_str(),
            _ => return Err(MessageError::Empty),
        };
        match ty {
            "push" => {
                expect_len("push", elements, 3)?;
                Ok(Message::Push {
                    export_id: expect_int("push", elements, 1)?,
                    expr: from_json(&elements[2])?,
                })
            }
            "pull" => {
                expect_len("pull", elements, 2)?;
                Ok(Message::Pull {
                    import_id: expect_int("pull", elements, 1)?,
                })
            }
            "resolve" => {
                expect_len("resolve", elements, 3)?;
                Ok(Message::Resolve {
                    export_id: expect_int("resolve", elements, 1)?,
                    value: from_json(&elements[2])?,
                })
            }
            "reject" => {
                expect_len("reject", elements, 3)?;
                let error = expect_error("reject", &elements[2])?;
                Ok(Message::Reject {
                    export_id: expect_int("reject", elements, 1)?,
                    error,
                })
            }
            "release" => {
                expect_len("release", elements, 3)?;
                let delta = expect_int("release", elements, 2)?;
                if delta < 0 {
                    return Err(MessageError::WrongShape {
                        ty: "release",
                        pos: 2,
                        expected: "non-negative integer",
                    });
                }
                Ok(Message::Release {
                    import_id: expect_int("release", elements, 1)?,
                    refcount_delta: delta as u32,
                })
            }
            "abort" => {
                expect_len("abort", elements, 2)?;
                Ok(Message::Abort {
                    error: expect_error("abort", &elements[1])?,
                })
            }
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }

    pub fn decode_from_str(s: &str) -> Result<Message, MessageError> {
        let json: JsonValue = serde_json::from_str(s).map_err(DecodeError::Json)?;
        Self::from_json(&json)
    }
}

fn expect_len(ty: &'static str, elements: &[JsonValue], n: usize) -> Result<(), MessageError> {
    if elements.len() != n {
        return Err(MessageError::WrongArity {
            ty,
            expected: match n {
                2 => "2",
                3 => "3",
                _ => "?",
            },
            got: elements.len(),
        });
    }
    Ok(())
}

fn expect_int(ty: &'static str, elements: &[JsonValue], pos: usize) -> Result<i64, MessageError> {
    match elements.get(pos).and_then(JsonValue::as_i64) {
        Some(i) => Ok(i),
        None => Err(MessageError::WrongShape {
            ty,
            pos,
            expected: "integer",
        }),
    }
}

fn expect_error(ty: &'static str, json: &JsonValue) -> Result<WireError, MessageError> {
    match from_json(json)? {
        Value::Error(e) => Ok(e),
        _ => Err(MessageError::WrongShape {
            ty,
            pos: 1,
            expected: "error special form",
        }),
    }
}
