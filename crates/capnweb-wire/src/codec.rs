//! Translation between [`Value`] and the escaped JSON-array wire dialect.
//!
//! `serde_json::Value` is used as the textual JSON backend (it already
//! distinguishes integers from floats on parse via `serde_json::Number`,
//! and refuses to round-trip NaN/Infinity as bare numbers, which is
//! exactly the behavior the spec wants: non-finite floats are never
//! literal JSON numbers, only the `["inf"]`/`["-inf"]`/`["nan"]` tags).
//! Everything tag-shaped is hand-interpreted here; non-finite floats are
//! handled manually rather than delegated to a generic derive, since they
//! must never appear as bare JSON numbers.

use serde_json::{Map, Number, Value as JsonValue};

use crate::error::{DecodeError, EncodeError};
use crate::value::{ErrorKind, PathSegment, Value, WireError};

/// Encode a [`Value`] to its `serde_json::Value` wire representation.
pub fn to_json(value: &Value) -> Result<JsonValue, EncodeError> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Undefined => tag1("undefined"),
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Integer(i) => JsonValue::Number(Number::from(*i)),
        Value::Float(f) => {
            if f.is_nan() {
                tag1("nan")
            } else if f.is_infinite() {
                tag1(if *f > 0.0 { "inf" } else { "-inf" })
            } else {
                JsonValue::Number(
                    Number::from_f64(*f).ok_or(EncodeError::NonFiniteLeaked)?,
                )
            }
        }
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Array(items) => {
            let inner = items
                .iter()
                .map(to_json)
                .collect::<Result<Vec<_>, _>>()?;
            // Plain-array escape: wrap as the sole member of an outer array.
            JsonValue::Array(vec![JsonValue::Array(inner)])
        }
        Value::Object(pairs) => {
            let mut map = Map::with_capacity(pairs.len());
            for (k, v) in pairs {
                map.insert(k.clone(), to_json(v)?);
            }
            JsonValue::Object(map)
        }
        Value::Bytes(b) => tag2("bytes", JsonValue::String(base64_encode(b))),
        Value::Date(millis) => tag2("date", JsonValue::Number(Number::from(*millis))),
        Value::BigInt(s) => tag2("bigint", JsonValue::String(s.clone())),
        Value::Export(id) => tag2("export", JsonValue::Number(Number::from(*id))),
        Value::Import(id) => tag2("import", JsonValue::Number(Number::from(*id))),
        Value::Promise(id) => tag2("promise", JsonValue::Number(Number::from(*id))),
        Value::Pipeline { id, path, args } => {
            let mut arr = vec![
                JsonValue::String("pipeline".into()),
                JsonValue::Number(Number::from(*id)),
            ];
            if !path.is_empty() || args.is_some() {
                arr.push(encode_path(path));
            }
            if let Some(args) = args {
                arr.push(to_json(&Value::Array(args.clone()))?);
            }
            JsonValue::Array(arr)
        }
        Value::Error(err) => {
            let mut arr = vec![
                JsonValue::String("error".into()),
                JsonValue::String(err.kind.as_wire_str().to_string()),
                JsonValue::String(err.message.clone()),
            ];
            if let Some(data) = &err.data {
                arr.push(to_json(data)?);
            }
            JsonValue::Array(arr)
        }
    })
}

/// Encode a [`Value`] straight to a JSON string.
pub fn encode_to_string(value: &Value) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(&to_json(value)?)?)
}

fn encode_path(path: &[PathSegment]) -> JsonValue {
    JsonValue::Array(
        path.iter()
            .map(|seg| match seg {
                PathSegment::Property(p) => JsonValue::String(p.clone()),
                PathSegment::Index(i) => JsonValue::Number(Number::from(*i)),
            })
            .collect(),
    )
}

fn tag1(tag: &'static str) -> JsonValue {
    JsonValue::Array(vec![JsonValue::String(tag.to_string())])
}

fn tag2(tag: &'static str, v: JsonValue) -> JsonValue {
    JsonValue::Array(vec![JsonValue::String(tag.to_string()), v])
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s)
}

/// Decode a `serde_json::Value` wire tree into a [`Value`].
pub fn from_json(json: &JsonValue) -> Result<Value, DecodeError> {
    match json {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(b) => Ok(Value::Bool(*b)),
        JsonValue::Number(n) => Ok(decode_number(n)),
        JsonValue::String(s) => Ok(Value::String(s.clone())),
        JsonValue::Array(elements) => decode_array(elements),
        JsonValue::Object(map) => {
            let mut pairs = Vec::with_capacity(map.len());
            for (k, v) in map {
                pairs.push((k.clone(), from_json(v)?));
            }
            Ok(Value::Object(pairs))
        }
    }
}

/// Decode a JSON string into a [`Value`].
pub fn decode_from_str(s: &str) -> Result<Value, DecodeError> {
    let json: JsonValue = serde_json::from_str(s)?;
    from_json(&json)
}

fn decode_number(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Integer(i)
    } else if let Some(u) = n.as_u64() {
        if u <= i64::MAX as u64 {
            Value::Integer(u as i64)
        } else {
            Value::Float(u as f64)
        }
    } else {
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn decode_array(elements: &[JsonValue]) -> Result<Value, DecodeError> {
    if elements.len() == 1 {
        if let JsonValue::Array(inner) = &elements[0] {
            let items = inner
                .iter()
                .map(from_json)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::Array(items));
        }
    }

    let tag = match elements.first() {
        Some(JsonValue::String(s)) => s.as_str(),
        _ => return Err(DecodeError::BadArrayShape),
    };

    match tag {
        "undefined" => {
            expect_len(tag, elements, 1)?;
            Ok(Value::Undefined)
        }
        "inf" => {
            expect_len(tag, elements, 1)?;
            Ok(Value::Float(f64::INFINITY))
        }
        "-inf" => {
            expect_len(tag, elements, 1)?;
            Ok(Value::Float(f64::NEG_INFINITY))
        }
        "nan" => {
            expect_len(tag, elements, 1)?;
            Ok(Value::Float(f64::NAN))
        }
        "bytes" => {
            expect_len(tag, elements, 2)?;
            let s = expect_str(tag, elements, 1)?;
            Ok(Value::Bytes(base64_decode(s)?))
        }
        "date" => {
            expect_len(tag, elements, 2)?;
            Ok(Value::Date(expect_int(tag, elements, 1)?))
        }
        "bigint" => {
            expect_len(tag, elements, 2)?;
            Ok(Value::BigInt(expect_str(tag, elements, 1)?.to_string()))
        }
        "export" => {
            expect_len(tag, elements, 2)?;
            Ok(Value::Export(expect_int(tag, elements, 1)?))
        }
        "import" => {
            expect_len(tag, elements, 2)?;
            Ok(Value::Import(expect_int(tag, elements, 1)?))
        }
        "promise" => {
            expect_len(tag, elements, 2)?;
            Ok(Value::Promise(expect_int(tag, elements, 1)?))
        }
        "pipeline" => decode_pipeline(elements),
        "error" => decode_error(elements),
        other => Err(DecodeError::UnknownTag(other.to_string())),
    }
}

fn decode_pipeline(elements: &[JsonValue]) -> Result<Value, DecodeError> {
    if elements.len() < 2 || elements.len() > 4 {
        return Err(DecodeError::WrongArity {
            tag: "pipeline",
            expected: "2..=4",
            got: elements.len(),
        });
    }
    let id = expect_int("pipeline", elements, 1)?;
    let path = match elements.get(2) {
        Some(JsonValue::Array(segs)) => decode_path(segs)?,
        Some(_) => {
            return Err(DecodeError::WrongType {
                tag: "pipeline",
                pos: 2,
                expected: "array",
            })
        }
        None => Vec::new(),
    };
    let args = match elements.get(3) {
        Some(v) => match from_json(v)? {
            Value::Array(items) => Some(items),
            _ => {
                return Err(DecodeError::WrongType {
                    tag: "pipeline",
                    pos: 3,
                    expected: "escaped array",
                })
            }
        },
        None => None,
    };
    Ok(Value::Pipeline { id, path, args })
}

fn decode_path(segs: &[JsonValue]) -> Result<Vec<PathSegment>, DecodeError> {
    segs.iter()
        .map(|seg| match seg {
            JsonValue::String(s) => Ok(PathSegment::Property(s.clone())),
            JsonValue::Number(n) => n
                .as_i64()
                .map(PathSegment::Index)
                .ok_or(DecodeError::WrongType {
                    tag: "pipeline",
                    pos: 2,
                    expected: "integer path segment",
                }),
            _ => Err(DecodeError::WrongType {
                tag: "pipeline",
                pos: 2,
                expected: "string or integer path segment",
            }),
        })
        .collect()
}

fn decode_error(elements: &[JsonValue]) -> Result<Value, DecodeError> {
    if elements.len() < 3 || elements.len() > 4 {
        return Err(DecodeError::WrongArity {
            tag: "error",
            expected: "3..=4",
            got: elements.len(),
        });
    }
    let kind_str = expect_str("error", elements, 1)?;
    let kind = ErrorKind::from_wire_str(kind_str)
        .ok_or_else(|| DecodeError::UnknownErrorKind(kind_str.to_string()))?;
    let message = expect_str("error", elements, 2)?.to_string();
    let data = match elements.get(3) {
        Some(v) => Some(Box::new(from_json(v)?)),
        None => None,
    };
    Ok(Value::Error(WireError {
        kind,
        message,
        data,
    }))
}

fn expect_len(tag: &'static str, elements: &[JsonValue], n: usize) -> Result<(), DecodeError> {
    if elements.len() != n {
        return Err(DecodeError::WrongArity {
            tag,
            expected: match n {
                1 => "1",
                2 => "2",
                _ => "?",
            },
            got: elements.len(),
        });
    }
    Ok(())
}

fn expect_str<'a>(
    tag: &'static str,
    elements: &'a [JsonValue],
    pos: usize,
) -> Result<&'a str, DecodeError> {
    match elements.get(pos) {
        Some(JsonValue::String(s)) => Ok(s.as_str()),
        _ => Err(DecodeError::WrongType {
            tag,
            pos,
            expected: "string",
        }),
    }
}

fn expect_int(tag: &'static str, elements: &[JsonValue], pos: usize) -> Result<i64, DecodeError> {
    match elements.get(pos) {
        Some(JsonValue::Number(n)) => n.as_i64().ok_or(DecodeError::WrongType {
            tag,
            pos,
            expected: "integer",
        }),
        _ => Err(DecodeError::WrongType {
            tag,
            pos,
            expected: "integer",
        }),
    }
}
