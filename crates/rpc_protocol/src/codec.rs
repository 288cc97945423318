use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number, Value as Json};
use thiserror::Error;

use crate::value::{CallbackRef, ErrorValue, TypedArray, Value, ValueGraph};

/// The two codec modes a worker is spawned with (spec.md §4.1, §6).
/// Immutable for the life of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerializationMode {
    Portable,
    Rich,
}

impl SerializationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SerializationMode::Portable => "portable",
            SerializationMode::Rich => "rich",
        }
    }
}

impl std::fmt::Display for SerializationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SerializationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portable" => Ok(SerializationMode::Portable),
            "rich" => Ok(SerializationMode::Rich),
            other => Err(format!("unknown serialization mode `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecDirection {
    Encode,
    Decode,
}

/// Errors a codec can raise. Carries enough context (direction, which
/// argument, value kind) to satisfy spec.md §7's `SerializationError`.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{direction:?} rejected in {mode} mode at {context}: value of kind `{kind}` is not representable")]
    Unsupported {
        direction: CodecDirection,
        mode: SerializationMode,
        context: String,
        kind: &'static str,
    },
    #[error("big integer {0} does not fit in the portable representation")]
    BigIntOverflow(i128),
    #[error("json encode/decode failed at {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("bincode encode/decode failed at {context}: {source}")]
    Bincode {
        context: String,
        #[source]
        source: bincode::Error,
    },
    #[error("malformed portable payload at {context}: {reason}")]
    Malformed { context: String, reason: String },
}

/// Encodes/decodes a single [`Value`] for one codec mode.
pub trait Codec: Send + Sync {
    fn mode(&self) -> SerializationMode;
    fn encode(&self, value: &Value, context: &str) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8], context: &str) -> Result<Value, CodecError>;
}

pub fn codec_for(mode: SerializationMode) -> Box<dyn Codec> {
    match mode {
        SerializationMode::Portable => Box::new(PortableCodec),
        SerializationMode::Rich => Box::new(RichCodec),
    }
}

/// JSON-text codec. Values containing buffers, typed arrays, maps, sets,
/// or graphs are rejected before a frame is ever written. Dates encode
/// as ISO-8601 strings and big integers as decimal strings; decoding
/// never recovers `Value::Date`/`Value::BigInt` from those strings —
/// this asymmetry is inherent to portable mode and is documented in
/// `SPEC_FULL.md`.
pub struct PortableCodec;

impl Codec for PortableCodec {
    fn mode(&self) -> SerializationMode {
        SerializationMode::Portable
    }

    fn encode(&self, value: &Value, context: &str) -> Result<Vec<u8>, CodecError> {
        let json = to_portable_json(value, context)?;
        serde_json::to_vec(&json).map_err(|source| CodecError::Json {
            context: context.to_string(),
            source,
        })
    }

    fn decode(&self, bytes: &[u8], context: &str) -> Result<Value, CodecError> {
        let json: Json = serde_json::from_slice(bytes).map_err(|source| CodecError::Json {
            context: context.to_string(),
            source,
        })?;
        from_portable_json(json, context)
    }
}

fn unsupported(
    direction: CodecDirection,
    context: &str,
    kind: &'static str,
) -> CodecError {
    CodecError::Unsupported {
        direction,
        mode: SerializationMode::Portable,
        context: context.to_string(),
        kind,
    }
}

fn to_portable_json(value: &Value, context: &str) -> Result<Json, CodecError> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::BigInt(i) => Json::String(i.to_string()),
        Value::Str(s) => Json::String(s.clone()),
        Value::Date(ms) => Json::String(iso8601_from_millis(*ms)),
        Value::Regex { pattern, flags } => {
            let mut map = JsonMap::new();
            map.insert("source".to_string(), Json::String(pattern.clone()));
            map.insert("flags".to_string(), Json::String(flags.clone()));
            Json::Object(map)
        }
        Value::Array(items) => Json::Array(
            items
                .iter()
                .map(|v| to_portable_json(v, context))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(fields) => {
            let mut map = JsonMap::new();
            for (key, v) in fields {
                map.insert(key.clone(), to_portable_json(v, context)?);
            }
            Json::Object(map)
        }
        Value::Error(err) => encode_error_portable(err, context)?,
        Value::Callback(cb) => {
            let mut map = JsonMap::new();
            map.insert("__callback".to_string(), Json::Number(cb.id.into()));
            Json::Object(map)
        }
        Value::Bytes(_) => return Err(unsupported(CodecDirection::Encode, context, "bytes")),
        Value::TypedArray(_) => {
            return Err(unsupported(CodecDirection::Encode, context, "typed_array"))
        }
        Value::Map(_) => return Err(unsupported(CodecDirection::Encode, context, "map")),
        Value::Set(_) => return Err(unsupported(CodecDirection::Encode, context, "set")),
        Value::Graph(_) => return Err(unsupported(CodecDirection::Encode, context, "graph")),
    })
}

fn encode_error_portable(err: &ErrorValue, context: &str) -> Result<Json, CodecError> {
    let mut map = JsonMap::new();
    map.insert("__error".to_string(), Json::Bool(true));
    map.insert("name".to_string(), Json::String(err.name.clone()));
    map.insert("message".to_string(), Json::String(err.message.clone()));
    map.insert(
        "stack".to_string(),
        err.stack.clone().map(Json::String).unwrap_or(Json::Null),
    );
    let mut props = JsonMap::new();
    for (key, v) in &err.properties {
        props.insert(key.clone(), to_portable_json(v, context)?);
    }
    map.insert("properties".to_string(), Json::Object(props));
    if let Some(cause) = &err.cause {
        map.insert(
            "causedBy".to_string(),
            Json::String(flatten_cause(cause)),
        );
    }
    Ok(Json::Object(map))
}

/// Portable mode cannot recurse a full cause chain; it flattens it to a
/// single descriptive string (spec.md §7, §8 scenario S8).
fn flatten_cause(value: &Value) -> String {
    match value {
        Value::Error(err) => {
            let mut out = format!("{}: {}", err.name, err.message);
            if let Some(inner) = &err.cause {
                out.push_str(" <- ");
                out.push_str(&flatten_cause(inner));
            }
            out
        }
        Value::Str(s) => s.clone(),
        other => format!("{other:?}"),
    }
}

fn from_portable_json(json: Json, context: &str) -> Result<Value, CodecError> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        Json::String(s) => Value::Str(s),
        Json::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| from_portable_json(v, context))
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(map) => {
            if let Some(Json::Number(n)) = map.get("__callback") {
                let id = n.as_u64().ok_or_else(|| CodecError::Malformed {
                    context: context.to_string(),
                    reason: "__callback id is not an unsigned integer".to_string(),
                })?;
                return Ok(Value::Callback(CallbackRef { id }));
            }
            if matches!(map.get("__error"), Some(Json::Bool(true))) {
                return decode_error_portable(map, context);
            }
            let mut fields = Vec::with_capacity(map.len());
            for (key, v) in map {
                fields.push((key, from_portable_json(v, context)?));
            }
            Value::Object(fields)
        }
    })
}

fn decode_error_portable(mut map: JsonMap<String, Json>, context: &str) -> Result<Value, CodecError> {
    let name = match map.remove("name") {
        Some(Json::String(s)) => s,
        _ => "Error".to_string(),
    };
    let message = match map.remove("message") {
        Some(Json::String(s)) => s,
        _ => String::new(),
    };
    let stack = match map.remove("stack") {
        Some(Json::String(s)) => Some(s),
        _ => None,
    };
    let properties = match map.remove("properties") {
        Some(Json::Object(props)) => props
            .into_iter()
            .map(|(k, v)| Ok((k, from_portable_json(v, context)?)))
            .collect::<Result<Vec<_>, CodecError>>()?,
        _ => Vec::new(),
    };
    let cause = match map.remove("causedBy") {
        Some(Json::String(s)) => Some(Box::new(Value::Str(s))),
        _ => None,
    };
    Ok(Value::Error(Box::new(ErrorValue {
        name,
        message,
        stack,
        properties,
        cause,
    })))
}

fn iso8601_from_millis(ms: i64) -> String {
    // Minimal, dependency-free ISO-8601 (UTC) formatting: no external
    // date/time crate is pulled in purely to stringify a millisecond count.
    const DAYS_PER_400Y: i64 = 146097;
    const DAYS_PER_100Y: i64 = 36524;
    const DAYS_PER_4Y: i64 = 1461;

    let total_ms = ms.rem_euclid(1000);
    let total_secs = ms.div_euclid(1000);
    let days = total_secs.div_euclid(86400);
    let secs_of_day = total_secs.rem_euclid(86400);
    let hour = secs_of_day / 3600;
    let min = (secs_of_day % 3600) / 60;
    let sec = secs_of_day % 60;

    // Civil-from-days algorithm (Howard Hinnant), operating from 1970-01-01.
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / DAYS_PER_400Y;
    let doe = z - era * DAYS_PER_400Y;
    let yoe = (doe - doe / DAYS_PER_4Y + doe / DAYS_PER_100Y - doe / (DAYS_PER_400Y - 1))
        / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };

    format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{min:02}:{sec:02}.{total_ms:03}Z"
    )
}

/// Binary codec built on `bincode`, preserving every [`Value`] variant
/// (buffers, every typed-array flavor, big integers, dates, regexes,
/// maps with arbitrary keys, sets, error cause chains, and cyclic/shared
/// graphs) exactly (spec.md §4.1 rich mode, §8 round-trip invariants).
pub struct RichCodec;

impl Codec for RichCodec {
    fn mode(&self) -> SerializationMode {
        SerializationMode::Rich
    }

    fn encode(&self, value: &Value, context: &str) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|source| CodecError::Bincode {
            context: context.to_string(),
            source,
        })
    }

    fn decode(&self, bytes: &[u8], context: &str) -> Result<Value, CodecError> {
        bincode::deserialize(bytes).map_err(|source| CodecError::Bincode {
            context: context.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::GraphNode;

    #[test]
    fn portable_round_trips_json_safe_tree() {
        let codec = PortableCodec;
        let value = Value::Object(vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Array(vec![Value::Str("x".into()), Value::Bool(true)])),
        ]);
        let bytes = codec.encode(&value, "test").unwrap();
        let decoded = codec.decode(&bytes, "test").unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn portable_rejects_bytes() {
        let codec = PortableCodec;
        let err = codec.encode(&Value::Bytes(vec![1, 2, 3]), "arg[0]").unwrap_err();
        assert!(matches!(err, CodecError::Unsupported { kind: "bytes", .. }));
    }

    #[test]
    fn portable_rejects_typed_array_map_set_graph() {
        let codec = PortableCodec;
        assert!(codec
            .encode(&Value::TypedArray(TypedArray::U8(vec![1])), "x")
            .is_err());
        assert!(codec.encode(&Value::Map(vec![]), "x").is_err());
        assert!(codec.encode(&Value::Set(vec![]), "x").is_err());
        assert!(codec
            .encode(
                &Value::Graph(ValueGraph {
                    nodes: vec![GraphNode::Leaf(Value::Null)],
                    root: 0
                }),
                "x"
            )
            .is_err());
    }

    #[test]
    fn portable_date_is_asymmetric() {
        let codec = PortableCodec;
        let bytes = codec.encode(&Value::Date(0), "x").unwrap();
        let decoded = codec.decode(&bytes, "x").unwrap();
        assert_eq!(decoded, Value::Str("1970-01-01T00:00:00.000Z".to_string()));
    }

    #[test]
    fn portable_callback_round_trips() {
        let codec = PortableCodec;
        let value = Value::Callback(CallbackRef { id: 42 });
        let bytes = codec.encode(&value, "x").unwrap();
        assert_eq!(codec.decode(&bytes, "x").unwrap(), value);
    }

    #[test]
    fn portable_error_flattens_cause_chain() {
        let codec = PortableCodec;
        let inner = ErrorValue::new("RootCause", "disk full");
        let mut outer = ErrorValue::new("ValidationError", "write failed");
        outer.properties.push(("field".to_string(), Value::Str("name".into())));
        outer.cause = Some(Box::new(Value::Error(Box::new(inner))));
        let bytes = codec.encode(&Value::Error(Box::new(outer)), "x").unwrap();
        match codec.decode(&bytes, "x").unwrap() {
            Value::Error(err) => {
                assert_eq!(err.name, "ValidationError");
                assert_eq!(err.properties[0].0, "field");
                match err.cause.as_deref() {
                    Some(Value::Str(s)) => assert!(s.contains("RootCause")),
                    other => panic!("unexpected cause: {other:?}"),
                }
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn rich_round_trips_everything() {
        let codec = RichCodec;
        let value = Value::Array(vec![
            Value::Bytes(vec![0, 1, 2, 255]),
            Value::TypedArray(TypedArray::I32(vec![-1, 0, 1])),
            Value::BigInt(170141183460469231731687303715884105727),
            Value::Date(1_700_000_000_000),
            Value::Regex {
                pattern: "^a+$".to_string(),
                flags: "i".to_string(),
            },
            Value::Map(vec![(Value::Int(1), Value::Str("one".into()))]),
            Value::Set(vec![Value::Int(1), Value::Int(2)]),
        ]);
        let bytes = codec.encode(&value, "x").unwrap();
        let decoded = codec.decode(&bytes, "x").unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn rich_round_trips_cyclic_graph() {
        let codec = RichCodec;
        let graph = ValueGraph {
            nodes: vec![GraphNode::Object(vec![("self".to_string(), 0)])],
            root: 0,
        };
        let value = Value::Graph(graph.clone());
        let bytes = codec.encode(&value, "x").unwrap();
        let decoded = codec.decode(&bytes, "x").unwrap();
        assert_eq!(decoded, Value::Graph(graph));
    }

    #[test]
    fn rich_round_trips_error_with_cause_chain_and_props() {
        let codec = RichCodec;
        let inner = ErrorValue::new("RootCause", "disk full");
        let mut outer = ErrorValue::new("ValidationError", "write failed");
        outer.properties.push(("field".to_string(), Value::Str("name".into())));
        outer.cause = Some(Box::new(Value::Error(Box::new(inner))));
        let value = Value::Error(Box::new(outer));
        let bytes = codec.encode(&value, "x").unwrap();
        assert_eq!(codec.decode(&bytes, "x").unwrap(), value);
    }
}
