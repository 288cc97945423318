use crate::codec::{Codec, CodecError, SerializationMode};
use crate::value::Value;

/// The typed message set carried over the transport (spec.md §4.3).
///
/// `Init` is not named in spec.md's envelope table but is required by the
/// Rust rendition of the spawn handshake (`SPEC_FULL.md` AMBIENT — class
/// name resolution): constructor arguments have nowhere else to travel
/// since there is no dynamic `import()` the worker binary performs itself.
/// It is always the first frame the parent writes, strictly before it
/// reads a `Ready`.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Parent -> worker, sent once, immediately after the transport opens.
    Init {
        serialization: SerializationMode,
        args: Vec<Value>,
    },
    /// Worker -> parent, sent exactly once, after construction succeeds.
    Ready {
        codec: SerializationMode,
        supports_handles: bool,
        supports_events: bool,
        methods: Vec<String>,
        properties: Vec<(String, Value)>,
    },
    /// Parent -> worker.
    Request {
        id: u64,
        method: String,
        args: Vec<Value>,
    },
    /// Worker -> parent. Exactly one per `Request`.
    Response { id: u64, result: CallResult },
    /// Worker -> parent, zero or more per `Request`, always emitted before
    /// the `Response` that covers the call during which they occurred.
    PropertyUpdate { name: String, value: Value },
    /// Worker -> parent.
    Event { event: String, args: Vec<Value> },
    /// Worker -> parent: the worker needs to invoke a callback the parent
    /// passed as an argument.
    CallbackInvoke {
        id: u64,
        callback_id: u64,
        args: Vec<Value>,
    },
    /// Parent -> worker. Exactly one per `CallbackInvoke`.
    CallbackResult { id: u64, result: CallResult },
    /// Parent -> worker.
    Shutdown { mode: ShutdownMode },
}

impl Envelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Init { .. } => "init",
            Envelope::Ready { .. } => "ready",
            Envelope::Request { .. } => "request",
            Envelope::Response { .. } => "response",
            Envelope::PropertyUpdate { .. } => "property_update",
            Envelope::Event { .. } => "event",
            Envelope::CallbackInvoke { .. } => "callback_invoke",
            Envelope::CallbackResult { .. } => "callback_result",
            Envelope::Shutdown { .. } => "shutdown",
        }
    }

    /// Lowers this envelope to the shared [`Value`] tree so it can be
    /// handed to either codec. Scalar fields (ids, method names, the
    /// `kind` tag) become `Value::Int`/`Value::Str`; this keeps envelope
    /// framing entirely inside the same codec path that args, return
    /// values, and property values already go through, so the portable
    /// codec's rejection rules apply uniformly to an envelope's payload
    /// fields without a parallel set of rules.
    pub fn to_value(&self) -> Value {
        match self {
            Envelope::Init { serialization, args } => obj([
                ("kind", Value::Str("init".into())),
                ("serialization", Value::Str(serialization.as_str().into())),
                ("args", Value::Array(args.clone())),
            ]),
            Envelope::Ready {
                codec,
                supports_handles,
                supports_events,
                methods,
                properties,
            } => obj([
                ("kind", Value::Str("ready".into())),
                ("codec", Value::Str(codec.as_str().into())),
                ("supportsHandles", Value::Bool(*supports_handles)),
                ("supportsEvents", Value::Bool(*supports_events)),
                (
                    "methods",
                    Value::Array(methods.iter().cloned().map(Value::Str).collect()),
                ),
                ("properties", Value::Object(properties.clone())),
            ]),
            Envelope::Request { id, method, args } => obj([
                ("kind", Value::Str("request".into())),
                ("id", Value::Int(*id as i64)),
                ("method", Value::Str(method.clone())),
                ("args", Value::Array(args.clone())),
            ]),
            Envelope::Response { id, result } => obj([
                ("kind", Value::Str("response".into())),
                ("id", Value::Int(*id as i64)),
                ("result", result.to_value()),
            ]),
            Envelope::PropertyUpdate { name, value } => obj([
                ("kind", Value::Str("property_update".into())),
                ("name", Value::Str(name.clone())),
                ("value", value.clone()),
            ]),
            Envelope::Event { event, args } => obj([
                ("kind", Value::Str("event".into())),
                ("event", Value::Str(event.clone())),
                ("args", Value::Array(args.clone())),
            ]),
            Envelope::CallbackInvoke {
                id,
                callback_id,
                args,
            } => obj([
                ("kind", Value::Str("callback_invoke".into())),
                ("id", Value::Int(*id as i64)),
                ("callbackId", Value::Int(*callback_id as i64)),
                ("args", Value::Array(args.clone())),
            ]),
            Envelope::CallbackResult { id, result } => obj([
                ("kind", Value::Str("callback_result".into())),
                ("id", Value::Int(*id as i64)),
                ("result", result.to_value()),
            ]),
            Envelope::Shutdown { mode } => obj([
                ("kind", Value::Str("shutdown".into())),
                ("mode", Value::Str(mode.as_str().into())),
            ]),
        }
    }

    pub fn from_value(value: Value) -> Result<Envelope, CodecError> {
        let fields = object_fields(value, "envelope")?;
        let kind = take_str(&fields, "kind", "envelope")?;
        match kind.as_str() {
            "init" => Ok(Envelope::Init {
                serialization: take_str(&fields, "serialization", "envelope.init")?
                    .parse()
                    .map_err(|reason| malformed("envelope.init.serialization", reason))?,
                args: take_array(&fields, "args", "envelope.init")?,
            }),
            "ready" => Ok(Envelope::Ready {
                codec: take_str(&fields, "codec", "envelope.ready")?
                    .parse()
                    .map_err(|reason| malformed("envelope.ready.codec", reason))?,
                supports_handles: take_bool(&fields, "supportsHandles", "envelope.ready")?,
                supports_events: take_bool(&fields, "supportsEvents", "envelope.ready")?,
                methods: take_array(&fields, "methods", "envelope.ready")?
                    .into_iter()
                    .map(|v| match v {
                        Value::Str(s) => Ok(s),
                        other => Err(malformed(
                            "envelope.ready.methods",
                            format!("expected string, got `{}`", other.kind()),
                        )),
                    })
                    .collect::<Result<_, _>>()?,
                properties: take_object(&fields, "properties", "envelope.ready")?,
            }),
            "request" => Ok(Envelope::Request {
                id: take_u64(&fields, "id", "envelope.request")?,
                method: take_str(&fields, "method", "envelope.request")?,
                args: take_array(&fields, "args", "envelope.request")?,
            }),
            "response" => Ok(Envelope::Response {
                id: take_u64(&fields, "id", "envelope.response")?,
                result: CallResult::from_value(take_field(&fields, "result", "envelope.response")?)?,
            }),
            "property_update" => Ok(Envelope::PropertyUpdate {
                name: take_str(&fields, "name", "envelope.property_update")?,
                value: take_field(&fields, "value", "envelope.property_update")?,
            }),
            "event" => Ok(Envelope::Event {
                event: take_str(&fields, "event", "envelope.event")?,
                args: take_array(&fields, "args", "envelope.event")?,
            }),
            "callback_invoke" => Ok(Envelope::CallbackInvoke {
                id: take_u64(&fields, "id", "envelope.callback_invoke")?,
                callback_id: take_u64(&fields, "callbackId", "envelope.callback_invoke")?,
                args: take_array(&fields, "args", "envelope.callback_invoke")?,
            }),
            "callback_result" => Ok(Envelope::CallbackResult {
                id: take_u64(&fields, "id", "envelope.callback_result")?,
                result: CallResult::from_value(take_field(
                    &fields,
                    "result",
                    "envelope.callback_result",
                )?)?,
            }),
            "shutdown" => Ok(Envelope::Shutdown {
                mode: match take_str(&fields, "mode", "envelope.shutdown")?.as_str() {
                    "graceful" => ShutdownMode::Graceful,
                    "immediate" => ShutdownMode::Immediate,
                    other => {
                        return Err(malformed(
                            "envelope.shutdown.mode",
                            format!("unknown shutdown mode `{other}`"),
                        ))
                    }
                },
            }),
            other => Err(malformed("envelope.kind", format!("unknown envelope kind `{other}`"))),
        }
    }
}

/// The `ok: true/false` discriminated result shared by `Response` and
/// `CallbackResult` (spec.md §4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    Ok(Value),
    Err(Value),
}

impl CallResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, CallResult::Ok(_))
    }

    fn to_value(&self) -> Value {
        match self {
            CallResult::Ok(v) => obj([("ok", Value::Bool(true)), ("value", v.clone())]),
            CallResult::Err(v) => obj([("ok", Value::Bool(false)), ("value", v.clone())]),
        }
    }

    fn from_value(value: Value) -> Result<CallResult, CodecError> {
        let fields = object_fields(value, "call_result")?;
        let ok = take_bool(&fields, "ok", "call_result")?;
        let value = take_field(&fields, "value", "call_result")?;
        Ok(if ok {
            CallResult::Ok(value)
        } else {
            CallResult::Err(value)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Graceful,
    Immediate,
}

impl ShutdownMode {
    fn as_str(self) -> &'static str {
        match self {
            ShutdownMode::Graceful => "graceful",
            ShutdownMode::Immediate => "immediate",
        }
    }
}

/// Encodes an envelope through `codec` by lowering it to a [`Value`] first.
pub fn encode_envelope(codec: &dyn Codec, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    codec.encode(&envelope.to_value(), envelope.kind())
}

/// Decodes bytes produced by [`encode_envelope`] using the same codec.
pub fn decode_envelope(codec: &dyn Codec, bytes: &[u8]) -> Result<Envelope, CodecError> {
    let value = codec.decode(bytes, "envelope")?;
    Envelope::from_value(value)
}

fn obj<const N: usize>(fields: [(&str, Value); N]) -> Value {
    Value::Object(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

fn malformed(context: &str, reason: impl Into<String>) -> CodecError {
    CodecError::Malformed {
        context: context.to_string(),
        reason: reason.into(),
    }
}

fn object_fields(value: Value, context: &str) -> Result<Vec<(String, Value)>, CodecError> {
    match value {
        Value::Object(fields) => Ok(fields),
        other => Err(malformed(
            context,
            format!("expected object, got `{}`", other.kind()),
        )),
    }
}

fn take_field(fields: &[(String, Value)], key: &str, context: &str) -> Result<Value, CodecError> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
        .ok_or_else(|| malformed(context, format!("missing field `{key}`")))
}

fn take_str(fields: &[(String, Value)], key: &str, context: &str) -> Result<String, CodecError> {
    match take_field(fields, key, context)? {
        Value::Str(s) => Ok(s),
        other => Err(malformed(
            context,
            format!("field `{key}` expected string, got `{}`", other.kind()),
        )),
    }
}

fn take_bool(fields: &[(String, Value)], key: &str, context: &str) -> Result<bool, CodecError> {
    match take_field(fields, key, context)? {
        Value::Bool(b) => Ok(b),
        other => Err(malformed(
            context,
            format!("field `{key}` expected bool, got `{}`", other.kind()),
        )),
    }
}

fn take_u64(fields: &[(String, Value)], key: &str, context: &str) -> Result<u64, CodecError> {
    match take_field(fields, key, context)? {
        Value::Int(i) if i >= 0 => Ok(i as u64),
        other => Err(malformed(
            context,
            format!("field `{key}` expected non-negative integer, got `{other:?}`"),
        )),
    }
}

fn take_array(fields: &[(String, Value)], key: &str, context: &str) -> Result<Vec<Value>, CodecError> {
    match take_field(fields, key, context)? {
        Value::Array(items) => Ok(items),
        other => Err(malformed(
            context,
            format!("field `{key}` expected array, got `{}`", other.kind()),
        )),
    }
}

fn take_object(
    fields: &[(String, Value)],
    key: &str,
    context: &str,
) -> Result<Vec<(String, Value)>, CodecError> {
    match take_field(fields, key, context)? {
        Value::Object(items) => Ok(items),
        other => Err(malformed(
            context,
            format!("field `{key}` expected object, got `{}`", other.kind()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{codec_for, SerializationMode};

    #[test]
    fn kind_names_cover_every_variant() {
        let ready = Envelope::Ready {
            codec: SerializationMode::Rich,
            supports_handles: false,
            supports_events: true,
            methods: vec!["add".to_string()],
            properties: vec![],
        };
        assert_eq!(ready.kind(), "ready");

        let shutdown = Envelope::Shutdown {
            mode: ShutdownMode::Graceful,
        };
        assert_eq!(shutdown.kind(), "shutdown");
    }

    #[test]
    fn call_result_is_ok() {
        assert!(CallResult::Ok(Value::Null).is_ok());
        assert!(!CallResult::Err(Value::Null).is_ok());
    }

    #[test]
    fn request_round_trips_through_both_codecs() {
        for mode in [SerializationMode::Portable, SerializationMode::Rich] {
            let codec = codec_for(mode);
            let envelope = Envelope::Request {
                id: 7,
                method: "add".to_string(),
                args: vec![Value::Int(5), Value::Int(7)],
            };
            let bytes = encode_envelope(codec.as_ref(), &envelope).unwrap();
            let decoded = decode_envelope(codec.as_ref(), &bytes).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn ready_round_trips_with_properties() {
        let codec = codec_for(SerializationMode::Portable);
        let envelope = Envelope::Ready {
            codec: SerializationMode::Portable,
            supports_handles: false,
            supports_events: true,
            methods: vec!["add".to_string(), "reset".to_string()],
            properties: vec![("counter".to_string(), Value::Int(0))],
        };
        let bytes = encode_envelope(codec.as_ref(), &envelope).unwrap();
        assert_eq!(decode_envelope(codec.as_ref(), &bytes).unwrap(), envelope);
    }

    #[test]
    fn response_err_round_trips() {
        let codec = codec_for(SerializationMode::Rich);
        let envelope = Envelope::Response {
            id: 1,
            result: CallResult::Err(Value::Str("boom".to_string())),
        };
        let bytes = encode_envelope(codec.as_ref(), &envelope).unwrap();
        assert_eq!(decode_envelope(codec.as_ref(), &bytes).unwrap(), envelope);
    }

    #[test]
    fn portable_request_rejects_non_json_safe_args() {
        let codec = codec_for(SerializationMode::Portable);
        let envelope = Envelope::Request {
            id: 1,
            method: "processBuffer".to_string(),
            args: vec![Value::Bytes(vec![1, 2, 3])],
        };
        assert!(encode_envelope(codec.as_ref(), &envelope).is_err());
    }

    #[test]
    fn unknown_kind_is_a_protocol_error() {
        let codec = codec_for(SerializationMode::Portable);
        let bytes = codec
            .encode(&Value::Object(vec![("kind".to_string(), Value::Str("bogus".into()))]), "x")
            .unwrap();
        let err = decode_envelope(codec.as_ref(), &bytes).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
    }
}
