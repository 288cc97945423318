use crate::value::Value;

/// Tag carried on a `Response`/`CallbackResult` error value so the parent
/// can reconstruct one of spec.md §7's *generated* error kinds
/// (`UnknownMethodError`, `ProtocolError`) instead of treating it as an
/// opaque user-thrown error (`RpcError::Remote`).
///
/// Errors the target's own method body throws are never tagged this way —
/// spec.md §7 is explicit that those are "propagated, not classified".
/// This tag only marks failures the dispatcher itself raises before (or
/// instead of) calling into the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifiedKind {
    UnknownMethod,
    Protocol,
}

impl ClassifiedKind {
    fn tag(self) -> &'static str {
        match self {
            ClassifiedKind::UnknownMethod => "unknown_method",
            ClassifiedKind::Protocol => "protocol",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "unknown_method" => Some(ClassifiedKind::UnknownMethod),
            "protocol" => Some(ClassifiedKind::Protocol),
            _ => None,
        }
    }
}

const TAG_FIELD: &str = "__rpcErrorKind";
const DETAIL_FIELD: &str = "detail";

/// Builds the `Value` a dispatcher sends back for a classified failure.
pub fn classified_error(kind: ClassifiedKind, detail: impl Into<String>) -> Value {
    Value::Object(vec![
        (TAG_FIELD.to_string(), Value::Str(kind.tag().to_string())),
        (DETAIL_FIELD.to_string(), Value::Str(detail.into())),
    ])
}

/// Recognizes a value built by [`classified_error`], returning its kind and
/// detail string. Any other shape (including an ordinary user-thrown
/// `Value::Error`) returns `None`, leaving the caller to treat it as an
/// unclassified remote error.
pub fn decode_classified(value: &Value) -> Option<(ClassifiedKind, &str)> {
    let Value::Object(fields) = value else {
        return None;
    };
    let tag = fields.iter().find(|(k, _)| k == TAG_FIELD).and_then(|(_, v)| match v {
        Value::Str(s) => Some(s.as_str()),
        _ => None,
    })?;
    let detail = fields
        .iter()
        .find(|(k, _)| k == DETAIL_FIELD)
        .and_then(|(_, v)| match v {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        })
        .unwrap_or("");
    ClassifiedKind::from_tag(tag).map(|kind| (kind, detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_unknown_method() {
        let value = classified_error(ClassifiedKind::UnknownMethod, "unknown method `foo`");
        let (kind, detail) = decode_classified(&value).unwrap();
        assert_eq!(kind, ClassifiedKind::UnknownMethod);
        assert_eq!(detail, "unknown method `foo`");
    }

    #[test]
    fn ordinary_error_value_is_not_classified() {
        let value = Value::Str("boom".to_string());
        assert!(decode_classified(&value).is_none());
    }

    #[test]
    fn ordinary_object_without_tag_is_not_classified() {
        let value = Value::Object(vec![("message".to_string(), Value::Str("boom".to_string()))]);
        assert!(decode_classified(&value).is_none());
    }
}
