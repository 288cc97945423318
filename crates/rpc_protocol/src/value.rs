use serde::{Deserialize, Serialize};

/// A single RPC-carried value.
///
/// This is the wire-level universe both codecs operate on: method
/// arguments, return values, property values, and event arguments are all
/// expressed as a [`Value`] before being handed to [`crate::codec`].
///
/// `Date` and `BigInt` are narrowed on purpose: dates are milliseconds
/// since the Unix epoch and big integers are `i128` rather than
/// arbitrary-precision — see `DESIGN.md` for the resolved open question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    BigInt(i128),
    Str(String),
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Regex {
        pattern: String,
        flags: String,
    },
    TypedArray(TypedArray),
    Array(Vec<Value>),
    /// Property order is preserved; this is an ordered association list,
    /// not a `HashMap`, so object key order round-trips.
    Object(Vec<(String, Value)>),
    /// Arbitrary key/value types, unlike `Object` which is string-keyed.
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Error(Box<ErrorValue>),
    Callback(CallbackRef),
    /// An arena-backed graph, used only when a value graph contains
    /// shared sub-objects or cycles. Rejected by the portable codec.
    Graph(ValueGraph),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::BigInt(_) => "bigint",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Regex { .. } => "regex",
            Value::TypedArray(_) => "typed_array",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Error(_) => "error",
            Value::Callback(_) => "callback",
            Value::Graph(_) => "graph",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// The eight typed-array flavors the rich codec preserves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedArray {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl TypedArray {
    pub fn len(&self) -> usize {
        match self {
            TypedArray::U8(v) => v.len(),
            TypedArray::I8(v) => v.len(),
            TypedArray::U16(v) => v.len(),
            TypedArray::I16(v) => v.len(),
            TypedArray::U32(v) => v.len(),
            TypedArray::I32(v) => v.len(),
            TypedArray::F32(v) => v.len(),
            TypedArray::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A marshalled error object: name/message/stack plus own-enumerable
/// properties and a recursive `cause` chain (spec.md §4.1, §7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub properties: Vec<(String, Value)>,
    pub cause: Option<Box<Value>>,
}

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            properties: Vec::new(),
            cause: None,
        }
    }
}

/// A tagged placeholder substituted for a function-valued argument
/// (spec.md §4.4 Call pipeline, step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRef {
    pub id: u64,
}

/// An arena of nodes addressed by index, used to carry shared references
/// and cycles that a plain recursive `Value` tree cannot represent.
///
/// `GraphNode::Array`/`GraphNode::Object` children are indices into
/// `nodes`; a node may appear as a child of more than one parent (shared
/// reference) or of one of its own ancestors (cycle). `root` names the
/// node to treat as the graph's logical value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueGraph {
    pub nodes: Vec<GraphNode>,
    pub root: u32,
}

impl ValueGraph {
    pub fn get(&self, index: u32) -> Option<&GraphNode> {
        self.nodes.get(index as usize)
    }

    pub fn root_node(&self) -> Option<&GraphNode> {
        self.get(self.root)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphNode {
    /// A non-container leaf reused verbatim; must not itself be `Value::Graph`.
    Leaf(Value),
    Array(Vec<u32>),
    Object(Vec<(String, u32)>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(Value::Null.kind(), "null");
        assert_eq!(Value::Bytes(vec![1, 2, 3]).kind(), "bytes");
        assert_eq!(
            Value::TypedArray(TypedArray::U8(vec![1])).kind(),
            "typed_array"
        );
    }

    #[test]
    fn typed_array_len() {
        let ta = TypedArray::F64(vec![1.0, 2.0, 3.0]);
        assert_eq!(ta.len(), 3);
        assert!(!ta.is_empty());
    }

    #[test]
    fn graph_cycle_is_representable() {
        // node 0 is an object {"self": <ref to node 0>}
        let graph = ValueGraph {
            nodes: vec![GraphNode::Object(vec![("self".to_string(), 0)])],
            root: 0,
        };
        match graph.root_node() {
            Some(GraphNode::Object(fields)) => {
                assert_eq!(fields[0].1, 0);
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }
}
