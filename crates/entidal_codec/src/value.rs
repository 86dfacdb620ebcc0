//! Dynamic entity value type.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// An entity row: an open map from field name to value.
pub type EntityValue = BTreeMap<String, Value>;

/// A dynamic field value.
///
/// Values arrive as loosely typed JSON from callers and leave the storage
/// backends with their logical types restored. `Date` and `ObjectId` have no
/// native JSON form, which is why the relational backend stores complex
/// values through the type-tagged envelope (see [`crate::to_envelope`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null or absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text string.
    Text(String),
    /// Binary payload.
    Bytes(Vec<u8>),
    /// Timestamp in milliseconds since the Unix epoch.
    Date(i64),
    /// Opaque object identifier (24 hex characters when generated).
    ObjectId(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Nested object.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float. Integers are widened.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get this value as a string, if it is text or an object id.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::ObjectId(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Short name of the variant, used in error messages and envelopes.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::ObjectId(_) => "id",
            Value::Array(_) => "array",
            Value::Map(_) => "object",
        }
    }

    /// Orders two values of a comparable kind.
    ///
    /// Numbers compare across integer and float. Text and object ids compare
    /// as strings. Values of unrelated kinds are not ordered, which makes
    /// range operators skip them instead of guessing.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                self.as_float()?.partial_cmp(&other.as_float()?)
            }
            (Value::Text(a) | Value::ObjectId(a), Value::Text(b) | Value::ObjectId(b)) => {
                Some(a.cmp(b))
            }
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Equality used by query matching: numbers compare by value and object
    /// ids match their textual form.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Map(_), _) | (_, Value::Map(_)) => self == other,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// Total order used for sorting rows.
    ///
    /// Null sorts first, then numbers, text, dates, booleans and the rest by
    /// kind, matching how both storage backends place NULL first ascending.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        if let Some(ord) = self.compare(other) {
            return ord;
        }
        self.sort_rank().cmp(&other.sort_rank())
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) | Value::Float(_) => 1,
            Value::Text(_) | Value::ObjectId(_) => 2,
            Value::Map(_) => 3,
            Value::Array(_) => 4,
            Value::Bytes(_) => 5,
            Value::Bool(_) => 6,
            Value::Date(_) => 7,
        }
    }

    /// Renders a scalar as a key fragment (ids, cache keys).
    pub fn to_key_string(&self) -> String {
        match self {
            Value::Text(s) | Value::ObjectId(s) => s.clone(),
            Value::Integer(n) | Value::Date(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            other => other.to_json().to_string(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<EntityValue> for Value {
    fn from(m: EntityValue) -> Self {
        Value::Map(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}
