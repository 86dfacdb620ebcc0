//! Type-tagged envelope encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Number};

/// Encode a value into its `{type, value}` envelope.
///
/// Arrays and objects are encoded recursively so that dates, ids and bytes
/// nested anywhere keep their logical type.
///
/// # Errors
///
/// Returns an error if the value contains a non-finite float.
pub fn to_envelope(value: &Value) -> CodecResult<serde_json::Value> {
    let (tag, payload) = match value {
        Value::Null => ("null", serde_json::Value::Null),
        Value::Bool(b) => ("bool", json!(b)),
        Value::Integer(n) => ("int", json!(n)),
        Value::Float(f) => (
            "float",
            serde_json::Value::Number(Number::from_f64(*f).ok_or(CodecError::NonFiniteFloat)?),
        ),
        Value::Text(s) => ("text", json!(s)),
        Value::Bytes(b) => ("bytes", json!(BASE64.encode(b))),
        Value::Date(ms) => ("date", json!(ms)),
        Value::ObjectId(id) => ("id", json!(id)),
        Value::Array(items) => (
            "array",
            serde_json::Value::Array(items.iter().map(to_envelope).collect::<CodecResult<_>>()?),
        ),
        Value::Map(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), to_envelope(item)?);
            }
            ("object", serde_json::Value::Object(out))
        }
    };
    Ok(json!({ "type": tag, "value": payload }))
}

/// Encode a value into envelope JSON text, the form stored in relational
/// columns and in the shared cache.
///
/// # Errors
///
/// Returns an error if the value contains a non-finite float.
pub fn to_envelope_string(value: &Value) -> CodecResult<String> {
    Ok(to_envelope(value)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_envelopes() {
        assert_eq!(
            to_envelope(&Value::Integer(3)).unwrap(),
            json!({"type": "int", "value": 3})
        );
        assert_eq!(
            to_envelope(&Value::Date(10)).unwrap(),
            json!({"type": "date", "value": 10})
        );
        assert_eq!(
            to_envelope(&Value::Null).unwrap(),
            json!({"type": "null", "value": null})
        );
    }

    #[test]
    fn nested_envelope() {
        let value = Value::Array(vec![Value::ObjectId("a1".into())]);
        assert_eq!(
            to_envelope(&value).unwrap(),
            json!({"type": "array", "value": [{"type": "id", "value": "a1"}]})
        );
    }

    #[test]
    fn nan_is_rejected() {
        assert_eq!(
            to_envelope(&Value::Float(f64::NAN)),
            Err(CodecError::NonFiniteFloat)
        );
    }
}
