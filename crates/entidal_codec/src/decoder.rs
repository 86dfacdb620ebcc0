//! Type-tagged envelope decoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::BTreeMap;

/// Decode a `{type, value}` envelope back into a value.
///
/// # Errors
///
/// Returns an error if the envelope is malformed or carries an unknown tag.
pub fn from_envelope(envelope: &serde_json::Value) -> CodecResult<Value> {
    let obj = envelope
        .as_object()
        .ok_or_else(|| CodecError::invalid_envelope("expected an object"))?;
    let tag = obj
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CodecError::invalid_envelope("missing type tag"))?;
    let payload = obj.get("value").unwrap_or(&serde_json::Value::Null);

    let mismatch = || CodecError::invalid_envelope(format!("payload does not match type {tag}"));

    let value = match tag {
        "null" => Value::Null,
        "bool" => Value::Bool(payload.as_bool().ok_or_else(mismatch)?),
        "int" => Value::Integer(payload.as_i64().ok_or_else(mismatch)?),
        "float" => Value::Float(payload.as_f64().ok_or_else(mismatch)?),
        "text" => Value::Text(payload.as_str().ok_or_else(mismatch)?.to_string()),
        "bytes" => {
            let text = payload.as_str().ok_or_else(mismatch)?;
            Value::Bytes(
                BASE64
                    .decode(text)
                    .map_err(|e| CodecError::invalid_envelope(e.to_string()))?,
            )
        }
        "date" => Value::Date(payload.as_i64().ok_or_else(mismatch)?),
        "id" => Value::ObjectId(payload.as_str().ok_or_else(mismatch)?.to_string()),
        "array" => Value::Array(
            payload
                .as_array()
                .ok_or_else(mismatch)?
                .iter()
                .map(from_envelope)
                .collect::<CodecResult<_>>()?,
        ),
        "object" => {
            let mut map = BTreeMap::new();
            for (key, item) in payload.as_object().ok_or_else(mismatch)? {
                map.insert(key.clone(), from_envelope(item)?);
            }
            Value::Map(map)
        }
        other => {
            return Err(CodecError::UnknownType {
                type_name: other.to_string(),
            })
        }
    };
    Ok(value)
}

/// Decode envelope JSON text.
///
/// # Errors
///
/// Returns an error if the text is not JSON or the envelope is malformed.
pub fn from_envelope_str(text: &str) -> CodecResult<Value> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    from_envelope(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_scalars() {
        assert_eq!(
            from_envelope(&json!({"type": "bool", "value": true})).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            from_envelope(&json!({"type": "bytes", "value": "AQID"})).unwrap(),
            Value::Bytes(vec![1, 2, 3])
        );
    }

    #[test]
    fn unknown_tag() {
        let err = from_envelope(&json!({"type": "uuid", "value": "x"})).unwrap_err();
        assert_eq!(
            err,
            CodecError::UnknownType {
                type_name: "uuid".into()
            }
        );
    }

    #[test]
    fn mismatched_payload() {
        assert!(matches!(
            from_envelope(&json!({"type": "int", "value": "seven"})),
            Err(CodecError::InvalidEnvelope { .. })
        ));
        assert!(matches!(
            from_envelope(&json!([1, 2])),
            Err(CodecError::InvalidEnvelope { .. })
        ));
    }

    #[test]
    fn bad_text() {
        assert!(matches!(
            from_envelope_str("{not json"),
            Err(CodecError::Malformed { .. })
        ));
    }
}
