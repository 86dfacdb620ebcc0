//! Backend-agnostic filter trees.
//!
//! A [`Criteria`] is parsed from the JSON wire form and compiled to the
//! native query of each backend:
//! - [`document::compile`] produces a document-store filter object
//! - [`sql::compile`] produces a parameterized `WHERE` clause
//!
//! Malformed leaves parse to [`Criteria::Invalid`] and compile to a filter
//! that matches nothing, so a broken client filter can never widen a query.
//! Leaves that name an undeclared field, or whose operand can never compare
//! with the declared field type, match nothing on both backends as well.

pub mod document;
pub mod sql;

use crate::meta::{EntityMeta, FieldType, ID_FIELD};
use entidal_codec::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Comparison operators of a criteria leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// Value is one of a list.
    In,
    /// Value is none of a list.
    Nin,
    /// Text starts with.
    Start,
    /// Text ends with.
    End,
    /// Text contains.
    Contain,
}

impl Operator {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "in",
            Operator::Nin => "nin",
            Operator::Start => "start",
            Operator::End => "end",
            Operator::Contain => "contain",
        }
    }

    fn is_text_match(self) -> bool {
        matches!(self, Operator::Start | Operator::End | Operator::Contain)
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "==" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "in" => Operator::In,
            "nin" => Operator::Nin,
            "start" => Operator::Start,
            "end" => Operator::End,
            "contain" => Operator::Contain,
            other => return Err(format!("unknown operator {other}")),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// Field name.
    pub field: String,
    /// Operator.
    pub operator: Operator,
    /// Operand. A list for `in` / `nin`, text for the text matchers.
    pub value: Value,
}

/// A filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// No constraint.
    All,
    /// A malformed leaf; matches nothing.
    Invalid(String),
    /// Field comparison.
    Leaf(Leaf),
    /// Every child matches.
    And(Vec<Criteria>),
    /// Some child matches.
    Or(Vec<Criteria>),
    /// Already-native document filter passed through unchanged.
    Native(Value),
}

impl Default for Criteria {
    fn default() -> Self {
        Criteria::All
    }
}

impl Criteria {
    /// Builds a leaf, validating the operand shape.
    pub fn leaf(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        if field.is_empty() {
            return Criteria::Invalid("missing field".into());
        }
        match operator {
            Operator::In | Operator::Nin if value.as_array().is_none() => {
                Criteria::Invalid(format!("{operator} on {field} needs a list"))
            }
            op if op.is_text_match() && !matches!(value, Value::Text(_)) => {
                Criteria::Invalid(format!("{operator} on {field} needs text"))
            }
            _ => Criteria::Leaf(Leaf {
                field,
                operator,
                value,
            }),
        }
    }

    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Eq, value)
    }

    /// `field in values`
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::leaf(field, Operator::In, Value::Array(values))
    }

    /// Conjunction of `self` and `other`.
    #[must_use]
    pub fn and(self, other: Criteria) -> Self {
        match self {
            Criteria::All => other,
            Criteria::And(mut items) => {
                items.push(other);
                Criteria::And(items)
            }
            current => Criteria::And(vec![current, other]),
        }
    }

    /// Whether this tree imposes no constraint.
    pub fn is_all(&self) -> bool {
        match self {
            Criteria::All => true,
            Criteria::And(items) | Criteria::Or(items) => items.iter().all(Criteria::is_all),
            Criteria::Native(Value::Map(map)) => map.is_empty(),
            _ => false,
        }
    }

    /// Ids this tree is restricted to, when that can be read off the tree.
    ///
    /// Used to invalidate single cache entries instead of a whole bucket.
    pub fn referenced_ids(&self) -> Option<Vec<Value>> {
        match self {
            Criteria::Leaf(Leaf {
                field,
                operator: Operator::Eq,
                value,
            }) if field == ID_FIELD && !value.is_null() => Some(vec![value.clone()]),
            Criteria::Leaf(Leaf {
                field,
                operator: Operator::In,
                value: Value::Array(ids),
            }) if field == ID_FIELD => Some(ids.clone()),
            Criteria::And(items) => items.iter().find_map(Criteria::referenced_ids),
            _ => None,
        }
    }

    /// Every field a leaf of this tree refers to.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Criteria::Leaf(leaf) => {
                out.insert(leaf.field.clone());
            }
            Criteria::And(items) | Criteria::Or(items) => {
                for item in items {
                    item.collect_fields(out);
                }
            }
            _ => {}
        }
    }

    /// Coerces leaf operands to the declared field types.
    #[must_use]
    pub fn normalized(self, meta: &EntityMeta) -> Self {
        match self {
            Criteria::Leaf(leaf) => {
                let value = match (leaf.operator, leaf.value) {
                    (Operator::In | Operator::Nin, Value::Array(items)) => Value::Array(
                        items
                            .into_iter()
                            .map(|v| meta.parse_value(&leaf.field, v))
                            .collect(),
                    ),
                    (op, v) if op.is_text_match() => v,
                    (_, v) => meta.parse_value(&leaf.field, v),
                };
                Criteria::Leaf(Leaf { value, ..leaf })
            }
            Criteria::And(items) => {
                Criteria::And(items.into_iter().map(|c| c.normalized(meta)).collect())
            }
            Criteria::Or(items) => {
                Criteria::Or(items.into_iter().map(|c| c.normalized(meta)).collect())
            }
            other => other,
        }
    }

    /// Parses the JSON wire form.
    ///
    /// `null` and `{}` mean "match all". Objects tagged
    /// `"__type": "relation"` or carrying a `relation` key are relations,
    /// objects with `field` or `operator` keys are leaves, and any other
    /// object (or one tagged `"__type": "mongo"`) is a native filter.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Criteria::All,
            serde_json::Value::Object(obj) if obj.is_empty() => Criteria::All,
            serde_json::Value::Object(obj) => match obj.get("__type").and_then(|t| t.as_str()) {
                Some("relation") => Self::parse_relation(obj),
                Some("mongo") | Some("native") => {
                    let mut native = obj.clone();
                    native.remove("__type");
                    Criteria::Native(Value::from(serde_json::Value::Object(native)))
                }
                Some(_) | None if obj.contains_key("relation") => Self::parse_relation(obj),
                Some(_) | None if obj.contains_key("field") || obj.contains_key("operator") => {
                    Self::parse_leaf(obj)
                }
                _ => Criteria::Native(Value::from(json.clone())),
            },
            _ => Criteria::Invalid("criteria must be an object".into()),
        }
    }

    fn parse_item(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Object(obj) if obj.contains_key("relation") => {
                Self::parse_relation(obj)
            }
            serde_json::Value::Object(obj) => Self::parse_leaf(obj),
            _ => Criteria::Invalid("criteria item must be an object".into()),
        }
    }

    fn parse_relation(obj: &serde_json::Map<String, serde_json::Value>) -> Self {
        let items: Vec<Criteria> = obj
            .get("items")
            .and_then(|i| i.as_array())
            .map(|items| items.iter().map(Self::parse_item).collect())
            .unwrap_or_default();
        match obj.get("relation").and_then(|r| r.as_str()) {
            Some("and") => Criteria::And(items),
            Some("or") => Criteria::Or(items),
            other => Criteria::Invalid(format!("unknown relation {other:?}")),
        }
    }

    fn parse_leaf(obj: &serde_json::Map<String, serde_json::Value>) -> Self {
        let Some(field) = obj.get("field").and_then(|f| f.as_str()) else {
            return Criteria::Invalid("missing field".into());
        };
        let Some(operator) = obj.get("operator").and_then(|o| o.as_str()) else {
            return Criteria::Invalid(format!("missing operator on {field}"));
        };
        match operator.parse::<Operator>() {
            Ok(op) => Criteria::leaf(
                field,
                op,
                obj.get("value").map(Value::from).unwrap_or(Value::Null),
            ),
            Err(reason) => Criteria::Invalid(reason),
        }
    }

    /// Renders the tree in its JSON wire form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Criteria::All => json!({}),
            Criteria::Invalid(reason) => json!({"__type": "invalid", "reason": reason}),
            Criteria::Leaf(leaf) => json!({
                "field": leaf.field,
                "operator": leaf.operator.as_str(),
                "value": leaf.value.to_json(),
            }),
            Criteria::And(items) => Self::relation_json("and", items),
            Criteria::Or(items) => Self::relation_json("or", items),
            Criteria::Native(value) => {
                let mut json = value.to_json();
                if let Some(obj) = json.as_object_mut() {
                    obj.insert("__type".into(), json!("mongo"));
                }
                json
            }
        }
    }

    fn relation_json(relation: &str, items: &[Criteria]) -> serde_json::Value {
        json!({
            "__type": "relation",
            "relation": relation,
            "items": items.iter().map(Criteria::to_json).collect::<Vec<_>>(),
        })
    }
}

impl Serialize for Criteria {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Criteria {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(|json| Criteria::from_json(&json))
    }
}

/// Why `leaf` can never match a row of `meta`, or `None` when it can.
///
/// Structured fields only support null tests, the text matchers need a
/// text field, and every other operand must already have the declared type.
pub(crate) fn unmatchable(meta: &EntityMeta, leaf: &Leaf) -> Option<String> {
    let Some(field) = meta.field_meta(&leaf.field) else {
        return Some(format!("no field {}", leaf.field));
    };
    let field_type = field.field_type;
    let mismatch = |value: &Value| {
        format!(
            "{} operand {} does not fit {}: {field_type:?}",
            leaf.operator,
            value.type_name(),
            leaf.field
        )
    };
    match leaf.operator {
        Operator::In | Operator::Nin if field.is_enveloped() => Some(mismatch(&leaf.value)),
        Operator::In | Operator::Nin => leaf
            .value
            .as_array()
            .unwrap_or_default()
            .iter()
            .find(|item| !item.is_null() && !fits(field_type, item))
            .map(mismatch),
        op if op.is_text_match() => (field.is_enveloped() || !is_textual(field_type))
            .then(|| format!("{op} needs a text field, {} is {field_type:?}", leaf.field)),
        _ if leaf.value.is_null() => None,
        _ if field.is_enveloped() => Some(mismatch(&leaf.value)),
        _ => (!fits(field_type, &leaf.value)).then(|| mismatch(&leaf.value)),
    }
}

fn is_textual(field_type: FieldType) -> bool {
    matches!(
        field_type,
        FieldType::ObjectId
            | FieldType::String
            | FieldType::Password
            | FieldType::Reference
            | FieldType::Time
    )
}

fn fits(field_type: FieldType, value: &Value) -> bool {
    match field_type {
        FieldType::Boolean => matches!(value, Value::Bool(_)),
        FieldType::Int | FieldType::Float => matches!(value, Value::Integer(_) | Value::Float(_)),
        FieldType::Date | FieldType::DateTime => matches!(value, Value::Date(_)),
        t if is_textual(t) => matches!(value, Value::Text(_) | Value::ObjectId(_)),
        _ => false,
    }
}

/// Escapes `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
