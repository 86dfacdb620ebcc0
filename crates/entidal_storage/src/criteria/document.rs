//! Compiles criteria into document-store filter objects.

use super::{unmatchable, Criteria, Leaf, Operator};
use crate::error::{StorageError, StorageResult};
use crate::meta::EntityMeta;
use entidal_codec::Value;
use std::collections::BTreeMap;

type Filter = BTreeMap<String, Value>;

/// Compiles `criteria` for a read.
///
/// `and` children are merged into one object, conditions on the same field
/// are merged per operator, and conflicting conditions fall back to `$and`.
/// Leaves on undeclared fields or with mistyped operands match nothing.
pub fn compile(criteria: &Criteria, meta: &EntityMeta) -> Value {
    Value::Map(compile_filter(criteria, meta))
}

/// Compiles `criteria` for a bulk delete, rejecting an empty filter.
///
/// # Errors
///
/// Returns [`StorageError::UnboundedDelete`] when the criteria match all rows.
pub fn compile_for_delete(criteria: &Criteria, meta: &EntityMeta) -> StorageResult<Value> {
    if criteria.is_all() {
        return Err(StorageError::UnboundedDelete);
    }
    Ok(compile(criteria, meta))
}

fn match_nothing() -> Filter {
    // `$nor` of the empty filter is false for every document.
    let mut filter = Filter::new();
    filter.insert("$nor".into(), Value::Array(vec![Value::Map(Filter::new())]));
    filter
}

fn compile_filter(criteria: &Criteria, meta: &EntityMeta) -> Filter {
    match criteria {
        Criteria::All => Filter::new(),
        Criteria::Invalid(_) => match_nothing(),
        Criteria::Leaf(leaf) if unmatchable(meta, leaf).is_some() => match_nothing(),
        Criteria::Leaf(leaf) => compile_leaf(leaf),
        Criteria::And(items) => {
            let mut merged = Filter::new();
            let mut overflow = Vec::new();
            for item in items.iter().filter(|c| !c.is_all()) {
                merge_into(&mut merged, compile_filter(item, meta), &mut overflow);
            }
            if !overflow.is_empty() {
                match merged.get_mut("$and") {
                    Some(Value::Array(existing)) => existing.extend(overflow),
                    _ => {
                        merged.insert("$and".into(), Value::Array(overflow));
                    }
                }
            }
            merged
        }
        Criteria::Or(items) => {
            if items.is_empty() || items.iter().any(Criteria::is_all) {
                return Filter::new();
            }
            let mut filter = Filter::new();
            filter.insert(
                "$or".into(),
                Value::Array(
                    items
                        .iter()
                        .map(|c| Value::Map(compile_filter(c, meta)))
                        .collect(),
                ),
            );
            filter
        }
        Criteria::Native(Value::Map(native)) => native.clone(),
        Criteria::Native(_) => match_nothing(),
    }
}

fn compile_leaf(leaf: &Leaf) -> Filter {
    let condition = match leaf.operator {
        Operator::Eq if !matches!(leaf.value, Value::Map(_)) => leaf.value.clone(),
        Operator::Eq => op_doc("$eq", leaf.value.clone()),
        Operator::Ne => op_doc("$ne", leaf.value.clone()),
        Operator::Gt => op_doc("$gt", leaf.value.clone()),
        Operator::Gte => op_doc("$gte", leaf.value.clone()),
        Operator::Lt => op_doc("$lt", leaf.value.clone()),
        Operator::Lte => op_doc("$lte", leaf.value.clone()),
        Operator::In => op_doc("$in", leaf.value.clone()),
        Operator::Nin => op_doc("$nin", leaf.value.clone()),
        Operator::Start | Operator::End | Operator::Contain => {
            let text = regex_lite::escape(leaf.value.as_text().unwrap_or_default());
            let pattern = match leaf.operator {
                Operator::Start => format!("^{text}"),
                Operator::End => format!("{text}$"),
                _ => text,
            };
            op_doc("$regex", Value::Text(pattern))
        }
    };
    let mut filter = Filter::new();
    filter.insert(leaf.field.clone(), condition);
    filter
}

fn op_doc(op: &str, value: Value) -> Value {
    let mut doc = Filter::new();
    doc.insert(op.to_string(), value);
    Value::Map(doc)
}

fn is_operator_doc(value: &Value) -> bool {
    matches!(value, Value::Map(m) if !m.is_empty() && m.keys().all(|k| k.starts_with('$')))
}

fn merge_into(target: &mut Filter, child: Filter, overflow: &mut Vec<Value>) {
    for (key, condition) in child {
        match target.get_mut(&key) {
            None => {
                target.insert(key, condition);
            }
            Some(existing) if !key.starts_with('$') => match merge_conditions(existing, &condition) {
                Some(merged) => *existing = merged,
                None => overflow.push(single(key, condition)),
            },
            Some(_) => overflow.push(single(key, condition)),
        }
    }
}

fn single(key: String, condition: Value) -> Value {
    let mut filter = Filter::new();
    filter.insert(key, condition);
    Value::Map(filter)
}

/// Merges two conditions on one field, or returns `None` when they cannot
/// share an object (for example two different `$gt` bounds).
fn merge_conditions(a: &Value, b: &Value) -> Option<Value> {
    let as_ops = |v: &Value| -> Filter {
        if is_operator_doc(v) {
            v.as_map().cloned().unwrap_or_default()
        } else {
            let mut ops = Filter::new();
            ops.insert("$eq".into(), v.clone());
            ops
        }
    };
    let mut merged = as_ops(a);
    for (op, value) in as_ops(b) {
        match merged.get(&op) {
            Some(existing) if existing != &value => return None,
            Some(_) => {}
            None => {
                merged.insert(op, value);
            }
        }
    }
    Some(Value::Map(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Backend, FieldMeta, FieldType, ID_FIELD};
    use serde_json::json;

    fn meta() -> EntityMeta {
        EntityMeta::new("Item", Backend::Document)
            .field(FieldMeta::new("a", FieldType::Int))
            .field(FieldMeta::new("x", FieldType::Int))
            .field(FieldMeta::new("y", FieldType::String))
            .field(FieldMeta::new("n", FieldType::String))
            .field(FieldMeta::new("tags", FieldType::String).multiple(true))
            .with_system_fields()
    }

    fn compiled(criteria: &Criteria) -> serde_json::Value {
        compile(criteria, &meta()).to_json()
    }

    #[test]
    fn leaf_operators() {
        assert_eq!(compiled(&Criteria::eq("a", 1)), json!({"a": 1}));
        assert_eq!(
            compiled(&Criteria::leaf("a", Operator::Ne, 1)),
            json!({"a": {"$ne": 1}})
        );
        assert_eq!(
            compiled(&Criteria::is_in("a", vec![Value::Integer(1)])),
            json!({"a": {"$in": [1]}})
        );
        assert_eq!(
            compiled(&Criteria::leaf("n", Operator::Start, "Jo")),
            json!({"n": {"$regex": "^Jo"}})
        );
        assert_eq!(
            compiled(&Criteria::leaf("n", Operator::End, "a.b")),
            json!({"n": {"$regex": "a\\.b$"}})
        );
    }

    #[test]
    fn and_merges_per_field() {
        let criteria = Criteria::And(vec![
            Criteria::leaf("x", Operator::Gt, 1),
            Criteria::leaf("x", Operator::Lt, 5),
            Criteria::eq("y", "b"),
        ]);
        assert_eq!(
            compiled(&criteria),
            json!({"x": {"$gt": 1, "$lt": 5}, "y": "b"})
        );
    }

    #[test]
    fn conflicting_conditions_fall_back_to_and() {
        let criteria = Criteria::And(vec![
            Criteria::leaf("x", Operator::Gt, 1),
            Criteria::leaf("x", Operator::Gt, 3),
        ]);
        assert_eq!(
            compiled(&criteria),
            json!({"x": {"$gt": 1}, "$and": [{"x": {"$gt": 3}}]})
        );
    }

    #[test]
    fn equality_merges_with_range() {
        let criteria = Criteria::And(vec![
            Criteria::eq("x", 2),
            Criteria::leaf("x", Operator::Lte, 5),
        ]);
        assert_eq!(compiled(&criteria), json!({"x": {"$eq": 2, "$lte": 5}}));
    }

    #[test]
    fn or_and_invalid() {
        let criteria = Criteria::Or(vec![Criteria::eq("a", 1), Criteria::Invalid("x".into())]);
        assert_eq!(
            compiled(&criteria),
            json!({"$or": [{"a": 1}, {"$nor": [{}]}]})
        );
        let widened = Criteria::Or(vec![Criteria::eq("a", 1), Criteria::All]);
        assert_eq!(compiled(&widened), json!({}));
    }

    #[test]
    fn empty_or_matches_everything() {
        assert_eq!(compiled(&Criteria::Or(vec![])), json!({}));
        let nested = Criteria::And(vec![Criteria::eq("a", 1), Criteria::Or(vec![])]);
        assert_eq!(compiled(&nested), json!({"a": 1}));
    }

    #[test]
    fn unmatchable_leaves_match_nothing() {
        let nothing = json!({"$nor": [{}]});
        assert_eq!(compiled(&Criteria::eq("nope", 1)), nothing);
        assert_eq!(compiled(&Criteria::leaf("a", Operator::Lt, "abc")), nothing);
        assert_eq!(compiled(&Criteria::leaf("a", Operator::Contain, "1")), nothing);
        assert_eq!(compiled(&Criteria::eq("tags", "x")), nothing);
        assert_eq!(compiled(&Criteria::eq("tags", Value::Null)), json!({"tags": null}));
    }

    #[test]
    fn delete_requires_criteria() {
        assert!(matches!(
            compile_for_delete(&Criteria::All, &meta()),
            Err(StorageError::UnboundedDelete)
        ));
        assert!(compile_for_delete(&Criteria::eq(ID_FIELD, Value::ObjectId("a".into())), &meta()).is_ok());
    }

    #[test]
    fn native_passthrough() {
        let native = Criteria::from_json(&json!({"age": {"$gte": 21}}));
        assert_eq!(compiled(&native), json!({"age": {"$gte": 21}}));
        let nested = Criteria::from_json(&json!({"address.city": "Oslo"}));
        assert_eq!(compiled(&nested), json!({"address.city": "Oslo"}));
    }
}
