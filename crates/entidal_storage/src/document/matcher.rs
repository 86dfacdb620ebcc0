//! Native filter evaluation and update application for the in-process store.

use super::{DriverError, DriverResult};
use entidal_codec::{EntityValue, Value};
use regex_lite::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// A native filter prepared for evaluation against many documents.
///
/// Regex patterns are compiled once, when the filter is prepared.
pub(crate) struct Filter<'a> {
    root: &'a Value,
    regexes: HashMap<&'a str, Regex>,
}

impl<'a> Filter<'a> {
    /// Prepares `filter`, rejecting invalid regex patterns up front.
    pub(crate) fn new(filter: &'a Value) -> DriverResult<Self> {
        let mut regexes = HashMap::new();
        collect_regexes(filter, &mut regexes)?;
        Ok(Self {
            root: filter,
            regexes,
        })
    }

    /// Whether `doc` satisfies the filter.
    pub(crate) fn matches(&self, doc: &EntityValue) -> DriverResult<bool> {
        self.matches_value(doc, self.root)
    }

    fn matches_value(&self, doc: &EntityValue, filter: &Value) -> DriverResult<bool> {
        match filter {
            Value::Map(conditions) => self.matches_map(doc, conditions),
            Value::Null => Ok(true),
            other => Err(DriverError::bad_value(format!(
                "filter must be an object, got {}",
                other.type_name()
            ))),
        }
    }

    fn matches_map(&self, doc: &EntityValue, conditions: &BTreeMap<String, Value>) -> DriverResult<bool> {
        for (key, condition) in conditions {
            let ok = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for sub in filter_list(key, condition)? {
                        if !self.matches_value(doc, sub)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" => self.any_match(doc, filter_list(key, condition)?)?,
                "$nor" => !self.any_match(doc, filter_list(key, condition)?)?,
                op if op.starts_with('$') => {
                    return Err(DriverError::bad_value(format!("unknown top level operator: {op}")))
                }
                path => self.eval_condition(field_value(doc, path), condition)?,
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn any_match(&self, doc: &EntityValue, filters: &[Value]) -> DriverResult<bool> {
        for sub in filters {
            if self.matches_value(doc, sub)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn eval_condition(&self, field: Option<&Value>, condition: &Value) -> DriverResult<bool> {
        let Some(ops) = is_operator_doc(condition) else {
            return Ok(equals(field, condition));
        };
        for (op, operand) in ops {
            let ok = match op.as_str() {
                "$eq" => equals(field, operand),
                "$ne" => !equals(field, operand),
                "$gt" => compares(field, operand, Ordering::is_gt),
                "$gte" => compares(field, operand, Ordering::is_ge),
                "$lt" => compares(field, operand, Ordering::is_lt),
                "$lte" => compares(field, operand, Ordering::is_le),
                "$in" => list(op, operand)?.iter().any(|v| equals(field, v)),
                "$nin" => !list(op, operand)?.iter().any(|v| equals(field, v)),
                "$regex" => self.regex_match(field, operand)?,
                "$exists" => field.is_some() == operand.as_bool().unwrap_or(true),
                other => return Err(DriverError::bad_value(format!("unknown operator: {other}"))),
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn regex_match(&self, field: Option<&Value>, operand: &Value) -> DriverResult<bool> {
        let re = operand
            .as_text()
            .and_then(|pattern| self.regexes.get(pattern))
            .ok_or_else(|| DriverError::bad_value("$regex needs a string"))?;
        let is_match = |value: &Value| match value {
            Value::Text(s) | Value::ObjectId(s) => re.is_match(s),
            _ => false,
        };
        Ok(match field {
            Some(Value::Array(items)) => items.iter().any(is_match),
            Some(value) => is_match(value),
            None => false,
        })
    }
}

fn collect_regexes<'a>(filter: &'a Value, out: &mut HashMap<&'a str, Regex>) -> DriverResult<()> {
    let Value::Map(conditions) = filter else {
        return Ok(());
    };
    for (key, condition) in conditions {
        match (key.as_str(), condition) {
            ("$and" | "$or" | "$nor", Value::Array(items)) => {
                for item in items {
                    collect_regexes(item, out)?;
                }
            }
            _ => {
                let Some(Value::Text(pattern)) = is_operator_doc(condition).and_then(|ops| ops.get("$regex")) else {
                    continue;
                };
                if !out.contains_key(pattern.as_str()) {
                    let re = Regex::new(pattern)
                        .map_err(|e| DriverError::bad_value(format!("invalid regex: {e}")))?;
                    out.insert(pattern.as_str(), re);
                }
            }
        }
    }
    Ok(())
}

/// Whether `doc` satisfies the native `filter`.
#[cfg(test)]
pub(crate) fn matches(doc: &EntityValue, filter: &Value) -> DriverResult<bool> {
    Filter::new(filter)?.matches(doc)
}

fn filter_list<'a>(op: &str, value: &'a Value) -> DriverResult<&'a [Value]> {
    match value {
        Value::Array(items) if !items.is_empty() => Ok(items),
        _ => Err(DriverError::bad_value(format!("{op} must be a nonempty array"))),
    }
}

/// Resolves a dotted path.
pub(crate) fn field_value<'a>(doc: &'a EntityValue, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn is_operator_doc(value: &Value) -> Option<&BTreeMap<String, Value>> {
    match value {
        Value::Map(m) if !m.is_empty() && m.keys().all(|k| k.starts_with('$')) => Some(m),
        _ => None,
    }
}

fn list<'a>(op: &str, operand: &'a Value) -> DriverResult<&'a [Value]> {
    operand
        .as_array()
        .ok_or_else(|| DriverError::bad_value(format!("{op} needs an array")))
}

fn equals(field: Option<&Value>, operand: &Value) -> bool {
    match field {
        None => operand.is_null(),
        Some(value) if operand.is_null() => value.is_null(),
        Some(value) => {
            value.loose_eq(operand)
                || matches!(value, Value::Array(items) if items.iter().any(|i| i.loose_eq(operand)))
        }
    }
}

fn compares(field: Option<&Value>, operand: &Value, accept: fn(Ordering) -> bool) -> bool {
    match field {
        None => operand.is_null() && accept(Ordering::Equal),
        Some(Value::Array(items)) if !matches!(operand, Value::Array(_)) => items
            .iter()
            .any(|i| i.compare(operand).is_some_and(accept)),
        Some(value) => value.compare(operand).is_some_and(accept),
    }
}

/// Applies `$set`, `$unset` and `$inc` to `doc`. Returns whether it changed.
pub(crate) fn apply_update(doc: &mut EntityValue, update: &Value) -> DriverResult<bool> {
    let ops = update
        .as_map()
        .ok_or_else(|| DriverError::bad_value("update must be an object"))?;
    let before = doc.clone();
    for (op, fields) in ops {
        let fields = fields
            .as_map()
            .ok_or_else(|| DriverError::bad_value(format!("{op} needs an object")))?;
        match op.as_str() {
            "$set" => {
                for (key, value) in fields {
                    doc.insert(key.clone(), value.clone());
                }
            }
            "$unset" => {
                for key in fields.keys() {
                    doc.remove(key);
                }
            }
            "$inc" => {
                for (key, delta) in fields {
                    let next = match (doc.get(key), delta) {
                        (None | Some(Value::Null), d) => d.clone(),
                        (Some(Value::Integer(a)), Value::Integer(b)) => Value::Integer(a + b),
                        (Some(current), d) => match (current.as_float(), d.as_float()) {
                            (Some(a), Some(b)) => Value::Float(a + b),
                            _ => {
                                return Err(DriverError::bad_value(format!(
                                    "cannot increment non-numeric field {key}"
                                )))
                            }
                        },
                    };
                    doc.insert(key.clone(), next);
                }
            }
            other => {
                return Err(DriverError::bad_value(format!(
                    "unknown update operator: {other}"
                )))
            }
        }
    }
    Ok(*doc != before)
}
