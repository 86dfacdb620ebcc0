//! Compiles criteria into parameterized SQL `WHERE` clauses.
//!
//! Every operand is bound as a positional parameter. Field names are checked
//! against the entity metadata and quoted, so no caller text reaches the SQL.

use super::{escape_like, unmatchable, Criteria, Leaf, Operator};
use crate::error::{StorageError, StorageResult};
use crate::meta::{EntityMeta, FieldMeta};
use crate::relational::values::to_sql;
use entidal_codec::Value;
use rusqlite::types::Value as SqlValue;
use tracing::trace;

/// A compiled `WHERE` clause and its parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlWhere {
    /// Boolean expression, or `None` when every row matches.
    pub clause: Option<String>,
    /// Positional parameters in placeholder order.
    pub params: Vec<SqlValue>,
}

impl SqlWhere {
    /// The clause with its `WHERE` keyword, or an empty string.
    pub fn to_sql(&self) -> String {
        match &self.clause {
            Some(clause) => format!(" WHERE {clause}"),
            None => String::new(),
        }
    }
}

/// Quotes an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Compiles `criteria` for a read.
///
/// Leaves on undeclared fields or with mistyped operands compile to a
/// clause that matches nothing.
///
/// # Errors
///
/// Fails on native document filters.
pub fn compile(criteria: &Criteria, meta: &EntityMeta) -> StorageResult<SqlWhere> {
    let mut params = Vec::new();
    let clause = compile_node(criteria, meta, &mut params)?;
    Ok(SqlWhere { clause, params })
}

/// Compiles `criteria` for a bulk delete, rejecting an empty filter.
///
/// # Errors
///
/// Returns [`StorageError::UnboundedDelete`] when the criteria match all rows.
pub fn compile_for_delete(criteria: &Criteria, meta: &EntityMeta) -> StorageResult<SqlWhere> {
    let compiled = compile(criteria, meta)?;
    if compiled.clause.is_none() {
        return Err(StorageError::UnboundedDelete);
    }
    Ok(compiled)
}

fn compile_node(
    criteria: &Criteria,
    meta: &EntityMeta,
    params: &mut Vec<SqlValue>,
) -> StorageResult<Option<String>> {
    match criteria {
        Criteria::All => Ok(None),
        Criteria::Invalid(_) => Ok(Some("1 = 0".into())),
        Criteria::Leaf(leaf) => match (unmatchable(meta, leaf), meta.field_meta(&leaf.field)) {
            (None, Some(field)) => compile_leaf(leaf, field, params).map(Some),
            (reason, _) => {
                trace!(entity = %meta.name, ?reason, "leaf matches nothing");
                Ok(Some("1 = 0".into()))
            }
        },
        Criteria::And(items) => {
            let mut parts = Vec::new();
            for item in items {
                if let Some(part) = compile_node(item, meta, params)? {
                    parts.push(part);
                }
            }
            Ok(join(parts, " AND "))
        }
        Criteria::Or(items) => {
            if items.iter().any(Criteria::is_all) {
                return Ok(None);
            }
            let mut parts = Vec::new();
            for item in items {
                if let Some(part) = compile_node(item, meta, params)? {
                    parts.push(part);
                }
            }
            Ok(join(parts, " OR "))
        }
        Criteria::Native(_) => Err(StorageError::bad_criteria(
            "native document filters cannot run on a relational store",
        )),
    }
}

fn join(parts: Vec<String>, separator: &str) -> Option<String> {
    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => Some(format!("({})", parts.join(separator))),
    }
}

fn compile_leaf(leaf: &Leaf, field: &FieldMeta, params: &mut Vec<SqlValue>) -> StorageResult<String> {
    let col = quote_ident(&leaf.field);
    let value = &leaf.value;
    let sql = match leaf.operator {
        Operator::Eq if value.is_null() => format!("{col} IS NULL"),
        Operator::Ne if value.is_null() => format!("{col} IS NOT NULL"),
        Operator::Eq => {
            params.push(to_sql(Some(field), value)?);
            format!("{col} = ?")
        }
        // Documents without the field match `$ne`, so NULL columns do too.
        Operator::Ne => {
            params.push(to_sql(Some(field), value)?);
            format!("({col} <> ? OR {col} IS NULL)")
        }
        Operator::Gte | Operator::Lte if value.is_null() => format!("{col} IS NULL"),
        Operator::Gt | Operator::Lt if value.is_null() => "1 = 0".to_string(),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let op = match leaf.operator {
                Operator::Gt => ">",
                Operator::Gte => ">=",
                Operator::Lt => "<",
                _ => "<=",
            };
            params.push(to_sql(Some(field), value)?);
            format!("{col} {op} ?")
        }
        Operator::In | Operator::Nin => {
            let items = value.as_array().unwrap_or_default();
            let has_null = items.iter().any(Value::is_null);
            let mut placeholders = Vec::new();
            for item in items.iter().filter(|v| !v.is_null()) {
                params.push(to_sql(Some(field), item)?);
                placeholders.push("?");
            }
            let list = placeholders.join(", ");
            match (leaf.operator, placeholders.is_empty(), has_null) {
                (Operator::In, true, false) => "1 = 0".to_string(),
                (Operator::In, true, true) => format!("{col} IS NULL"),
                (Operator::In, false, false) => format!("{col} IN ({list})"),
                (Operator::In, false, true) => format!("({col} IN ({list}) OR {col} IS NULL)"),
                (_, true, false) => "1 = 1".to_string(),
                (_, true, true) => format!("{col} IS NOT NULL"),
                (_, false, false) => format!("({col} NOT IN ({list}) OR {col} IS NULL)"),
                (_, false, true) => format!("({col} NOT IN ({list}) AND {col} IS NOT NULL)"),
            }
        }
        Operator::Start | Operator::End | Operator::Contain => {
            let text = escape_like(value.as_text().unwrap_or_default());
            let pattern = match leaf.operator {
                Operator::Start => format!("{text}%"),
                Operator::End => format!("%{text}"),
                _ => format!("%{text}%"),
            };
            params.push(SqlValue::Text(pattern));
            format!("(typeof({col}) = 'text' AND {col} LIKE ? ESCAPE '\\')")
        }
    };
    Ok(sql)
}
