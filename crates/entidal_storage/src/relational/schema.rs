//! Additive schema and index reconciliation.
//!
//! Tables and columns are created when missing and never dropped or
//! altered. Declared indexes are compared against the live index list by
//! physical name and created when absent.

use crate::adapter::SchemaReport;
use crate::criteria::sql::quote_ident;
use crate::error::{StorageError, StorageResult};
use crate::meta::{EntityMeta, FieldMeta, RemoveMode, SortOrder, HISTORY_OF_FIELD, ID_FIELD};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use tracing::info;

/// Physical tables backing `meta`, with the extra columns each one carries.
pub(crate) fn tables(meta: &EntityMeta) -> Vec<(String, Vec<FieldMeta>)> {
    let mut out = vec![(meta.table_name().to_string(), Vec::new())];
    match meta.remove_mode {
        RemoveMode::Hard => {}
        RemoveMode::Trash => out.push((meta.trash_table(), Vec::new())),
        RemoveMode::History => {
            let back_reference = meta
                .field_meta(ID_FIELD)
                .map(|id| FieldMeta {
                    name: HISTORY_OF_FIELD.to_string(),
                    required: false,
                    ..id.clone()
                })
                .unwrap_or_else(|| FieldMeta::new(HISTORY_OF_FIELD, crate::meta::FieldType::String));
            out.push((meta.history_table(), vec![back_reference]));
        }
    }
    out
}

fn table_exists(conn: &Connection, table: &str) -> StorageResult<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn existing_columns(conn: &Connection, table: &str) -> StorageResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(names)
}

fn column_def(field: &FieldMeta) -> String {
    let mut def = format!("{} {}", quote_ident(&field.name), field.column_type());
    if field.name == ID_FIELD {
        def.push_str(" PRIMARY KEY NOT NULL");
    }
    def
}

/// Creates missing tables and columns for `meta`.
pub(crate) fn sync_tables(conn: &Connection, meta: &EntityMeta) -> StorageResult<SchemaReport> {
    let mut report = SchemaReport::default();
    for (table, extra) in tables(meta) {
        let fields: Vec<&FieldMeta> = meta.fields.values().chain(extra.iter()).collect();
        if !table_exists(conn, &table)? {
            // `_id` leads so the primary key is the first column.
            let mut defs: Vec<String> = fields
                .iter()
                .filter(|f| f.name == ID_FIELD)
                .map(|f| column_def(f))
                .collect();
            defs.extend(fields.iter().filter(|f| f.name != ID_FIELD).map(|f| column_def(f)));
            conn.execute_batch(&format!(
                "CREATE TABLE {} ({})",
                quote_ident(&table),
                defs.join(", ")
            ))?;
            info!(table = %table, "created table");
            report.created_tables.push(table);
            continue;
        }
        let existing = existing_columns(conn, &table)?;
        for field in fields {
            if existing.contains(&field.name) {
                continue;
            }
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(&table),
                quote_ident(&field.name),
                field.column_type()
            ))?;
            info!(table = %table, column = %field.name, "added column");
            report.added_columns.push(format!("{table}.{}", field.name));
        }
    }
    Ok(report)
}

fn existing_indexes(conn: &Connection, table: &str) -> StorageResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quote_ident(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .map(|name| name.map(|n| n.to_lowercase()))
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(names)
}

/// Creates declared indexes missing from the primary table.
pub(crate) fn sync_indexes(conn: &Connection, meta: &EntityMeta) -> StorageResult<Vec<String>> {
    let table = meta.table_name();
    let existing = existing_indexes(conn, table)?;
    let mut created = Vec::new();
    for index in &meta.indexes {
        let name = index.physical_name(table);
        if existing.contains(&name.to_lowercase()) {
            continue;
        }
        let mut keys = Vec::with_capacity(index.fields.len());
        for key in &index.fields {
            if meta.field_meta(&key.field).is_none() {
                return Err(StorageError::unknown_field(&meta.name, &key.field));
            }
            let order = match key.order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            keys.push(format!("{} {order}", quote_ident(&key.field)));
        }
        let partial = if index.sparse {
            let present: Vec<String> = index
                .fields
                .iter()
                .map(|k| format!("{} IS NOT NULL", quote_ident(&k.field)))
                .collect();
            format!(" WHERE {}", present.join(" OR "))
        } else {
            String::new()
        };
        conn.execute_batch(&format!(
            "CREATE {}INDEX {} ON {} ({}){partial}",
            if index.unique { "UNIQUE " } else { "" },
            quote_ident(&name),
            quote_ident(table),
            keys.join(", ")
        ))?;
        info!(table = %table, index = %name, "created index");
        created.push(name);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Backend, FieldType, IndexMeta};

    fn meta() -> EntityMeta {
        EntityMeta::new("Item", Backend::Relational)
            .table("items")
            .field(FieldMeta::new("name", FieldType::String))
            .index(IndexMeta::new("name").field("name", SortOrder::Asc).unique(true))
            .remove_mode(RemoveMode::History)
            .with_system_fields()
    }

    #[test]
    fn creates_tables_then_only_adds_columns() {
        let conn = Connection::open_in_memory().unwrap();
        let report = sync_tables(&conn, &meta()).unwrap();
        assert_eq!(report.created_tables, vec!["items", "items_history"]);
        let history = existing_columns(&conn, "items_history").unwrap();
        assert!(history.contains(HISTORY_OF_FIELD));

        let extended = meta().field(FieldMeta::new("qty", FieldType::Int));
        let report = sync_tables(&conn, &extended).unwrap();
        assert!(report.created_tables.is_empty());
        assert_eq!(report.added_columns, vec!["items.qty", "items_history.qty"]);
        assert!(sync_tables(&conn, &extended).unwrap().is_empty());
    }

    #[test]
    fn indexes_are_created_once() {
        let conn = Connection::open_in_memory().unwrap();
        let meta = meta();
        sync_tables(&conn, &meta).unwrap();
        assert_eq!(sync_indexes(&conn, &meta).unwrap(), vec!["items_name"]);
        assert!(sync_indexes(&conn, &meta).unwrap().is_empty());
    }

    #[test]
    fn index_on_undeclared_field_fails() {
        let conn = Connection::open_in_memory().unwrap();
        let meta = meta().index(IndexMeta::new("ghost").field("ghost", SortOrder::Asc));
        sync_tables(&conn, &meta).unwrap();
        assert!(matches!(
            sync_indexes(&conn, &meta),
            Err(StorageError::UnknownField { .. })
        ));
    }
}
