//! Entity persistence over a SQLite [`ConnectionPool`].

use super::pool::ConnectionPool;
use super::schema;
use super::values::{from_sql, to_sql};
use crate::adapter::{FindOptions, Page, PageQuery, SchemaReport, StorageAdapter, UpdateResult};
use crate::criteria::sql::{self, quote_ident, SqlWhere};
use crate::criteria::Criteria;
use crate::error::{StorageError, StorageResult};
use crate::ids::{new_object_id, now_millis};
use crate::meta::{
    Backend, EntityMeta, RemoveMode, SortField, SortOrder, HISTORY_OF_FIELD, ID_FIELD,
    MODIFIED_BY_FIELD, MODIFIED_ON_FIELD, VERSION_FIELD,
};
use entidal_codec::{EntityValue, Value};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, ErrorCode};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

const UNIQUE_FAILED: &str = "UNIQUE constraint failed: ";

/// Bumps `_version` and stamps `_modifiedOn` on a row changing tables.
fn touch(row: &mut EntityValue, now: &Value) {
    let version = row.get(VERSION_FIELD).and_then(Value::as_integer).unwrap_or(0);
    row.insert(VERSION_FIELD.to_string(), Value::Integer(version + 1));
    row.insert(MODIFIED_ON_FIELD.to_string(), now.clone());
}

/// Maps entity operations onto a relational store.
///
/// Each call runs as one unit of work: multi-step writes such as trash
/// moves and history copies commit or roll back together.
#[derive(Clone)]
pub struct RelationalAdapter {
    pool: Arc<ConnectionPool>,
}

impl std::fmt::Debug for RelationalAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalAdapter")
            .field("store", &self.pool.name())
            .finish()
    }
}

/// Converts a SQLite unique violation into [`StorageError::DuplicateKey`].
///
/// The violated columns are matched against the declared unique indexes.
fn classify(meta: &EntityMeta, err: rusqlite::Error) -> StorageError {
    let columns = match &err {
        rusqlite::Error::SqliteFailure(code, Some(message))
            if code.code == ErrorCode::ConstraintViolation =>
        {
            message.strip_prefix(UNIQUE_FAILED).map(|cols| {
                cols.split(',')
                    .map(|c| c.trim().rsplit('.').next().unwrap_or_default().to_string())
                    .collect::<BTreeSet<_>>()
            })
        }
        _ => None,
    };
    let Some(columns) = columns else {
        return StorageError::Sqlite(err);
    };
    let declared = meta.indexes.iter().find(|index| {
        index.unique
            && index.fields.iter().map(|k| k.field.clone()).collect::<BTreeSet<_>>() == columns
    });
    match declared {
        Some(index) => StorageError::DuplicateKey {
            index: Some(index.name.clone()),
            message: index.duplicate_message(),
        },
        None => StorageError::DuplicateKey {
            index: None,
            message: format!(
                "duplicate value: {}",
                columns.into_iter().collect::<Vec<_>>().join(", ")
            ),
        },
    }
}

fn bind(meta: &EntityMeta, field: &str, value: &Value) -> StorageResult<SqlValue> {
    to_sql(meta.field_meta(field), value)
}

/// Reads every row of a prepared query into entity values. NULL columns
/// are left out so unset fields read back as absent.
fn query_rows(
    conn: &Connection,
    meta: &EntityMeta,
    query: &str,
    params: &[SqlValue],
) -> StorageResult<Vec<EntityValue>> {
    let mut stmt = conn.prepare(query)?;
    let names: Vec<String> = stmt.column_names().iter().map(|n| (*n).to_string()).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut value = EntityValue::new();
        for (i, name) in names.iter().enumerate() {
            let decoded = from_sql(meta.field_meta(name), row.get_ref(i)?)?;
            if !decoded.is_null() {
                value.insert(name.clone(), decoded);
            }
        }
        out.push(value);
    }
    Ok(out)
}

fn count(conn: &Connection, table: &str, filter: &SqlWhere) -> StorageResult<u64> {
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(1) FROM {}{}", quote_ident(table), filter.to_sql()),
        params_from_iter(filter.params.iter()),
        |row| row.get(0),
    )?;
    Ok(u64::try_from(total).unwrap_or_default())
}

/// Inserts `row` into `table`. Undeclared fields are rejected unless
/// `copy` is set, as when moving rows between sibling tables.
fn insert_row(
    conn: &Connection,
    meta: &EntityMeta,
    table: &str,
    row: &EntityValue,
    copy: bool,
) -> StorageResult<()> {
    let mut columns = Vec::with_capacity(row.len());
    let mut params = Vec::with_capacity(row.len());
    for (field, value) in row {
        if value.is_null() {
            continue;
        }
        if !copy && meta.field_meta(field).is_none() {
            return Err(StorageError::unknown_field(&meta.name, field));
        }
        columns.push(quote_ident(field));
        params.push(bind(meta, field, value)?);
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(table),
            columns.join(", ")
        ),
        params_from_iter(params.iter()),
    )
    .map_err(|e| classify(meta, e))?;
    Ok(())
}

fn select_all(
    conn: &Connection,
    meta: &EntityMeta,
    table: &str,
    filter: &SqlWhere,
) -> StorageResult<Vec<EntityValue>> {
    query_rows(
        conn,
        meta,
        &format!("SELECT * FROM {}{}", quote_ident(table), filter.to_sql()),
        &filter.params,
    )
}

fn id_where(meta: &EntityMeta, id: &Value) -> StorageResult<SqlWhere> {
    Ok(SqlWhere {
        clause: Some(format!("{} = ?", quote_ident(ID_FIELD))),
        params: vec![bind(meta, ID_FIELD, id)?],
    })
}

/// Copies `pre_image` into the history table under a fresh id.
fn archive(conn: &Connection, meta: &EntityMeta, pre_image: &EntityValue) -> StorageResult<()> {
    let mut copy = pre_image.clone();
    let original = copy.remove(ID_FIELD).unwrap_or(Value::Null);
    copy.insert(HISTORY_OF_FIELD.to_string(), original);
    copy.insert(ID_FIELD.to_string(), Value::Text(new_object_id()));
    insert_row(conn, meta, &meta.history_table(), &copy, true)
}

fn projection(meta: &EntityMeta, included: &[String], criteria: &Criteria) -> String {
    if included.is_empty() {
        return "*".to_string();
    }
    let mut columns: BTreeSet<String> = included
        .iter()
        .filter(|f| meta.field_meta(f).is_some())
        .cloned()
        .collect();
    columns.extend(
        criteria
            .fields()
            .into_iter()
            .filter(|f| meta.field_meta(f).is_some()),
    );
    columns.insert(ID_FIELD.to_string());
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn order_by(meta: &EntityMeta, sort: &[SortField]) -> StorageResult<String> {
    if sort.is_empty() {
        return Ok(String::new());
    }
    let mut keys = Vec::with_capacity(sort.len());
    for key in sort {
        if meta.field_meta(&key.field).is_none() {
            return Err(StorageError::unknown_field(&meta.name, &key.field));
        }
        let order = match key.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        keys.push(format!("{} {order}", quote_ident(&key.field)));
    }
    Ok(format!(" ORDER BY {}", keys.join(", ")))
}

impl RelationalAdapter {
    /// Wraps `pool`.
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Builds `SET` assignments from a patch; nulls clear columns and the
    /// version always increments.
    fn assignments(meta: &EntityMeta, patch: &EntityValue) -> StorageResult<(String, Vec<SqlValue>)> {
        let mut sets = Vec::with_capacity(patch.len() + 1);
        let mut params = Vec::with_capacity(patch.len());
        for (field, value) in patch {
            if field == ID_FIELD || field == VERSION_FIELD {
                continue;
            }
            if meta.field_meta(field).is_none() {
                return Err(StorageError::unknown_field(&meta.name, field));
            }
            sets.push(format!("{} = ?", quote_ident(field)));
            params.push(bind(meta, field, value)?);
        }
        let version = quote_ident(VERSION_FIELD);
        sets.push(format!("{version} = COALESCE({version}, 0) + 1"));
        Ok((sets.join(", "), params))
    }

    fn update(
        &self,
        meta: &EntityMeta,
        criteria: &Criteria,
        patch: &EntityValue,
        single: bool,
    ) -> StorageResult<UpdateResult> {
        let filter = sql::compile(criteria, meta)?;
        let (sets, mut params) = Self::assignments(meta, patch)?;
        let table = quote_ident(meta.table_name());
        self.pool.with_unit(|unit| {
            let conn = unit.write()?;
            let target = if meta.remove_mode == RemoveMode::History {
                let limit = if single { " LIMIT 1" } else { "" };
                let pre_images = query_rows(
                    conn,
                    meta,
                    &format!("SELECT * FROM {table}{}{limit}", filter.to_sql()),
                    &filter.params,
                )?;
                if pre_images.is_empty() {
                    return Ok(UpdateResult::default());
                }
                let mut ids = Vec::with_capacity(pre_images.len());
                for pre_image in &pre_images {
                    archive(conn, meta, pre_image)?;
                    if let Some(id) = pre_image.get(ID_FIELD) {
                        ids.push(bind(meta, ID_FIELD, id)?);
                    }
                }
                let placeholders = vec!["?"; ids.len()].join(", ");
                params.extend(ids);
                format!(" WHERE {} IN ({placeholders})", quote_ident(ID_FIELD))
            } else if single {
                params.extend(filter.params.iter().cloned());
                format!(
                    " WHERE rowid = (SELECT rowid FROM {table}{} LIMIT 1)",
                    filter.to_sql()
                )
            } else {
                params.extend(filter.params.iter().cloned());
                filter.to_sql()
            };
            let changed = conn
                .execute(
                    &format!("UPDATE {table} SET {sets}{target}"),
                    params_from_iter(params.iter()),
                )
                .map_err(|e| classify(meta, e))? as u64;
            Ok(UpdateResult {
                matched_count: changed,
                modified_count: changed,
            })
        })
    }
}

impl StorageAdapter for RelationalAdapter {
    fn backend(&self) -> Backend {
        Backend::Relational
    }

    fn insert(&self, meta: &EntityMeta, mut instance: EntityValue) -> StorageResult<Value> {
        let id = match instance.get(ID_FIELD) {
            Some(id) if !id.is_null() => id.clone(),
            _ => {
                let id = Value::Text(new_object_id());
                instance.insert(ID_FIELD.to_string(), id.clone());
                id
            }
        };
        self.pool.with_unit(|unit| {
            insert_row(unit.write()?, meta, meta.table_name(), &instance, false)
        })?;
        Ok(id)
    }

    fn update_one(
        &self,
        meta: &EntityMeta,
        criteria: &Criteria,
        patch: &EntityValue,
    ) -> StorageResult<UpdateResult> {
        self.update(meta, criteria, patch, true)
    }

    fn update_many(
        &self,
        meta: &EntityMeta,
        criteria: &Criteria,
        patch: &EntityValue,
    ) -> StorageResult<UpdateResult> {
        self.update(meta, criteria, patch, false)
    }

    fn delete_many(&self, meta: &EntityMeta, criteria: &Criteria) -> StorageResult<u64> {
        let filter = sql::compile_for_delete(criteria, meta)?;
        let table = meta.table_name();
        self.pool.with_unit(|unit| {
            let conn = unit.write()?;
            match meta.remove_mode {
                RemoveMode::Hard => {}
                RemoveMode::Trash => {
                    let now = Value::Date(now_millis());
                    for mut row in select_all(conn, meta, table, &filter)? {
                        touch(&mut row, &now);
                        if let Some(id) = row.get(ID_FIELD) {
                            let stale = id_where(meta, id)?;
                            conn.execute(
                                &format!("DELETE FROM {}{}", quote_ident(&meta.trash_table()), stale.to_sql()),
                                params_from_iter(stale.params.iter()),
                            )?;
                        }
                        insert_row(conn, meta, &meta.trash_table(), &row, true)?;
                    }
                }
                RemoveMode::History => {
                    for row in select_all(conn, meta, table, &filter)? {
                        archive(conn, meta, &row)?;
                    }
                }
            }
            let removed = conn.execute(
                &format!("DELETE FROM {}{}", quote_ident(table), filter.to_sql()),
                params_from_iter(filter.params.iter()),
            )?;
            debug!(entity = %meta.name, removed, mode = ?meta.remove_mode, "deleted rows");
            Ok(removed as u64)
        })
    }

    fn recover_many(&self, meta: &EntityMeta, ids: &[Value]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let trash = meta.trash_table();
        let filter = sql::compile(&Criteria::is_in(ID_FIELD, ids.to_vec()), meta)?;
        self.pool.with_unit(|unit| {
            let conn = unit.write()?;
            let rows = select_all(conn, meta, &trash, &filter)?;
            let now = Value::Date(now_millis());
            for mut row in rows.iter().cloned() {
                touch(&mut row, &now);
                insert_row(conn, meta, meta.table_name(), &row, true)?;
            }
            conn.execute(
                &format!("DELETE FROM {}{}", quote_ident(&trash), filter.to_sql()),
                params_from_iter(filter.params.iter()),
            )?;
            Ok(rows.len() as u64)
        })
    }

    fn find_one(
        &self,
        meta: &EntityMeta,
        criteria: &Criteria,
        options: &FindOptions,
    ) -> StorageResult<Option<EntityValue>> {
        let filter = sql::compile(criteria, meta)?;
        let query = format!(
            "SELECT {} FROM {}{} LIMIT 1",
            projection(meta, &options.included_fields, criteria),
            quote_ident(&meta.table_for(options.repo)),
            filter.to_sql()
        );
        self.pool.with_unit(|unit| {
            Ok(query_rows(unit.read(), meta, &query, &filter.params)?
                .into_iter()
                .next())
        })
    }

    fn find_page(&self, meta: &EntityMeta, query: &PageQuery) -> StorageResult<Page> {
        let filter = sql::compile(&query.criteria, meta)?;
        let table = meta.table_for(query.repo);
        let select = format!(
            "SELECT {} FROM {}{}{} LIMIT ? OFFSET ?",
            projection(meta, &query.included_fields, &query.criteria),
            quote_ident(&table),
            filter.to_sql(),
            order_by(meta, &query.sort)?
        );
        let mut params = filter.params.clone();
        params.push(SqlValue::Integer(
            query.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX)),
        ));
        params.push(SqlValue::Integer(i64::try_from(query.skip).unwrap_or(i64::MAX)));
        self.pool.with_unit(|unit| {
            let rows = query_rows(unit.read(), meta, &select, &params)?;
            let total = if query.without_total {
                None
            } else {
                Some(count(unit.read(), &table, &filter)?)
            };
            Ok(Page { rows, total })
        })
    }

    fn list_history(
        &self,
        meta: &EntityMeta,
        id: &Value,
        skip: u64,
        limit: u64,
    ) -> StorageResult<Page> {
        let table = meta.history_table();
        let filter = SqlWhere {
            clause: Some(format!("{} = ?", quote_ident(HISTORY_OF_FIELD))),
            params: vec![bind(meta, ID_FIELD, id)?],
        };
        let select = format!(
            "SELECT * FROM {}{} ORDER BY {} DESC LIMIT ? OFFSET ?",
            quote_ident(&table),
            filter.to_sql(),
            quote_ident(VERSION_FIELD)
        );
        let mut params = filter.params.clone();
        params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        params.push(SqlValue::Integer(i64::try_from(skip).unwrap_or(i64::MAX)));
        self.pool.with_unit(|unit| {
            let rows = query_rows(unit.read(), meta, &select, &params)?;
            let total = count(unit.read(), &table, &filter)?;
            Ok(Page {
                rows,
                total: Some(total),
            })
        })
    }

    fn get_history_item(
        &self,
        meta: &EntityMeta,
        id: &Value,
        version: i64,
    ) -> StorageResult<Option<EntityValue>> {
        let select = format!(
            "SELECT * FROM {} WHERE {} = ? AND {} = ? LIMIT 1",
            quote_ident(&meta.history_table()),
            quote_ident(HISTORY_OF_FIELD),
            quote_ident(VERSION_FIELD)
        );
        let params = vec![bind(meta, ID_FIELD, id)?, SqlValue::Integer(version)];
        self.pool.with_unit(|unit| {
            Ok(query_rows(unit.read(), meta, &select, &params)?
                .into_iter()
                .next())
        })
    }

    fn restore_history(
        &self,
        meta: &EntityMeta,
        id: &Value,
        version: Option<i64>,
        operator: Option<&str>,
    ) -> StorageResult<Option<i64>> {
        let item = match version {
            Some(v) => self.get_history_item(meta, id, v)?,
            None => self.list_history(meta, id, 0, 1)?.rows.into_iter().next(),
        };
        let Some(mut restored) = item else {
            return Ok(None);
        };
        let by_id = id_where(meta, id)?;
        let table = meta.table_name();
        self.pool.with_unit(|unit| {
            let conn = unit.write()?;
            let current = select_all(conn, meta, table, &by_id)?.into_iter().next();
            let base_version = match &current {
                Some(current) => {
                    archive(conn, meta, current)?;
                    conn.execute(
                        &format!("DELETE FROM {}{}", quote_ident(table), by_id.to_sql()),
                        params_from_iter(by_id.params.iter()),
                    )?;
                    current.get(VERSION_FIELD).and_then(Value::as_integer)
                }
                None => None,
            }
            .or_else(|| restored.get(VERSION_FIELD).and_then(Value::as_integer))
            .unwrap_or(0);
            let new_version = base_version + 1;

            restored.remove(HISTORY_OF_FIELD);
            restored.insert(ID_FIELD.to_string(), id.clone());
            restored.insert(VERSION_FIELD.to_string(), Value::Integer(new_version));
            restored.insert(MODIFIED_ON_FIELD.to_string(), Value::Date(now_millis()));
            if let Some(operator) = operator {
                restored.insert(MODIFIED_BY_FIELD.to_string(), Value::from(operator));
            }
            insert_row(conn, meta, table, &restored, true)?;
            Ok(Some(new_version))
        })
    }

    fn sync_schema(&self, meta: &EntityMeta) -> StorageResult<SchemaReport> {
        self.pool
            .with_unit(|unit| schema::sync_tables(unit.write()?, meta))
    }

    fn create_indexes(&self, meta: &EntityMeta) -> StorageResult<Vec<String>> {
        self.pool.with_unit(|unit| {
            schema::sync_indexes(unit.write()?, meta).map_err(|e| match e {
                StorageError::Sqlite(inner) => classify(meta, inner),
                other => other,
            })
        })
    }
}
