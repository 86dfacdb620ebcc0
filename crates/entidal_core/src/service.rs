//! The entity access façade.
//!
//! Every call follows the same path: look up the entity, validate the
//! payload, pick the adapter for the entity's backend, execute, then
//! invalidate the cache and fire the entity event. Reads go through the
//! [`CacheLayer`].

use crate::cache::{signature, Bus, CacheLayer, CacheStore, ENTITY_PART, ID_BUCKET, OTHER_BUCKET};
use crate::config::Config;
use crate::context::Context;
use crate::error::{CoreError, CoreResult, UserError};
use crate::events::{EntityEvent, EntityListeners};
use crate::meta::MetaProvider;
use crate::stats::ServiceStats;
use entidal_codec::{EntityValue, Value};
use entidal_storage::{
    now_millis, Backend, Criteria, EntityMeta, FindOptions, PageQuery, RemoveMode, Repo,
    SchemaReport, SortField, StorageAdapter, StoreRegistry, UpdateResult, CREATED_BY_FIELD,
    CREATED_ON_FIELD, ID_FIELD, MODIFIED_BY_FIELD, MODIFIED_ON_FIELD, VERSION_FIELD,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Fields a caller may never write through an update.
const SERVER_OWNED: [&str; 4] = [ID_FIELD, VERSION_FIELD, CREATED_BY_FIELD, CREATED_ON_FIELD];

/// Fields a caller may never write through a create.
const STAMPED_ON_CREATE: [&str; 5] = [
    VERSION_FIELD,
    CREATED_ON_FIELD,
    MODIFIED_ON_FIELD,
    CREATED_BY_FIELD,
    MODIFIED_BY_FIELD,
];

/// Options of an update by criteria.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOptions {
    /// Only update a row still at this version.
    #[serde(default)]
    pub expected_version: Option<i64>,
}

impl UpdateOptions {
    /// Optimistic update of a row expected at `version`.
    pub fn expecting(version: i64) -> Self {
        Self {
            expected_version: Some(version),
        }
    }
}

/// Options of a list call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListOptions {
    /// Filter; matches everything when empty.
    pub criteria: Criteria,
    /// Sort keys; most recently modified first when empty.
    pub sort: Vec<SortField>,
    /// Projection; empty means every field.
    pub included_fields: Vec<String>,
    /// Table to read.
    pub repo: Repo,
    /// 1-based page number.
    pub page_no: Option<u64>,
    /// Rows per page. Negative returns every match.
    pub page_size: Option<i64>,
    /// Skip counting the matches.
    pub without_total: bool,
}

impl ListOptions {
    /// Lists rows matching `criteria`.
    pub fn new(criteria: Criteria) -> Self {
        Self {
            criteria,
            ..Self::default()
        }
    }

    /// Sets the page.
    #[must_use]
    pub fn page(mut self, page_no: u64, page_size: i64) -> Self {
        self.page_no = Some(page_no);
        self.page_size = Some(page_size);
        self
    }

    /// Adds a sort key.
    #[must_use]
    pub fn sort_by(mut self, field: SortField) -> Self {
        self.sort.push(field);
        self
    }

    /// Restricts the returned fields.
    #[must_use]
    pub fn included_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.included_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Reads the trash instead of the primary table.
    #[must_use]
    pub fn repo(mut self, repo: Repo) -> Self {
        self.repo = repo;
        self
    }

    /// Skips the count query.
    #[must_use]
    pub fn without_total(mut self) -> Self {
        self.without_total = true;
        self
    }
}

/// One page of a list call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    /// Rows of the page.
    #[serde(rename = "page")]
    pub rows: Vec<EntityValue>,
    /// Total matches, unless the caller opted out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Page number served.
    pub page_no: u64,
    /// Page size served; negative when every match was returned.
    pub page_size: i64,
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
impl ListResult {
    fn to_value(&self) -> Value {
        let mut map = EntityValue::new();
        map.insert(
            "page".into(),
            Value::Array(self.rows.iter().cloned().map(Value::Map).collect()),
        );
        if let Some(total) = self.total {
            map.insert("total".into(), Value::Integer(total as i64));
        }
        map.insert("pageNo".into(), Value::Integer(self.page_no as i64));
        map.insert("pageSize".into(), Value::Integer(self.page_size));
        Value::Map(map)
    }

    fn from_value(value: &Value) -> CoreResult<Self> {
        let malformed = || CoreError::cache("malformed cached page");
        let rows = value
            .get("page")
            .and_then(Value::as_array)
            .ok_or_else(malformed)?
            .iter()
            .map(|row| row.as_map().cloned().ok_or_else(malformed))
            .collect::<CoreResult<Vec<_>>>()?;
        let integer = |name: &str| value.get(name).and_then(Value::as_integer);
        Ok(Self {
            rows,
            total: integer("total").map(|t| t as u64),
            page_no: integer("pageNo").ok_or_else(malformed)? as u64,
            page_size: integer("pageSize").ok_or_else(malformed)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Paging {
    default_size: u64,
    max_size: u64,
    max_history_size: u64,
}

impl Paging {
    /// Effective page size; `None` means unlimited.
    #[allow(clippy::cast_sign_loss)]
    fn page_size(self, requested: Option<i64>) -> Option<u64> {
        match requested {
            Some(n) if n < 0 => None,
            None | Some(0) => Some(self.default_size),
            Some(n) => Some((n as u64).min(self.max_size)),
        }
    }
}

fn into_row(value: Option<Value>) -> Option<EntityValue> {
    match value {
        Some(Value::Map(row)) => Some(row),
        _ => None,
    }
}

/// Applies the default sort and a stable `_id` tiebreak.
fn effective_sort(sort: &[SortField]) -> Vec<SortField> {
    let mut sort = if sort.is_empty() {
        vec![SortField::desc(MODIFIED_ON_FIELD)]
    } else {
        sort.to_vec()
    };
    if !sort.iter().any(|s| s.field == ID_FIELD) {
        sort.push(SortField::asc(ID_FIELD));
    }
    sort
}

/// The façade every collaborator calls.
pub struct EntityAccessService {
    metas: Arc<dyn MetaProvider>,
    stores: Arc<StoreRegistry>,
    cache: CacheLayer,
    listeners: Arc<EntityListeners>,
    bus: Option<Arc<Bus>>,
    stats: Arc<ServiceStats>,
    paging: Paging,
}

impl std::fmt::Debug for EntityAccessService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityAccessService")
            .field("stores", &self.stores)
            .field("cache", &self.cache)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl EntityAccessService {
    /// Creates a service over connected stores and a cache store.
    pub fn new(
        metas: Arc<dyn MetaProvider>,
        stores: Arc<StoreRegistry>,
        cache_store: Arc<dyn CacheStore>,
        config: &Config,
    ) -> Self {
        let stats = Arc::new(ServiceStats::new());
        Self {
            metas,
            stores,
            cache: CacheLayer::new(cache_store, Arc::clone(&stats)),
            listeners: Arc::new(EntityListeners::new()),
            bus: None,
            stats,
            paging: Paging {
                default_size: config.default_page_size,
                max_size: config.max_page_size,
                max_history_size: config.max_history_page_size,
            },
        }
    }

    /// Publishes entity events to other processes through `bus`.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<Bus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// The cache.
    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    /// Entity event listeners.
    pub fn listeners(&self) -> &Arc<EntityListeners> {
        &self.listeners
    }

    /// Call statistics.
    pub fn stats(&self) -> &Arc<ServiceStats> {
        &self.stats
    }

    /// Metadata source.
    pub fn metas(&self) -> &Arc<dyn MetaProvider> {
        &self.metas
    }

    /// Connected stores.
    pub fn stores(&self) -> &Arc<StoreRegistry> {
        &self.stores
    }

    /// Metadata of `entity`.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchEntity` for unknown entities.
    pub fn entity_meta(&self, entity: &str) -> CoreResult<Arc<EntityMeta>> {
        self.metas
            .entity_meta(entity)
            .ok_or_else(|| UserError::NoSuchEntity(entity.to_string()).into())
    }

    fn adapter(&self, meta: &EntityMeta) -> CoreResult<Arc<dyn StorageAdapter>> {
        Ok(self.stores.adapter(meta)?)
    }

    /// Counts the call and logs its failure.
    fn observe<T>(&self, entity: &str, action: &str, call: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        self.stats.record_call(entity, action);
        let result = call();
        if let Err(err) = &result {
            self.stats.record_error();
            if err.is_server_error() {
                error!(entity, action, code = err.code(), error = %err, "entity call failed");
            } else {
                debug!(entity, action, code = err.code(), error = %err, "entity call rejected");
            }
        }
        result
    }

    /// Invalidates, publishes and dispatches a change.
    fn fire(&self, ctx: &Context, event: &EntityEvent) -> CoreResult<()> {
        self.cache.invalidate(event);
        if let Some(bus) = &self.bus {
            if let Err(err) = bus.publish(event) {
                self.stats.record_cache_error();
                warn!(entity = %event.entity, error = %err, "publishing entity event failed");
            }
        }
        self.listeners.dispatch(ctx, event)
    }

    /// Dispatches an event that another process already applied.
    ///
    /// The shared cache was invalidated by the writer, so only local
    /// listeners run.
    pub(crate) fn dispatch_remote(&self, event: &EntityEvent) -> CoreResult<()> {
        self.listeners.dispatch(&Context::system(), event)
    }

    fn parse_row(meta: &EntityMeta, row: EntityValue) -> EntityValue {
        row.into_iter()
            .map(|(field, value)| {
                let value = meta.parse_value(&field, value);
                (field, value)
            })
            .collect()
    }

    /// Strips server-owned fields and stamps the modifier. `None` when
    /// nothing is left to write.
    fn prepare_patch(ctx: &Context, meta: &EntityMeta, patch: EntityValue) -> Option<EntityValue> {
        let mut patch = Self::parse_row(meta, patch);
        for field in SERVER_OWNED {
            patch.remove(field);
        }
        if patch.is_empty() {
            return None;
        }
        patch.insert(MODIFIED_ON_FIELD.into(), Value::Date(now_millis()));
        patch.insert(MODIFIED_BY_FIELD.into(), Value::from(ctx.operator()));
        Some(patch)
    }

    /// Creates a row and returns its id.
    ///
    /// The row starts at version 1 with equal creation and modification
    /// stamps. The created event fires even when the insert fails.
    ///
    /// # Errors
    ///
    /// Returns `CreateEmpty` for an empty instance and `DupKey` when a unique
    /// index rejects the row.
    pub fn create(&self, ctx: &Context, entity: &str, instance: EntityValue) -> CoreResult<Value> {
        self.observe(entity, "create", || {
            if instance.is_empty() {
                return Err(UserError::CreateEmpty.into());
            }
            let meta = self.entity_meta(entity)?;
            let mut row = Self::parse_row(&meta, instance);
            for field in STAMPED_ON_CREATE {
                row.remove(field);
            }
            if row.get(ID_FIELD).is_some_and(Value::is_null) {
                row.remove(ID_FIELD);
            }
            let now = Value::Date(now_millis());
            row.insert(VERSION_FIELD.into(), Value::Integer(1));
            row.insert(CREATED_ON_FIELD.into(), now.clone());
            row.insert(MODIFIED_ON_FIELD.into(), now);
            row.insert(CREATED_BY_FIELD.into(), Value::from(ctx.operator()));
            row.insert(MODIFIED_BY_FIELD.into(), Value::from(ctx.operator()));

            let inserted = self.adapter(&meta).and_then(|adapter| {
                self.stats.record_write(&meta.name, "insert");
                Ok(adapter.insert(&meta, row)?)
            });
            let mut event = EntityEvent::created(&meta.name);
            if let Ok(id) = &inserted {
                event.ids = Some(vec![id.clone()]);
            }
            let fired = self.fire(ctx, &event);
            let id = inserted?;
            fired?;
            Ok(id)
        })
    }

    /// Updates the first row matching `criteria`.
    ///
    /// `Null` patch values unset fields. Server-owned fields in the patch are
    /// ignored; a patch with nothing else is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentUpdate` when an expected version was given and no
    /// row matched, and `DupKey` on unique violations.
    pub fn update_one_by_criteria(
        &self,
        ctx: &Context,
        entity: &str,
        criteria: &Criteria,
        patch: EntityValue,
        options: &UpdateOptions,
    ) -> CoreResult<UpdateResult> {
        self.observe(entity, "updateOne", || {
            let meta = self.entity_meta(entity)?;
            let Some(patch) = Self::prepare_patch(ctx, &meta, patch) else {
                return Ok(UpdateResult::default());
            };
            let mut criteria = criteria.clone().normalized(&meta);
            if let Some(version) = options.expected_version {
                criteria = criteria.and(Criteria::eq(VERSION_FIELD, version));
            }
            let updated = self.adapter(&meta).and_then(|adapter| {
                self.stats.record_write(&meta.name, "updateOne");
                Ok(adapter.update_one(&meta, &criteria, &patch)?)
            });
            let fired = self.fire(ctx, &EntityEvent::updated(&meta.name, criteria.referenced_ids()));
            let result = updated?;
            fired?;
            if options.expected_version.is_some() && result.matched_count == 0 {
                return Err(UserError::ConcurrentUpdate {
                    entity: meta.name.clone(),
                }
                .into());
            }
            Ok(result)
        })
    }

    /// Updates every row matching `criteria` and returns how many changed.
    ///
    /// # Errors
    ///
    /// Returns `DupKey` on unique violations.
    pub fn update_many_by_criteria(
        &self,
        ctx: &Context,
        entity: &str,
        criteria: &Criteria,
        patch: EntityValue,
    ) -> CoreResult<u64> {
        self.observe(entity, "updateMany", || {
            let meta = self.entity_meta(entity)?;
            let Some(patch) = Self::prepare_patch(ctx, &meta, patch) else {
                return Ok(0);
            };
            let criteria = criteria.clone().normalized(&meta);
            let updated = self.adapter(&meta).and_then(|adapter| {
                self.stats.record_write(&meta.name, "updateMany");
                Ok(adapter.update_many(&meta, &criteria, &patch)?)
            });
            let fired = self.fire(ctx, &EntityEvent::updated(&meta.name, criteria.referenced_ids()));
            let result = updated?;
            fired?;
            Ok(result.modified_count)
        })
    }

    /// Removes every row matching `criteria` according to the entity's
    /// remove mode and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `DeleteAllForbidden` for empty criteria.
    pub fn remove_many_by_criteria(&self, ctx: &Context, entity: &str, criteria: &Criteria) -> CoreResult<u64> {
        self.observe(entity, "removeMany", || {
            let meta = self.entity_meta(entity)?;
            let criteria = criteria.clone().normalized(&meta);
            if criteria.is_all() {
                return Err(UserError::DeleteAllForbidden.into());
            }
            let removed = self.adapter(&meta).and_then(|adapter| {
                self.stats.record_write(&meta.name, "deleteMany");
                Ok(adapter.delete_many(&meta, &criteria)?)
            });
            let fired = self.fire(ctx, &EntityEvent::removed(&meta.name, criteria.referenced_ids()));
            let count = removed?;
            fired?;
            Ok(count)
        })
    }

    /// Moves trashed rows back to the primary table.
    ///
    /// # Errors
    ///
    /// Returns `EmptyOperation` when no ids are given and `DupKey` when a
    /// recovered row conflicts with a live one.
    pub fn recover_many(&self, ctx: &Context, entity: &str, ids: Vec<Value>) -> CoreResult<u64> {
        self.observe(entity, "recoverMany", || {
            if ids.is_empty() {
                return Err(UserError::EmptyOperation.into());
            }
            let meta = self.entity_meta(entity)?;
            let ids: Vec<Value> = ids
                .into_iter()
                .map(|id| meta.parse_value(ID_FIELD, id))
                .collect();
            let recovered = self.adapter(&meta).and_then(|adapter| {
                self.stats.record_write(&meta.name, "recoverMany");
                Ok(adapter.recover_many(&meta, &ids)?)
            });
            let mut event = EntityEvent::created(&meta.name);
            event.ids = Some(ids);
            let fired = self.fire(ctx, &event);
            let count = recovered?;
            fired?;
            Ok(count)
        })
    }

    /// Reads one row by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub fn find_one_by_id(&self, entity: &str, id: Value, options: &FindOptions) -> CoreResult<Option<EntityValue>> {
        self.observe(entity, "findOneById", || {
            let meta = self.entity_meta(entity)?;
            let id = meta.parse_value(ID_FIELD, id);
            let parts = vec![
                ENTITY_PART.to_string(),
                meta.name.clone(),
                ID_BUCKET.to_string(),
                id.to_key_string(),
                signature(&json!({
                    "repo": options.repo,
                    "includedFields": options.included_fields,
                })),
            ];
            let found = self.cache.with_cache(&meta, &parts, || {
                let adapter = self.adapter(&meta)?;
                self.stats.record_query(&meta.name, "findOne");
                let criteria = Criteria::eq(ID_FIELD, id.clone());
                Ok(adapter.find_one(&meta, &criteria, options)?.map(Value::Map))
            })?;
            Ok(into_row(found))
        })
    }

    /// Reads the first row matching `criteria`.
    ///
    /// With empty criteria this returns the row of a singleton entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub fn find_one_by_criteria(
        &self,
        entity: &str,
        criteria: &Criteria,
        options: &FindOptions,
    ) -> CoreResult<Option<EntityValue>> {
        self.observe(entity, "findOneByCriteria", || {
            let meta = self.entity_meta(entity)?;
            let criteria = criteria.clone().normalized(&meta);
            let parts = vec![
                ENTITY_PART.to_string(),
                meta.name.clone(),
                OTHER_BUCKET.to_string(),
                signature(&json!({
                    "kind": "one",
                    "repo": options.repo,
                    "criteria": criteria.to_json(),
                    "includedFields": options.included_fields,
                })),
            ];
            let found = self.cache.with_cache(&meta, &parts, || {
                let adapter = self.adapter(&meta)?;
                self.stats.record_query(&meta.name, "findOne");
                Ok(adapter.find_one(&meta, &criteria, options)?.map(Value::Map))
            })?;
            Ok(into_row(found))
        })
    }

    /// Reads one page of rows.
    ///
    /// Pages are 1-based. The page size defaults to the configured default,
    /// is capped at the configured maximum, and a negative size returns
    /// every match.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub fn list(&self, entity: &str, options: &ListOptions) -> CoreResult<ListResult> {
        self.observe(entity, "list", || self.list_page(entity, options))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn list_page(&self, entity: &str, options: &ListOptions) -> CoreResult<ListResult> {
        let meta = self.entity_meta(entity)?;
        let page_no = options.page_no.unwrap_or(1).max(1);
        let page_size = self.paging.page_size(options.page_size);
        let criteria = options.criteria.clone().normalized(&meta);
        let sort = effective_sort(&options.sort);
        let parts = vec![
            ENTITY_PART.to_string(),
            meta.name.clone(),
            OTHER_BUCKET.to_string(),
            signature(&json!({
                "kind": "list",
                "repo": options.repo,
                "criteria": criteria.to_json(),
                "sort": sort,
                "includedFields": options.included_fields,
                "pageNo": page_no,
                "pageSize": page_size,
                "withoutTotal": options.without_total,
            })),
        ];
        let page = self.cache.with_cache(&meta, &parts, || {
            let adapter = self.adapter(&meta)?;
            self.stats.record_query(&meta.name, "findPage");
            let query = PageQuery {
                criteria: criteria.clone(),
                sort: sort.clone(),
                included_fields: options.included_fields.clone(),
                repo: options.repo,
                skip: page_size.map_or(0, |size| (page_no - 1).saturating_mul(size)),
                limit: page_size,
                without_total: options.without_total,
            };
            let page = adapter.find_page(&meta, &query)?;
            let result = ListResult {
                rows: page.rows,
                total: page.total,
                page_no,
                page_size: page_size.map_or(-1, |size| size as i64),
            };
            Ok(Some(result.to_value()))
        })?;
        match page {
            Some(value) => ListResult::from_value(&value),
            None => Ok(ListResult::default()),
        }
    }

    /// Every row matching `options`, without a total.
    ///
    /// Paging applies only when the options ask for a page size.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub fn find_many_by_criteria(&self, entity: &str, options: ListOptions) -> CoreResult<Vec<EntityValue>> {
        self.observe(entity, "findManyByCriteria", || {
            let options = ListOptions {
                page_size: Some(options.page_size.unwrap_or(-1)),
                without_total: true,
                ..options
            };
            Ok(self.list_page(entity, &options)?.rows)
        })
    }

    /// Every row whose id is in `ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub fn find_many_by_ids(&self, entity: &str, ids: Vec<Value>, options: ListOptions) -> CoreResult<Vec<EntityValue>> {
        self.observe(entity, "findManyByIds", || {
            let options = ListOptions {
                criteria: Criteria::is_in(ID_FIELD, ids),
                page_size: Some(-1),
                without_total: true,
                ..options
            };
            Ok(self.list_page(entity, &options)?.rows)
        })
    }

    /// Archived versions of row `id`, newest first.
    ///
    /// Entities without history have none. The page size is capped at the
    /// configured history maximum.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    #[allow(clippy::cast_possible_wrap)]
    pub fn list_history(&self, entity: &str, id: Value, page_no: u64, page_size: u64) -> CoreResult<ListResult> {
        self.observe(entity, "listHistory", || {
            let meta = self.entity_meta(entity)?;
            let page_no = page_no.max(1);
            let page_size = match page_size {
                0 => self.paging.max_history_size,
                n => n.min(self.paging.max_history_size),
            };
            if meta.remove_mode != RemoveMode::History {
                return Ok(ListResult {
                    rows: Vec::new(),
                    total: Some(0),
                    page_no,
                    page_size: page_size as i64,
                });
            }
            let id = meta.parse_value(ID_FIELD, id);
            let adapter = self.adapter(&meta)?;
            self.stats.record_query(&meta.name, "listHistory");
            let page = adapter.list_history(&meta, &id, (page_no - 1).saturating_mul(page_size), page_size)?;
            Ok(ListResult {
                rows: page.rows,
                total: page.total,
                page_no,
                page_size: page_size as i64,
            })
        })
    }

    /// The archived row `id` at `version`.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchHistory` when that version was never archived.
    pub fn get_history_item(&self, entity: &str, id: Value, version: i64) -> CoreResult<EntityValue> {
        self.observe(entity, "getHistoryItem", || {
            let meta = self.entity_meta(entity)?;
            let id = meta.parse_value(ID_FIELD, id);
            let no_such = || UserError::NoSuchHistory {
                entity: meta.name.clone(),
                id: id.to_key_string(),
                version,
            };
            if meta.remove_mode != RemoveMode::History {
                return Err(no_such().into());
            }
            let adapter = self.adapter(&meta)?;
            self.stats.record_query(&meta.name, "getHistoryItem");
            adapter
                .get_history_item(&meta, &id, version)?
                .ok_or_else(|| no_such().into())
        })
    }

    /// Copies an archived version back over row `id` and returns the row's
    /// new version. Without a version the newest archived one is restored.
    ///
    /// The current row is archived first, so a restore can be undone.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchHistory` when nothing matching was archived.
    pub fn restore_history(&self, ctx: &Context, entity: &str, id: Value, version: Option<i64>) -> CoreResult<i64> {
        self.observe(entity, "restoreHistory", || {
            let meta = self.entity_meta(entity)?;
            let id = meta.parse_value(ID_FIELD, id);
            let no_such = || UserError::NoSuchHistory {
                entity: meta.name.clone(),
                id: id.to_key_string(),
                version: version.unwrap_or_default(),
            };
            if meta.remove_mode != RemoveMode::History {
                return Err(no_such().into());
            }
            let restored = self.adapter(&meta).and_then(|adapter| {
                self.stats.record_write(&meta.name, "restoreHistory");
                Ok(adapter.restore_history(&meta, &id, version, Some(ctx.operator()))?)
            });
            let fired = self.fire(ctx, &EntityEvent::updated(&meta.name, Some(vec![id.clone()])));
            let restored = restored?;
            fired?;
            restored.ok_or_else(|| no_such().into())
        })
    }

    /// Creates missing tables, columns and indexes of every persisted entity.
    ///
    /// # Errors
    ///
    /// Stops at the first entity whose schema cannot be synced.
    pub fn sync_schema(&self) -> CoreResult<SchemaReport> {
        let mut report = SchemaReport::default();
        for meta in self.metas.entity_metas() {
            if meta.db == Backend::None {
                continue;
            }
            let adapter = self.adapter(&meta)?;
            report.merge(adapter.sync_schema(&meta)?);
            report.created_indexes.extend(adapter.create_indexes(&meta)?);
        }
        if !report.is_empty() {
            info!(
                tables = report.created_tables.len(),
                columns = report.added_columns.len(),
                indexes = report.created_indexes.len(),
                "storage schema synced"
            );
        }
        Ok(report)
    }

    /// Drops every cached read.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache store fails.
    pub fn clear_cache(&self) -> CoreResult<()> {
        self.cache.clear_all()
    }
}
