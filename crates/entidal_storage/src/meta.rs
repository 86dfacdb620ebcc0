//! Entity metadata.
//!
//! An [`EntityMeta`] is the schema record of one logical entity. It is
//! created by the schema management layer and read-only at request time.

use entidal_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the primary key field.
pub const ID_FIELD: &str = "_id";
/// Name of the version counter field.
pub const VERSION_FIELD: &str = "_version";
/// Creation timestamp field.
pub const CREATED_ON_FIELD: &str = "_createdOn";
/// Last modification timestamp field.
pub const MODIFIED_ON_FIELD: &str = "_modifiedOn";
/// Creator field.
pub const CREATED_BY_FIELD: &str = "_createdBy";
/// Last modifier field.
pub const MODIFIED_BY_FIELD: &str = "_modifiedBy";
/// Back-reference from a history row to the row it archived.
pub const HISTORY_OF_FIELD: &str = "_historyOf";

/// Store name used when an entity does not name one.
pub const DEFAULT_STORE: &str = "main";

/// Backend family an entity is persisted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Document-oriented store.
    #[serde(alias = "mongodb")]
    Document,
    /// Relational store.
    #[serde(alias = "mysql")]
    Relational,
    /// Not persisted.
    None,
}

impl Backend {
    /// Short name used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Document => "document",
            Backend::Relational => "relational",
            Backend::None => "none",
        }
    }
}

/// What happens to removed rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoveMode {
    /// Rows are deleted.
    #[default]
    Hard,
    /// Rows are moved to a `<table>_trash` sibling and can be recovered.
    #[serde(alias = "toTrash")]
    Trash,
    /// Every update and removal archives the pre-image in `<table>_history`.
    History,
}

/// Which physical table a read targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repo {
    /// The primary table.
    #[default]
    Primary,
    /// The trash sibling.
    Trash,
}

/// Logical field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Opaque object identifier.
    ObjectId,
    /// Text.
    String,
    /// Hashed password text.
    Password,
    /// Boolean.
    Boolean,
    /// Integer.
    Int,
    /// Floating point number.
    Float,
    /// Calendar date (epoch millis).
    Date,
    /// Time of day as text.
    Time,
    /// Timestamp (epoch millis).
    DateTime,
    /// Uploaded image descriptor.
    Image,
    /// Uploaded file descriptor.
    File,
    /// Raw binary payload.
    Binary,
    /// Nested component owned by the row.
    Component,
    /// Reference to another entity's id.
    Reference,
    /// Free-form object.
    Object,
}

/// Field metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMeta {
    /// Field name.
    pub name: String,
    /// Logical type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether a value is mandatory.
    #[serde(default)]
    pub required: bool,
    /// Whether the field holds an array of values.
    #[serde(default)]
    pub multiple: bool,
    /// Target entity for references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_entity: Option<String>,
    /// Relational column type override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_type: Option<String>,
}

impl FieldMeta {
    /// Creates an optional single-valued field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            multiple: false,
            ref_entity: None,
            persist_type: None,
        }
    }

    /// Marks the field as required.
    #[must_use]
    pub fn required(mut self, value: bool) -> Self {
        self.required = value;
        self
    }

    /// Marks the field as multi-valued.
    #[must_use]
    pub fn multiple(mut self, value: bool) -> Self {
        self.multiple = value;
        self
    }

    /// Sets the reference target.
    #[must_use]
    pub fn ref_entity(mut self, entity: impl Into<String>) -> Self {
        self.ref_entity = Some(entity.into());
        self
    }

    /// Overrides the relational column type.
    #[must_use]
    pub fn persist_type(mut self, sql_type: impl Into<String>) -> Self {
        self.persist_type = Some(sql_type.into());
        self
    }

    /// Whether relational storage keeps this field in a type-tagged envelope.
    pub fn is_enveloped(&self) -> bool {
        self.multiple
            || matches!(
                self.field_type,
                FieldType::Component
                    | FieldType::Object
                    | FieldType::Binary
                    | FieldType::File
                    | FieldType::Image
            )
    }

    /// Relational column type.
    pub fn column_type(&self) -> &str {
        if let Some(t) = &self.persist_type {
            return t;
        }
        if self.is_enveloped() {
            return "TEXT";
        }
        match self.field_type {
            FieldType::Boolean | FieldType::Int | FieldType::Date | FieldType::DateTime => {
                "INTEGER"
            }
            FieldType::Float => "REAL",
            _ => "TEXT",
        }
    }
}

/// Direction of an index key or sort key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// One key of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortField {
    /// Field name.
    pub field: String,
    /// Direction.
    #[serde(default)]
    pub order: SortOrder,
}

impl SortField {
    /// Ascending sort on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    /// Descending sort on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// A declared index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    /// Logical name; the physical name is `<table>_<name>`.
    pub name: String,
    /// Indexed fields in key order.
    pub fields: Vec<SortField>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
    /// Whether rows missing every indexed field are skipped.
    #[serde(default)]
    pub sparse: bool,
    /// Message reported on duplicate key violations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl IndexMeta {
    /// Creates a non-unique index with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            unique: false,
            sparse: false,
            error_message: None,
        }
    }

    /// Appends a key field.
    #[must_use]
    pub fn field(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.fields.push(SortField {
            field: field.into(),
            order,
        });
        self
    }

    /// Sets uniqueness.
    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Sets sparseness.
    #[must_use]
    pub fn sparse(mut self, value: bool) -> Self {
        self.sparse = value;
        self
    }

    /// Sets the duplicate key message.
    #[must_use]
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Physical index name in the store.
    pub fn physical_name(&self, table: &str) -> String {
        format!("{table}_{}", self.name)
    }

    /// Message for a violation of this index.
    pub fn duplicate_message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| format!("duplicate value: {}", self.name))
    }
}

/// Schema record of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    /// Unique logical name.
    pub name: String,
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Backend family.
    pub db: Backend,
    /// Named store within the backend family.
    #[serde(default = "default_store")]
    pub db_name: String,
    /// Physical table or collection name; defaults to the entity name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    /// Declared fields by name.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldMeta>,
    /// Declared indexes.
    #[serde(default)]
    pub indexes: Vec<IndexMeta>,
    /// Soft-delete policy.
    #[serde(default)]
    pub remove_mode: RemoveMode,
    /// Whether the entity holds exactly one row.
    #[serde(default)]
    pub singleton: bool,
    /// Opt out of the service cache.
    #[serde(default)]
    pub no_service_cache: bool,
}

fn default_store() -> String {
    DEFAULT_STORE.to_string()
}

impl EntityMeta {
    /// Creates metadata with no fields.
    pub fn new(name: impl Into<String>, db: Backend) -> Self {
        Self {
            name: name.into(),
            label: None,
            db,
            db_name: default_store(),
            table_name: None,
            fields: BTreeMap::new(),
            indexes: Vec::new(),
            remove_mode: RemoveMode::Hard,
            singleton: false,
            no_service_cache: false,
        }
    }

    /// Sets the physical table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    /// Sets the store name.
    #[must_use]
    pub fn db_name(mut self, name: impl Into<String>) -> Self {
        self.db_name = name.into();
        self
    }

    /// Declares a field.
    #[must_use]
    pub fn field(mut self, field: FieldMeta) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Declares an index.
    #[must_use]
    pub fn index(mut self, index: IndexMeta) -> Self {
        self.indexes.push(index);
        self
    }

    /// Sets the soft-delete policy.
    #[must_use]
    pub fn remove_mode(mut self, mode: RemoveMode) -> Self {
        self.remove_mode = mode;
        self
    }

    /// Sets the singleton flag.
    #[must_use]
    pub fn singleton(mut self, value: bool) -> Self {
        self.singleton = value;
        self
    }

    /// Opts the entity out of the service cache.
    #[must_use]
    pub fn no_service_cache(mut self, value: bool) -> Self {
        self.no_service_cache = value;
        self
    }

    /// Adds the system fields every persisted entity carries.
    ///
    /// `_id` is an object id on the document backend and a 24-character
    /// string elsewhere. Declarations already present are kept.
    #[must_use]
    pub fn with_system_fields(mut self) -> Self {
        let id_type = if self.db == Backend::Document {
            FieldType::ObjectId
        } else {
            FieldType::String
        };
        let system = [
            FieldMeta::new(ID_FIELD, id_type)
                .required(true)
                .persist_type("CHAR(24)"),
            FieldMeta::new(VERSION_FIELD, FieldType::Int),
            FieldMeta::new(CREATED_ON_FIELD, FieldType::DateTime),
            FieldMeta::new(MODIFIED_ON_FIELD, FieldType::DateTime),
            FieldMeta::new(CREATED_BY_FIELD, FieldType::String),
            FieldMeta::new(MODIFIED_BY_FIELD, FieldType::String),
        ];
        for field in system {
            self.fields.entry(field.name.clone()).or_insert(field);
        }
        self
    }

    /// Physical name of the primary table.
    pub fn table_name(&self) -> &str {
        self.table_name.as_deref().unwrap_or(&self.name)
    }

    /// Physical name of the trash sibling.
    pub fn trash_table(&self) -> String {
        format!("{}_trash", self.table_name())
    }

    /// Physical name of the history sibling.
    pub fn history_table(&self) -> String {
        format!("{}_history", self.table_name())
    }

    /// Physical table for a repo.
    pub fn table_for(&self, repo: Repo) -> String {
        match repo {
            Repo::Primary => self.table_name().to_string(),
            Repo::Trash => self.trash_table(),
        }
    }

    /// Looks up a declared field.
    pub fn field_meta(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.get(name)
    }

    /// Finds the declared index with the given physical name.
    pub fn index_by_physical_name(&self, physical: &str) -> Option<&IndexMeta> {
        let table = self.table_name();
        self.indexes
            .iter()
            .find(|i| i.physical_name(table) == physical)
    }

    /// Coerces a loose wire value to the declared type of `field`.
    ///
    /// Undeclared fields pass through unchanged.
    pub fn parse_value(&self, field: &str, value: Value) -> Value {
        match self.field_meta(field) {
            Some(meta) => parse_field_value(meta, value),
            None => value,
        }
    }
}

/// Coerces a loosely typed value to the logical type of `field`.
///
/// Values that cannot be coerced are returned unchanged. Matching against
/// them then simply fails instead of raising an error.
pub fn parse_field_value(field: &FieldMeta, value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Array(items) if field.multiple => Value::Array(
            items
                .into_iter()
                .map(|item| parse_scalar(field.field_type, item))
                .collect(),
        ),
        other => parse_scalar(field.field_type, other),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn parse_scalar(field_type: FieldType, value: Value) -> Value {
    match (field_type, value) {
        (FieldType::ObjectId, Value::Text(s)) => Value::ObjectId(s),
        (
            FieldType::String | FieldType::Password | FieldType::Reference | FieldType::Time,
            Value::ObjectId(s),
        ) => Value::Text(s),
        (FieldType::Boolean, Value::Text(s)) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Text(s),
        },
        (FieldType::Boolean, Value::Integer(n)) => Value::Bool(n != 0),
        (FieldType::Int, Value::Text(s)) => s.trim().parse().map_or(Value::Text(s), Value::Integer),
        (FieldType::Int, Value::Float(f)) if f.fract() == 0.0 => Value::Integer(f as i64),
        (FieldType::Float, Value::Integer(n)) => Value::Float(n as f64),
        (FieldType::Float, Value::Text(s)) => s.trim().parse().map_or(Value::Text(s), Value::Float),
        (FieldType::Date | FieldType::DateTime, Value::Integer(ms)) => Value::Date(ms),
        (FieldType::Date | FieldType::DateTime, Value::Text(s)) => {
            s.trim().parse().map_or(Value::Text(s), Value::Date)
        }
        (_, other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_meta() -> EntityMeta {
        EntityMeta::new("User", Backend::Relational)
            .table("users")
            .field(FieldMeta::new("username", FieldType::String).required(true))
            .field(FieldMeta::new("age", FieldType::Int))
            .field(FieldMeta::new("tags", FieldType::String).multiple(true))
            .index(
                IndexMeta::new("username")
                    .field("username", SortOrder::Asc)
                    .unique(true)
                    .error_message("username already taken"),
            )
            .with_system_fields()
    }

    #[test]
    fn system_fields_are_patched() {
        let meta = user_meta();
        assert_eq!(meta.field_meta(ID_FIELD).unwrap().field_type, FieldType::String);
        assert_eq!(meta.field_meta(VERSION_FIELD).unwrap().field_type, FieldType::Int);
        assert!(meta.field_meta(MODIFIED_BY_FIELD).is_some());

        let doc = EntityMeta::new("Doc", Backend::Document).with_system_fields();
        assert_eq!(doc.field_meta(ID_FIELD).unwrap().field_type, FieldType::ObjectId);
    }

    #[test]
    fn table_names() {
        let meta = user_meta();
        assert_eq!(meta.table_name(), "users");
        assert_eq!(meta.trash_table(), "users_trash");
        assert_eq!(meta.history_table(), "users_history");
        assert_eq!(meta.table_for(Repo::Trash), "users_trash");
        assert_eq!(EntityMeta::new("Plain", Backend::None).table_name(), "Plain");
    }

    #[test]
    fn index_lookup_and_messages() {
        let meta = user_meta();
        let index = meta.index_by_physical_name("users_username").unwrap();
        assert_eq!(index.duplicate_message(), "username already taken");
        assert_eq!(
            IndexMeta::new("email").duplicate_message(),
            "duplicate value: email"
        );
    }

    #[test]
    fn column_types() {
        let meta = user_meta();
        assert_eq!(meta.field_meta("age").unwrap().column_type(), "INTEGER");
        assert_eq!(meta.field_meta("tags").unwrap().column_type(), "TEXT");
        assert_eq!(meta.field_meta(ID_FIELD).unwrap().column_type(), "CHAR(24)");
        assert!(FieldMeta::new("c", FieldType::Component).is_enveloped());
    }

    #[test]
    fn parse_values() {
        let meta = user_meta();
        assert_eq!(meta.parse_value("age", Value::from("42")), Value::Integer(42));
        assert_eq!(meta.parse_value("age", Value::from("x")), Value::from("x"));
        assert_eq!(
            meta.parse_value("tags", Value::Array(vec![Value::ObjectId("a".into())])),
            Value::Array(vec![Value::from("a")])
        );
        assert_eq!(meta.parse_value("unknown", Value::Integer(1)), Value::Integer(1));

        let date = FieldMeta::new("at", FieldType::DateTime);
        assert_eq!(parse_field_value(&date, Value::Integer(5)), Value::Date(5));
        let flag = FieldMeta::new("on", FieldType::Boolean);
        assert_eq!(parse_field_value(&flag, Value::from("true")), Value::Bool(true));
    }

    #[test]
    fn meta_from_json() {
        let meta: EntityMeta = serde_json::from_str(
            r#"{
                "name": "Order",
                "db": "mongodb",
                "removeMode": "toTrash",
                "fields": {"total": {"name": "total", "type": "Float"}},
                "indexes": [{"name": "total", "fields": [{"field": "total", "order": "desc"}]}]
            }"#,
        )
        .unwrap();
        assert_eq!(meta.db, Backend::Document);
        assert_eq!(meta.db_name, DEFAULT_STORE);
        assert_eq!(meta.remove_mode, RemoveMode::Trash);
        assert_eq!(meta.indexes[0].fields[0].order, SortOrder::Desc);
    }
}
