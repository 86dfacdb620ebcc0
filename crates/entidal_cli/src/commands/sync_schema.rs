//! Sync-schema command implementation.

use entidal_core::Runtime;
use entidal_storage::SchemaReport;
use serde::Serialize;

/// What a sync changed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Tables created.
    pub created_tables: Vec<String>,
    /// Columns added.
    pub added_columns: Vec<String>,
    /// Indexes created.
    pub created_indexes: Vec<String>,
}

impl From<SchemaReport> for SyncResult {
    fn from(report: SchemaReport) -> Self {
        Self {
            created_tables: report.created_tables,
            added_columns: report.added_columns,
            created_indexes: report.created_indexes,
        }
    }
}

/// Runs the sync-schema command.
pub fn run(runtime: &Runtime, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = SyncResult::from(runtime.sync_storage()?);
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &SyncResult) {
    if result.created_tables.is_empty()
        && result.added_columns.is_empty()
        && result.created_indexes.is_empty()
    {
        println!("Schema is up to date");
        return;
    }
    for (label, items) in [
        ("Created table", &result.created_tables),
        ("Added column", &result.added_columns),
        ("Created index", &result.created_indexes),
    ] {
        for item in items {
            println!("{label}: {item}");
        }
    }
}
