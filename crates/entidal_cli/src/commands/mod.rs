//! CLI command implementations.

pub mod clear_cache;
pub mod get;
pub mod list;
pub mod sync_schema;

use entidal_core::{Config, MetaRegistry, Runtime};
use std::path::Path;
use std::sync::Arc;

/// Opens a runtime from a config file and a metadata file.
pub fn open_runtime(config: &Path, metas: &Path) -> Result<Runtime, Box<dyn std::error::Error>> {
    let config = Config::from_json_file(config)?;
    let metas = MetaRegistry::from_json_file(metas)?;
    if metas.is_empty() {
        return Err("Metadata file declares no entities".into());
    }
    Ok(Runtime::open(config, Arc::new(metas))?)
}
