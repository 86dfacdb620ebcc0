//! Get command implementation.

use entidal_codec::Value;
use entidal_core::Runtime;
use entidal_storage::{FindOptions, Repo};

/// Runs the get command.
pub fn run(runtime: &Runtime, entity: &str, id: &str, trash: bool) -> Result<(), Box<dyn std::error::Error>> {
    let options = FindOptions {
        repo: if trash { Repo::Trash } else { Repo::Primary },
        ..FindOptions::default()
    };
    match runtime.service().find_one_by_id(entity, Value::from(id), &options)? {
        Some(row) => println!("{}", serde_json::to_string_pretty(&row)?),
        None => return Err(format!("No {entity} with id {id}").into()),
    }
    Ok(())
}
