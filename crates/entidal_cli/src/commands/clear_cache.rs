//! Clear-cache command implementation.

use entidal_core::Runtime;

/// Runs the clear-cache command.
pub fn run(runtime: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    runtime.service().clear_cache()?;
    let scope = if runtime.is_cluster() { "shared" } else { "local" };
    println!("Cleared the {scope} cache");
    Ok(())
}
