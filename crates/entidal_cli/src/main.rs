//! Entidal CLI
//!
//! Maintenance tools for entidal deployments.
//!
//! # Commands
//!
//! - `sync-schema` - Create missing tables, columns and indexes
//! - `list` - Print a page of an entity's rows
//! - `get` - Print one row by id
//! - `clear-cache` - Drop every cached read

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Entidal command-line maintenance tools.
#[derive(Parser)]
#[command(name = "entidal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON runtime configuration
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Path to the JSON array of entity metadata
    #[arg(global = true, short, long)]
    metas: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing tables, columns and indexes
    SyncSchema {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print a page of an entity's rows
    List {
        /// Entity name
        entity: String,

        /// Criteria in their JSON wire form
        #[arg(long)]
        criteria: Option<String>,

        /// Sort keys, `field` or `field:desc`
        #[arg(short, long)]
        sort: Vec<String>,

        /// Fields to include
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// 1-based page number
        #[arg(short, long, default_value = "1")]
        page: u64,

        /// Page size; -1 lists every row
        #[arg(long)]
        page_size: Option<i64>,

        /// Read the trash instead of the primary table
        #[arg(long)]
        trash: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print one row by id
    Get {
        /// Entity name
        entity: String,

        /// Row id
        id: String,

        /// Read the trash instead of the primary table
        #[arg(long)]
        trash: bool,
    },

    /// Drop every cached read
    ClearCache,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.config.ok_or("Config path required")?;
    let metas = cli.metas.ok_or("Metadata path required")?;
    let runtime = commands::open_runtime(&config, &metas)?;

    match cli.command {
        Commands::SyncSchema { format } => {
            commands::sync_schema::run(&runtime, &format)?;
        }
        Commands::List {
            entity,
            criteria,
            sort,
            fields,
            page,
            page_size,
            trash,
            format,
        } => {
            let query = commands::list::ListArgs {
                criteria,
                sort,
                fields,
                page,
                page_size,
                trash,
            };
            commands::list::run(&runtime, &entity, &query, &format)?;
        }
        Commands::Get { entity, id, trash } => {
            commands::get::run(&runtime, &entity, &id, trash)?;
        }
        Commands::ClearCache => {
            commands::clear_cache::run(&runtime)?;
        }
    }

    runtime.close();
    Ok(())
}
