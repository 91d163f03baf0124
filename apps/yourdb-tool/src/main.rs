//! CLI tool for database inspection and maintenance.
//!
//! Commands that replay logs (`count`, `select`, `optimize`) need the
//! record classes the data was written with; pass each one as
//! `--register Class:version`. Identity constructors are used, so entities
//! whose stored versions match the registered version inspect cleanly.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use yourdb_core::{DbConfig, Filter, TypeRegistry, YourDb};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory containing <db>.yourdb
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Register a record class as CLASS:VERSION (repeatable)
    #[arg(long = "register", value_name = "CLASS:VERSION")]
    registrations: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the entities of a database
    List {
        /// Database name (without the .yourdb suffix)
        db: String,
    },

    /// Print an entity's schema
    Schema {
        db: String,
        entity: String,
    },

    /// Count an entity's live records
    Count {
        db: String,
        entity: String,
    },

    /// Run a JSON filter against an entity and print matching records
    Select {
        db: String,
        entity: String,
        /// Filter expression, e.g. '{"salary": {"$gte": 80000}}'
        #[arg(default_value = "null")]
        filter: String,
    },

    /// Compact an entity's logs to one INSERT per live record
    Optimize {
        db: String,
        entity: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let cli = Cli::parse();
    let registry = build_registry(&cli.registrations)?;

    match &cli.command {
        Commands::List { db } => {
            let db = open(db, &cli.root, registry)?;
            let mut names = db.list_entities();
            names.sort();
            for name in names {
                println!("{name}");
            }
        }
        Commands::Schema { db, entity } => {
            // Read straight from disk; no replay needed
            let path = cli
                .root
                .join(format!("{db}.yourdb"))
                .join(entity)
                .join("schema.json");
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("no schema at {}", path.display()))?;
            println!("{contents}");
        }
        Commands::Count { db, entity } => {
            let db = open(db, &cli.root, registry)?;
            println!("{}", db.entity_count(entity)?);
        }
        Commands::Select { db, entity, filter } => {
            let value: serde_json::Value =
                serde_json::from_str(filter).context("filter must be valid JSON")?;
            let filter = Filter::parse(&value)?;
            let db = open(db, &cli.root, registry)?;
            let records = db.select_from(entity, &filter)?;
            for record in &records {
                println!("{record:?}");
            }
            eprintln!("{} record(s)", records.len());
        }
        Commands::Optimize { db, entity } => {
            let db = open(db, &cli.root, registry)?;
            db.optimize_entity(entity)?;
            println!("optimized '{entity}'");
        }
    }
    Ok(())
}

fn open(name: &str, root: &std::path::Path, registry: Arc<TypeRegistry>) -> Result<YourDb> {
    let config = DbConfig {
        root_dir: root.to_path_buf(),
        ..Default::default()
    };
    YourDb::open_with_config(name, registry, config)
        .with_context(|| format!("failed to open database '{name}'"))
}

fn build_registry(registrations: &[String]) -> Result<Arc<TypeRegistry>> {
    let registry = TypeRegistry::new();
    for spec in registrations {
        let Some((class, version)) = spec.split_once(':') else {
            bail!("--register expects CLASS:VERSION, got '{spec}'");
        };
        let version: u32 = version
            .parse()
            .with_context(|| format!("bad version in '{spec}'"))?;
        registry.register(class, version);
    }
    Ok(Arc::new(registry))
}
