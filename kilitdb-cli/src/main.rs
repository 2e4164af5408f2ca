//! `KilitDB` CLI: key rotation for searchable-encrypted tables.
//!
//! Entities are declared in a TOML config file alongside the currently
//! active key; the `rotate` subcommand re-encrypts one entity's rows and
//! blind indexes under a new key. Invalid input (unknown entity, bad key,
//! bad sort direction) exits with code 2 before touching any rows; runtime
//! failures exit with code 1.

#![warn(clippy::pedantic, clippy::nursery)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use kilitdb::entity::EntityDescriptor;
use kilitdb::epoch::{CipherBackend, KeyEpoch};
use kilitdb::migrate::BatchRotation;
use kilitdb::schema::TableSchema;
use kilitdb::store::{SortDirection, SqliteStore};
use serde::Deserialize;

/// Exit code for rejected input, distinct from runtime failure.
const EXIT_INVALID: u8 = 2;

#[derive(Parser)]
#[command(name = "kilitdb")]
#[command(about = "KilitDB key rotation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-encrypt an entity's rows and blind indexes under a new key
    Rotate(RotateArgs),
}

#[derive(Args)]
struct RotateArgs {
    /// Entity name as declared in the config file
    entity: String,

    /// New key material, hex encoded (32 bytes)
    new_key: String,

    /// Traversal order over the primary key: asc or desc
    #[arg(default_value = "asc")]
    sort_direction: String,

    /// Entity definition file
    #[arg(short, long, default_value = "kilitdb.toml")]
    config: PathBuf,

    /// SQLite database to operate on
    #[arg(short, long)]
    db: PathBuf,
}

/// Config file: the active key plus one entry per encrypted entity.
#[derive(Debug, Deserialize)]
struct Config {
    /// Currently active key, hex encoded. Becomes the old epoch.
    key: String,
    /// Cipher backend name; both epochs use it.
    backend: Option<String>,
    #[serde(default)]
    entities: BTreeMap<String, EntityConfig>,
}

#[derive(Debug, Deserialize)]
struct EntityConfig {
    table: String,
    key_column: String,
    /// Blind-index type discriminator; defaults to the entity name.
    discriminator: Option<String>,
    fields: Vec<String>,
    #[serde(default)]
    indexes: Vec<IndexConfig>,
}

#[derive(Debug, Deserialize)]
struct IndexConfig {
    name: String,
    field: String,
}

/// Failures split by exit code.
#[derive(Debug)]
enum RunError {
    /// Bad input; nothing was touched.
    Invalid(String),
    /// Mid-run failure; already-persisted rows stay migrated.
    Fatal(anyhow::Error),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Rotate(args) => rotate(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Invalid(msg)) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_INVALID)
        }
        Err(RunError::Fatal(err)) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn rotate(args: &RotateArgs) -> Result<(), RunError> {
    let config = load_config(&args.config)?;

    let entity = build_entity(&config, &args.entity)?;

    let backend = match config.backend.as_deref() {
        Some(name) => name
            .parse::<CipherBackend>()
            .map_err(|_| RunError::Invalid(format!("unknown cipher backend: {name}")))?,
        None => CipherBackend::default(),
    };

    let old_epoch = KeyEpoch::from_hex(&config.key, backend).map_err(|err| {
        RunError::Invalid(format!("configured key in {} is invalid: {err}", args.config.display()))
    })?;
    let new_epoch = KeyEpoch::from_hex(&args.new_key, backend)
        .map_err(|err| RunError::Invalid(format!("newKey is invalid: {err}")))?;

    let direction = args
        .sort_direction
        .parse::<SortDirection>()
        .map_err(|_| RunError::Invalid(format!("invalid sort direction: {}", args.sort_direction)))?;

    let mut store = SqliteStore::open(&args.db).map_err(|err| {
        RunError::Fatal(anyhow::anyhow!("cannot open database {}: {err}", args.db.display()))
    })?;

    let report = BatchRotation::new(&entity, &old_epoch, &new_epoch, direction)
        .run_with_progress(&mut store, |progress| {
            eprint!("\rRotating rows: {}/{}", progress.processed, progress.total);
            let _ = std::io::stderr().flush();
        })
        .map_err(|err| RunError::Fatal(anyhow::anyhow!(err)))?;
    eprintln!();

    println!("Updated {} rows.", report.migrated);
    if report.fallback > 0 {
        println!(
            "{} row(s) had unreadable ciphertext and were re-encrypted from their raw values.",
            report.fallback
        );
    }
    println!("You can now set your configured key to the new key.");

    Ok(())
}

fn load_config(path: &Path) -> Result<Config, RunError> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        RunError::Invalid(format!("cannot read config {}: {err}", path.display()))
    })?;
    toml::from_str(&contents)
        .map_err(|err| RunError::Invalid(format!("config {} is malformed: {err}", path.display())))
}

fn build_entity(config: &Config, name: &str) -> Result<EntityDescriptor, RunError> {
    let Some(entity) = config.entities.get(name) else {
        return Err(RunError::Invalid(format!("entity {name} is not defined in the config")));
    };

    let mut builder = TableSchema::builder(&entity.table);
    for field in &entity.fields {
        builder = builder.field(field);
    }
    for index in &entity.indexes {
        builder = builder.blind_index(&index.name, &index.field);
    }
    let schema = builder
        .build()
        .map_err(|err| RunError::Invalid(format!("entity {name}: {err}")))?;

    let discriminator = entity.discriminator.as_deref().unwrap_or(name);
    EntityDescriptor::new(schema, &entity.key_column, discriminator)
        .map_err(|err| RunError::Invalid(format!("entity {name}: {err}")))
}
