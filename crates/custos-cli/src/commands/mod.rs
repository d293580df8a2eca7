//! CLI commands and argument parsing.

pub mod archive;
pub mod list;
pub mod resolve;
pub mod submit;
pub mod summary;
pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use custos_audit::{AuditConfig, AuditService};
use custos_store::JournalChainStore;
use serde::Serialize;
use tracing::{debug, info};

/// Custos - tamper-evident audit chain administration
#[derive(Parser)]
#[command(name = "custos")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to the chain journal
    #[arg(long, global = true, env = "CUSTOS_STORE", default_value = "custos-audit.jsonl")]
    pub store: PathBuf,

    /// YAML configuration file
    #[arg(long, global = true, env = "CUSTOS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Append an event to the chain
    Submit(submit::SubmitArgs),

    /// List entries, newest first
    List(list::ListArgs),

    /// Aggregate counts over a time window
    Summary(summary::SummaryArgs),

    /// Verify hashes and links
    Verify(verify::VerifyArgs),

    /// Archive resolved entries past retention
    Archive(archive::ArchiveArgs),

    /// Mark an entry resolved
    Resolve(resolve::ResolveArgs),
}

/// Output format shared by all commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Loads the configuration file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> Result<AuditConfig> {
    let Some(path) = path else {
        return Ok(AuditConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: AuditConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.validate()?;
    debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Opens the journal and builds the service over it.
///
/// Anomaly rules run inline: a CLI invocation is too short-lived for the
/// background worker.
pub async fn open_service(global: &GlobalArgs) -> Result<AuditService> {
    let config = load_config(global.config.as_deref())?;
    let store = JournalChainStore::open(&global.store)
        .await
        .with_context(|| format!("failed to open chain journal {}", global.store.display()))?;
    info!(store = %global.store.display(), "Opened chain journal");

    Ok(AuditService::builder(Arc::new(store))
        .config(config)
        .background_anomalies(false)
        .build()?)
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
