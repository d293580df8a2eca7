//! Resolve command implementation.

use anyhow::Result;
use clap::Args;
use custos_audit::AuditService;
use tracing::info;

use super::{list::entry_line, print_json, OutputFormat};

/// Arguments for the resolve command.
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Sequence of the entry to resolve
    pub sequence: u64,

    /// Operator resolving the entry
    #[arg(long, env = "USER")]
    pub by: String,

    /// Resolution notes
    #[arg(long)]
    pub notes: Option<String>,
}

/// Runs the resolve command.
pub async fn run(service: &AuditService, args: &ResolveArgs, format: OutputFormat) -> Result<()> {
    info!(sequence = args.sequence, by = %args.by, "Resolving audit entry");

    let entry = service
        .resolve_entry(args.sequence, &args.by, args.notes.clone())
        .await?;

    match format {
        OutputFormat::Json => print_json(&entry)?,
        OutputFormat::Text => {
            println!("✓ Resolved");
            println!("{}", entry_line(&entry));
            if let Some(at) = entry.resolution.resolved_at {
                println!("  At:    {}", at.to_rfc3339());
            }
            if let Some(notes) = &entry.resolution.notes {
                println!("  Notes: {notes}");
            }
        }
    }
    Ok(())
}
