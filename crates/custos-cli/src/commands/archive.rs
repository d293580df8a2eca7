//! Archive command implementation.

use anyhow::Result;
use clap::Args;
use custos_audit::{ArchiveReport, AuditService, ExclusionReason};
use tracing::info;

use super::{print_json, OutputFormat};

/// Arguments for the archive command.
#[derive(Args, Debug)]
pub struct ArchiveArgs {
    /// Archive entries older than this many days (default: from config)
    #[arg(long)]
    pub older_than_days: Option<u32>,

    /// Archive only these sequences
    #[arg(long, value_delimiter = ',')]
    pub sequences: Vec<u64>,

    /// Fail if any considered entry could not be archived
    #[arg(long)]
    pub strict: bool,
}

/// Runs the archive command.
pub async fn run(service: &AuditService, args: &ArchiveArgs, format: OutputFormat) -> Result<()> {
    let days = args
        .older_than_days
        .unwrap_or(service.config().retention.archive_after_days);
    info!(days, explicit = args.sequences.len(), "Archiving audit entries");

    let report = if args.sequences.is_empty() {
        service.archive_older_than(days).await?
    } else {
        service.archive_sequences(&args.sequences, days).await?
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_report(&report),
    }

    if args.strict {
        report.ensure_complete()?;
    }
    Ok(())
}

fn print_report(report: &ArchiveReport) {
    println!("Cutoff:   {}", report.cutoff.to_rfc3339());
    println!("✓ Archived {} entries", report.archived_count);
    if let Some(checkpoint) = &report.checkpoint {
        println!("  Checkpoint at #{}: {}", checkpoint.sequence, checkpoint.hash);
    }
    if !report.excluded.is_empty() {
        println!(
            "  Not archived: {} unresolved, {} too recent",
            report.excluded_count(ExclusionReason::Unresolved),
            report.excluded_count(ExclusionReason::TooRecent)
        );
        println!("\nNot archived:");
        for exclusion in &report.excluded {
            println!("  #{:<6} {}", exclusion.sequence, exclusion.reason);
        }
    }
}
