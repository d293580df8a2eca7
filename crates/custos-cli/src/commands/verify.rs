//! Verify command implementation.

use anyhow::Result;
use clap::Args;
use custos_audit::{AuditService, VerificationReport};
use tracing::info;

use super::{print_json, OutputFormat};

/// Arguments for the verify command.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// First sequence to verify (default: 1)
    #[arg(long)]
    pub from: Option<u64>,

    /// Last sequence to verify (default: the tail)
    #[arg(long)]
    pub to: Option<u64>,
}

/// Runs the verify command. A broken chain is reported and then fails the
/// command.
pub async fn run(service: &AuditService, args: &VerifyArgs, format: OutputFormat) -> Result<()> {
    info!(from = ?args.from, to = ?args.to, "Verifying audit chain");

    let report = service.verify_chain(args.from, args.to).await?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_report(&report),
    }

    if !report.valid {
        anyhow::bail!(
            "audit chain broken at sequence {}",
            report.broken_at_sequence.unwrap_or_default()
        );
    }
    Ok(())
}

fn print_report(report: &VerificationReport) {
    println!("Custos Chain Verification");
    println!("=========================");
    println!("Range:   {}..={}", report.from_sequence, report.to_sequence);
    println!("Checked: {}", report.entries_checked);

    if report.valid {
        println!("\n✓ Chain is intact");
        return;
    }

    println!();
    if let Some(sequence) = report.broken_at_sequence {
        println!("✗ Broken at sequence {sequence}");
    }
    if let Some(kind) = report.break_kind {
        println!("  Kind:     {kind}");
    }
    if let Some(expected) = &report.expected_hash {
        println!("  Expected: {expected}");
    }
    if let Some(actual) = &report.actual_hash {
        println!("  Actual:   {actual}");
    }
}
