//! Summary command implementation.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use custos_audit::{AuditService, AuditSummary};
use tracing::info;

use super::{print_json, OutputFormat};

/// Arguments for the summary command.
#[derive(Args, Debug)]
pub struct SummaryArgs {
    /// Window start (RFC 3339)
    #[arg(long, conflicts_with = "last_hours")]
    pub since: Option<DateTime<Utc>>,

    /// Window end (RFC 3339)
    #[arg(long)]
    pub until: Option<DateTime<Utc>>,

    /// Window covering the last N hours
    #[arg(long)]
    pub last_hours: Option<u32>,

    /// How many top actors and IPs to show
    #[arg(long)]
    pub top: Option<usize>,
}

impl SummaryArgs {
    fn window(&self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match self.last_hours {
            Some(hours) => (Some(now - Duration::hours(i64::from(hours))), self.until),
            None => (self.since, self.until),
        }
    }
}

/// Runs the summary command.
pub async fn run(service: &AuditService, args: &SummaryArgs, format: OutputFormat) -> Result<()> {
    let (since, until) = args.window(Utc::now());
    info!(?since, ?until, "Summarizing audit chain");

    let summary = service.summary(since, until, args.top).await?;
    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => print_summary(&summary),
    }
    Ok(())
}

fn print_summary(summary: &AuditSummary) {
    println!("Custos Audit Summary");
    println!("====================");
    let bound = |t: Option<DateTime<Utc>>| t.map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
    println!("Window:     {} .. {}", bound(summary.since), bound(summary.until));
    println!("Entries:    {}", summary.total);
    println!("Failures:   {}", summary.failures);
    println!("Unresolved: {}", summary.unresolved);

    println!("\nBy event type:");
    for (event_type, count) in &summary.by_event_type {
        println!("  {:<20} {count}", event_type.as_str());
    }
    println!("\nBy severity:");
    for (severity, count) in &summary.by_severity {
        println!("  {:<20} {count}", severity.as_str());
    }
    println!("\nTop actors:");
    for actor in &summary.top_actors {
        println!("  {:<30} {}", actor.key, actor.count);
    }
    println!("\nTop IPs:");
    for ip in &summary.top_ips {
        println!("  {:<30} {}", ip.key, ip.count);
    }
}
