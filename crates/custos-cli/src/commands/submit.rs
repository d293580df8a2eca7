//! Submit command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use custos_audit::AuditService;
use custos_core::{Actor, AuditEvent, EventType, Severity, Target};
use tracing::info;

use super::{print_json, OutputFormat};

/// Arguments for the submit command.
#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Read the event as JSON from this file instead of the flags below
    #[arg(long, conflicts_with_all = ["event_type", "severity"])]
    pub file: Option<PathBuf>,

    /// Event type, e.g. AUTH_FAILURE
    #[arg(short = 't', long, required_unless_present = "file")]
    pub event_type: Option<EventType>,

    /// Severity (LOW, MEDIUM, HIGH, CRITICAL)
    #[arg(short, long, required_unless_present = "file")]
    pub severity: Option<Severity>,

    /// Client IP address
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: String,

    /// Request path
    #[arg(long, default_value = "/")]
    pub path: String,

    /// HTTP method
    #[arg(long, default_value = "POST")]
    pub method: String,

    /// Acting user ID
    #[arg(long)]
    pub user: Option<String>,

    /// Acting user email
    #[arg(long)]
    pub email: Option<String>,

    /// Acting user role
    #[arg(long)]
    pub role: Option<String>,

    /// Client user agent
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Target as TYPE:ID, e.g. post:42
    #[arg(long)]
    pub target: Option<String>,

    /// Details payload as a JSON object
    #[arg(long)]
    pub details: Option<String>,

    /// Mark the action as failed with this message
    #[arg(long)]
    pub error: Option<String>,

    /// Apply the severity failure policy instead of always failing on error
    #[arg(long)]
    pub policy: bool,
}

/// Runs the submit command.
pub async fn run(service: &AuditService, args: &SubmitArgs, format: OutputFormat) -> Result<()> {
    let event = build_event(args)?;
    info!(event_type = %event.event_type, severity = %event.severity, "Submitting audit event");

    let receipt = if args.policy {
        match service.record(event).await? {
            Some(receipt) => receipt,
            None => {
                println!("Event dropped (fail-open severity); see logs");
                return Ok(());
            }
        }
    } else {
        service.submit_event(event).await?
    };

    match format {
        OutputFormat::Json => print_json(&receipt)?,
        OutputFormat::Text => {
            println!("✓ Appended entry #{}", receipt.sequence);
            println!("  Event ID: {}", receipt.event_id);
            println!("  Hash:     {}", receipt.hash);
            if receipt.attempts > 1 {
                println!("  Attempts: {}", receipt.attempts);
            }
        }
    }
    Ok(())
}

/// Builds the event from a JSON file or from the flags.
pub fn build_event(args: &SubmitArgs) -> Result<AuditEvent> {
    if let Some(path) = &args.file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read event file {}", path.display()))?;
        return serde_json::from_str(&content)
            .with_context(|| format!("failed to parse event file {}", path.display()));
    }

    let (Some(event_type), Some(severity)) = (args.event_type, args.severity) else {
        anyhow::bail!("--event-type and --severity are required without --file");
    };

    let mut event = AuditEvent::new(event_type, severity, &args.ip, &args.path, &args.method);

    if args.user.is_some() || args.email.is_some() || args.role.is_some() {
        event = event.with_actor(Actor {
            user_id: args.user.clone(),
            email: args.email.clone(),
            role: args.role.clone(),
        });
    }
    if let Some(user_agent) = &args.user_agent {
        event = event.with_user_agent(user_agent);
    }
    if let Some(target) = &args.target {
        let (kind, id) = target
            .split_once(':')
            .with_context(|| format!("target '{target}' is not TYPE:ID"))?;
        event = event.with_target(Target::new(kind, id));
    }
    if let Some(details) = &args.details {
        let value = serde_json::from_str(details).context("--details is not valid JSON")?;
        event = event.with_details(value);
    }
    if let Some(message) = &args.error {
        event = event.failed(message);
    }
    Ok(event)
}
