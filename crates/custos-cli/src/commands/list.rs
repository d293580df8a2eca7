//! List command implementation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use custos_audit::{AuditService, EntryFilter, Page};
use custos_core::{AuditLogEntry, EventType, Severity};
use tracing::info;

use super::{print_json, OutputFormat};

/// Arguments for the list command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only this event type
    #[arg(short = 't', long)]
    pub event_type: Option<EventType>,

    /// Only this severity
    #[arg(short, long)]
    pub severity: Option<Severity>,

    /// Only entries by this user ID or email
    #[arg(long)]
    pub actor: Option<String>,

    /// Only entries from this IP
    #[arg(long)]
    pub ip: Option<String>,

    /// Only entries at or after this RFC 3339 time
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Only entries at or before this RFC 3339 time
    #[arg(long)]
    pub until: Option<DateTime<Utc>>,

    /// Filter on the archived flag
    #[arg(long)]
    pub archived: Option<bool>,

    /// Filter on the resolved flag
    #[arg(long)]
    pub resolved: Option<bool>,

    /// Page number, starting at 1
    #[arg(long, default_value = "1")]
    pub page: usize,

    /// Entries per page
    #[arg(long)]
    pub page_size: Option<usize>,
}

impl ListArgs {
    /// Converts the flags into a query filter.
    pub fn filter(&self) -> EntryFilter {
        EntryFilter {
            event_type: self.event_type,
            severity: self.severity,
            actor_id: self.actor.clone(),
            ip: self.ip.clone(),
            since: self.since,
            until: self.until,
            archived: self.archived,
            resolved: self.resolved,
        }
    }
}

/// Runs the list command.
pub async fn run(service: &AuditService, args: &ListArgs, format: OutputFormat) -> Result<()> {
    let filter = args.filter();
    info!(?filter, page = args.page, "Listing audit entries");

    let page = service.list_entries(&filter, args.page, args.page_size).await?;
    match format {
        OutputFormat::Json => print_json(&page)?,
        OutputFormat::Text => print_page(&page),
    }
    Ok(())
}

fn print_page(page: &Page) {
    println!(
        "Page {}/{} ({} matching entries)",
        page.page,
        page.total_pages().max(1),
        page.total_count
    );
    println!();
    for entry in &page.entries {
        println!("{}", entry_line(entry));
    }
}

/// One-line rendering of an entry.
pub fn entry_line(entry: &AuditLogEntry) -> String {
    let mut flags = String::new();
    if !entry.success {
        flags.push_str(" FAILED");
    }
    if entry.is_resolved() {
        flags.push_str(" resolved");
    }
    if entry.archived {
        flags.push_str(" archived");
    }
    format!(
        "#{:<6} {} {:<20} {:<8} {:<24} {:<15} {} {}{}",
        entry.sequence,
        entry.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
        entry.event_type.as_str(),
        entry.severity.as_str(),
        entry.actor_key().unwrap_or("-"),
        entry.network.ip,
        entry.request.method,
        entry.request.path,
        flags
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use clap::Parser;
    use custos_core::{AuditEvent, GENESIS_HASH};

    fn entry() -> AuditLogEntry {
        let event = AuditEvent::auth_failure("eve@example.com", "1.2.3.4");
        serde_json::from_value(serde_json::json!({
            "sequence": 7,
            "event_id": "01890a5d-ac96-774b-bcce-b302099a8057",
            "event_type": event.event_type,
            "severity": event.severity,
            "actor": event.actor,
            "network": event.network,
            "request": event.request,
            "target": null,
            "details": null,
            "details_digest": "",
            "timestamp": "2026-03-01T12:00:00Z",
            "success": false,
            "error_message": "invalid credentials",
            "hash": "",
            "prev_hash": GENESIS_HASH,
        }))
        .unwrap()
    }

    #[test]
    fn test_filter_from_flags() {
        let cli = Cli::try_parse_from([
            "custos", "list", "-t", "permission_denied", "--actor", "bob", "--resolved", "false",
            "--since", "2026-01-01T00:00:00Z",
        ])
        .unwrap();
        let Commands::List(args) = cli.command else {
            panic!("expected list");
        };
        let filter = args.filter();
        assert_eq!(filter.event_type, Some(EventType::PermissionDenied));
        assert_eq!(filter.actor_id.as_deref(), Some("bob"));
        assert_eq!(filter.resolved, Some(false));
        assert!(filter.since.is_some());
        assert!(filter.archived.is_none());
    }

    #[test]
    fn test_entry_line() {
        let line = entry_line(&entry());
        assert!(line.starts_with("#7 "));
        assert!(line.contains("AUTH_FAILURE"));
        assert!(line.contains("eve@example.com"));
        assert!(line.ends_with("FAILED"));
    }
}
