//! Read-only queries and summaries.
//!
//! Both scan newest-first from a tail captured when the call starts, so an
//! append that lands mid-scan is not half-visible.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use custos_core::{AuditLogEntry, EventType, Severity};
use custos_store::ChainStore;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::QueryLimits;
use crate::error::{AuditError, Result};

/// Filter for [`QueryEngine::list_entries`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryFilter {
    /// Event type.
    pub event_type: Option<EventType>,
    /// Exact severity.
    pub severity: Option<Severity>,
    /// Actor user id or email.
    pub actor_id: Option<String>,
    /// Client IP.
    pub ip: Option<String>,
    /// Inclusive lower bound on the timestamp.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the timestamp.
    pub until: Option<DateTime<Utc>>,
    /// Archived flag.
    pub archived: Option<bool>,
    /// Resolved flag.
    pub resolved: Option<bool>,
}

impl EntryFilter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters on event type.
    #[must_use]
    pub const fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Filters on severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Filters on actor.
    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Filters on client IP.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Restricts to a time range.
    #[must_use]
    pub const fn between(
        mut self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    /// Filters on the archived flag.
    #[must_use]
    pub const fn with_archived(mut self, archived: bool) -> Self {
        self.archived = Some(archived);
        self
    }

    /// Filters on the resolved flag.
    #[must_use]
    pub const fn with_resolved(mut self, resolved: bool) -> Self {
        self.resolved = Some(resolved);
        self
    }

    /// Returns true if `entry` passes every set criterion.
    #[must_use]
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.event_type.map_or(true, |t| entry.event_type == t)
            && self.severity.map_or(true, |s| entry.severity == s)
            && self.actor_id.as_deref().map_or(true, |id| {
                entry.actor.as_ref().is_some_and(|a| {
                    a.user_id.as_deref() == Some(id) || a.email.as_deref() == Some(id)
                })
            })
            && self.ip.as_deref().map_or(true, |ip| entry.network.ip == ip)
            && self.since.map_or(true, |since| entry.timestamp >= since)
            && self.until.map_or(true, |until| entry.timestamp <= until)
            && self.archived.map_or(true, |a| entry.archived == a)
            && self.resolved.map_or(true, |r| entry.is_resolved() == r)
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Entries on this page, newest first.
    pub entries: Vec<AuditLogEntry>,
    /// Matches across all pages.
    pub total_count: u64,
    /// 1-based page number.
    pub page: usize,
    /// Effective page size after clamping.
    pub page_size: usize,
}

impl Page {
    /// Number of pages needed for `total_count`.
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.total_count.div_ceil(self.page_size.max(1) as u64)
    }
}

/// A key and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCount {
    /// Actor key or IP.
    pub key: String,
    /// Number of entries.
    pub count: u64,
}

/// Aggregates over a time window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    /// Window start, if bounded.
    pub since: Option<DateTime<Utc>>,
    /// Window end, if bounded.
    pub until: Option<DateTime<Utc>>,
    /// Entries in the window.
    pub total: u64,
    /// Counts per event type.
    pub by_event_type: BTreeMap<EventType, u64>,
    /// Counts per severity.
    pub by_severity: BTreeMap<Severity, u64>,
    /// Entries with `success == false`.
    pub failures: u64,
    /// Entries not yet resolved.
    pub unresolved: u64,
    /// Most frequent actors, by count then key.
    pub top_actors: Vec<KeyCount>,
    /// Most frequent client IPs, by count then key.
    pub top_ips: Vec<KeyCount>,
}

/// Runs filtered queries and summaries against a [`ChainStore`].
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: Arc<dyn ChainStore>,
    limits: QueryLimits,
}

impl QueryEngine {
    /// Creates a query engine.
    #[must_use]
    pub fn new(store: Arc<dyn ChainStore>, limits: QueryLimits) -> Self {
        Self { store, limits }
    }

    /// Returns the limits in use.
    #[must_use]
    pub const fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// Lists entries matching `filter`, newest first.
    ///
    /// `page` is 1-based (0 is treated as 1); `page_size` is clamped to
    /// `1..=max_page_size`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Cancelled`] if `cancel` fires between batches,
    /// or a store error.
    pub async fn list_entries(
        &self,
        filter: &EntryFilter,
        page: usize,
        page_size: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Page> {
        let page = page.max(1);
        let page_size = self.limits.clamp_page_size(page_size);
        let skip = (page - 1).saturating_mul(page_size);

        let mut entries = Vec::with_capacity(page_size);
        let mut total = 0_u64;

        self.scan_newest_first(cancel, |entry| {
            if filter.matches(&entry) {
                let index = usize::try_from(total).unwrap_or(usize::MAX);
                if index >= skip && entries.len() < page_size {
                    entries.push(entry);
                }
                total += 1;
            }
        })
        .await?;

        debug!(total, page, page_size, returned = entries.len(), "Listed audit entries");
        Ok(Page {
            entries,
            total_count: total,
            page,
            page_size,
        })
    }

    /// Summarizes entries timestamped within `since..=until`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Cancelled`] if `cancel` fires between batches,
    /// or a store error.
    pub async fn summary(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        top_n: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<AuditSummary> {
        let window = EntryFilter::new().between(since, until);
        let mut summary = AuditSummary {
            since,
            until,
            ..AuditSummary::default()
        };
        let mut actors: HashMap<String, u64> = HashMap::new();
        let mut ips: HashMap<String, u64> = HashMap::new();

        self.scan_newest_first(cancel, |entry| {
            if !window.matches(&entry) {
                return;
            }
            summary.total += 1;
            *summary.by_event_type.entry(entry.event_type).or_default() += 1;
            *summary.by_severity.entry(entry.severity).or_default() += 1;
            if !entry.success {
                summary.failures += 1;
            }
            if !entry.is_resolved() {
                summary.unresolved += 1;
            }
            if let Some(actor) = entry.actor_key() {
                *actors.entry(actor.to_string()).or_default() += 1;
            }
            *ips.entry(entry.network.ip).or_default() += 1;
        })
        .await?;

        let top_n = top_n.unwrap_or(self.limits.default_top_n);
        summary.top_actors = top_counts(actors, top_n);
        summary.top_ips = top_counts(ips, top_n);
        Ok(summary)
    }

    /// Feeds every entry up to the tail captured at call start to `visit`,
    /// newest first.
    async fn scan_newest_first<F>(&self, cancel: &CancellationToken, mut visit: F) -> Result<()>
    where
        F: FnMut(AuditLogEntry) + Send,
    {
        let Some(tail) = self.store.tail().await? else {
            return Ok(());
        };
        let batch = self.limits.scan_batch_size.max(1) as u64;
        let mut upper = tail.sequence;

        while upper > 0 {
            if cancel.is_cancelled() {
                return Err(AuditError::Cancelled);
            }
            let lower = upper.saturating_sub(batch - 1).max(1);
            let entries = self
                .store
                .range(lower, upper, usize::try_from(batch).unwrap_or(usize::MAX))
                .await?;
            for entry in entries.into_iter().rev() {
                visit(entry);
            }
            upper = lower - 1;
        }
        Ok(())
    }
}

fn top_counts(counts: HashMap<String, u64>, n: usize) -> Vec<KeyCount> {
    let mut ranked: Vec<KeyCount> = counts
        .into_iter()
        .map(|(key, count)| KeyCount { key, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    ranked.truncate(n);
    ranked
}
