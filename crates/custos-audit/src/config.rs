//! Configuration for the audit chain.
//!
//! Every section has defaults suitable for a single-instance deployment and
//! deserializes from a partial document, so a config file only needs the
//! keys it changes:
//!
//! ```yaml
//! retry:
//!   max_attempts: 12
//! anomaly:
//!   brute_force_failures: 3
//!   brute_force_window_secs: 60
//! retention:
//!   archive_after_days: 30
//! ```

use std::time::Duration;

use custos_core::Severity;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};

/// Top-level audit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Append retry policy.
    pub retry: RetryPolicy,

    /// Anomaly detection thresholds.
    pub anomaly: AnomalyThresholds,

    /// Retention policy.
    pub retention: RetentionPolicy,

    /// Query limits.
    pub query: QueryLimits,

    /// Serialize appends from this process through a local mutex before
    /// attempting the compare-and-swap.
    pub serialize_local_appends: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            anomaly: AnomalyThresholds::default(),
            retention: RetentionPolicy::default(),
            query: QueryLimits::default(),
            serialize_local_appends: true,
        }
    }
}

impl AuditConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder::default()
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Config`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.anomaly.validate()?;
        self.retention.validate()?;
        self.query.validate()
    }
}

/// Builder for [`AuditConfig`].
#[derive(Debug, Default)]
pub struct AuditConfigBuilder {
    retry: Option<RetryPolicy>,
    anomaly: Option<AnomalyThresholds>,
    retention: Option<RetentionPolicy>,
    query: Option<QueryLimits>,
    serialize_local_appends: Option<bool>,
}

impl AuditConfigBuilder {
    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets the anomaly thresholds.
    #[must_use]
    pub fn anomaly(mut self, anomaly: AnomalyThresholds) -> Self {
        self.anomaly = Some(anomaly);
        self
    }

    /// Sets the retention policy.
    #[must_use]
    pub fn retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Sets the query limits.
    #[must_use]
    pub fn query(mut self, query: QueryLimits) -> Self {
        self.query = Some(query);
        self
    }

    /// Enables or disables the local append mutex.
    #[must_use]
    pub fn serialize_local_appends(mut self, enabled: bool) -> Self {
        self.serialize_local_appends = Some(enabled);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> AuditConfig {
        AuditConfig {
            retry: self.retry.unwrap_or_default(),
            anomaly: self.anomaly.unwrap_or_default(),
            retention: self.retention.unwrap_or_default(),
            query: self.query.unwrap_or_default(),
            serialize_local_appends: self.serialize_local_appends.unwrap_or(true),
        }
    }
}

/// Bounded exponential backoff for compare-and-swap conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound on a single delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Add up to 50% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 2,
            max_delay_ms: 200,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Returns the delay to wait after failed attempt number `attempt`
    /// (1-based), before jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1_u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Returns the delay to wait after failed attempt number `attempt`,
    /// with jitter applied when enabled.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let max_jitter = u64::try_from(base.as_micros() / 2).unwrap_or(u64::MAX);
        base + Duration::from_micros(rand::thread_rng().gen_range(0..=max_jitter))
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AuditError::config("retry.max_attempts must be at least 1"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(AuditError::config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    jitter: Option<bool>,
}

impl RetryPolicyBuilder {
    /// Sets the total number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = Some(enabled);
        self
    }

    /// Builds the policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay_ms: self.base_delay_ms.unwrap_or(defaults.base_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(defaults.max_delay_ms),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        }
    }
}

/// Thresholds for the anomaly rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyThresholds {
    /// Failed logins per actor or IP that trigger `BRUTE_FORCE`.
    pub brute_force_failures: u32,

    /// Window for the brute force rule, in seconds.
    pub brute_force_window_secs: u64,

    /// Distinct IPs per actor that trigger `SUSPICIOUS_ACTIVITY`.
    pub distinct_ips: u32,

    /// Window for the distinct IP rule, in seconds.
    pub distinct_ip_window_secs: u64,

    /// Permission denials per actor that trigger `PRIVILEGE_PROBING`.
    pub permission_denials: u32,

    /// Window for the privilege probing rule, in seconds.
    pub permission_denial_window_secs: u64,

    /// Appends at or above this severity are evaluated before `append`
    /// returns; lower severities go to the background worker.
    pub sync_severity: Severity,

    /// Capacity of the background worker queue.
    pub queue_capacity: usize,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            brute_force_failures: 5,
            brute_force_window_secs: 300,
            distinct_ips: 3,
            distinct_ip_window_secs: 3600,
            permission_denials: 5,
            permission_denial_window_secs: 600,
            sync_severity: Severity::Critical,
            queue_capacity: 1024,
        }
    }
}

impl AnomalyThresholds {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> AnomalyThresholdsBuilder {
        AnomalyThresholdsBuilder::default()
    }

    /// Brute force window.
    #[must_use]
    pub fn brute_force_window(&self) -> chrono::Duration {
        secs(self.brute_force_window_secs)
    }

    /// Distinct IP window.
    #[must_use]
    pub fn distinct_ip_window(&self) -> chrono::Duration {
        secs(self.distinct_ip_window_secs)
    }

    /// Privilege probing window.
    #[must_use]
    pub fn permission_denial_window(&self) -> chrono::Duration {
        secs(self.permission_denial_window_secs)
    }

    /// The widest of the rule windows.
    #[must_use]
    pub fn widest_window(&self) -> chrono::Duration {
        self.brute_force_window()
            .max(self.distinct_ip_window())
            .max(self.permission_denial_window())
    }

    fn validate(&self) -> Result<()> {
        if self.brute_force_failures == 0
            || self.distinct_ips == 0
            || self.permission_denials == 0
        {
            return Err(AuditError::config("anomaly counts must be at least 1"));
        }
        if self.brute_force_window_secs == 0
            || self.distinct_ip_window_secs == 0
            || self.permission_denial_window_secs == 0
        {
            return Err(AuditError::config("anomaly windows must be non-zero"));
        }
        if self.queue_capacity == 0 {
            return Err(AuditError::config("anomaly.queue_capacity must be at least 1"));
        }
        Ok(())
    }
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

/// Builder for [`AnomalyThresholds`].
#[derive(Debug, Default)]
pub struct AnomalyThresholdsBuilder {
    inner: Option<AnomalyThresholds>,
}

impl AnomalyThresholdsBuilder {
    fn inner(&mut self) -> &mut AnomalyThresholds {
        self.inner.get_or_insert_with(AnomalyThresholds::default)
    }

    /// Sets the brute force rule.
    #[must_use]
    pub fn brute_force(mut self, failures: u32, window: Duration) -> Self {
        let inner = self.inner();
        inner.brute_force_failures = failures;
        inner.brute_force_window_secs = window.as_secs();
        self
    }

    /// Sets the distinct IP rule.
    #[must_use]
    pub fn distinct_ips(mut self, ips: u32, window: Duration) -> Self {
        let inner = self.inner();
        inner.distinct_ips = ips;
        inner.distinct_ip_window_secs = window.as_secs();
        self
    }

    /// Sets the privilege probing rule.
    #[must_use]
    pub fn permission_denials(mut self, denials: u32, window: Duration) -> Self {
        let inner = self.inner();
        inner.permission_denials = denials;
        inner.permission_denial_window_secs = window.as_secs();
        self
    }

    /// Sets the synchronous evaluation threshold.
    #[must_use]
    pub fn sync_severity(mut self, severity: Severity) -> Self {
        self.inner().sync_severity = severity;
        self
    }

    /// Sets the worker queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.inner().queue_capacity = capacity;
        self
    }

    /// Builds the thresholds.
    #[must_use]
    pub fn build(self) -> AnomalyThresholds {
        self.inner.unwrap_or_default()
    }
}

/// Retention policy for the archiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Default age threshold for `archive_older_than`.
    pub archive_after_days: u32,

    /// Drop `details` from archived entries.
    pub compact_details: bool,

    /// Entries read or updated per batch.
    pub batch_size: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            archive_after_days: 90,
            compact_details: true,
            batch_size: 500,
        }
    }
}

impl RetentionPolicy {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(AuditError::config("retention.batch_size must be at least 1"));
        }
        Ok(())
    }
}

/// Limits for queries and scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    /// Page size used when the caller does not give one.
    pub default_page_size: usize,

    /// Largest page size a caller may request.
    pub max_page_size: usize,

    /// Entries read from the store per batch during scans.
    pub scan_batch_size: usize,

    /// Default number of actors and IPs in a summary.
    pub default_top_n: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 500,
            scan_batch_size: 1000,
            default_top_n: 10,
        }
    }
}

impl QueryLimits {
    /// Clamps a requested page size into `1..=max_page_size`.
    #[must_use]
    pub fn clamp_page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }

    fn validate(&self) -> Result<()> {
        if self.max_page_size == 0 || self.scan_batch_size == 0 {
            return Err(AuditError::config(
                "query.max_page_size and query.scan_batch_size must be at least 1",
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(AuditError::config(
                "query.default_page_size must be within 1..=max_page_size",
            ));
        }
        Ok(())
    }
}
