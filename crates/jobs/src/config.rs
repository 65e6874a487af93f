//! Process configuration loaded from environment variables

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use tracing::warn;

use crate::admin::Credentials;
use crate::persistence::StoreConfig;
use crate::queue::{QueueDefinition, RetentionPolicy};
use crate::reliability::{BackoffKind, BackoffPolicy, RetryClassification};
use crate::retention::DEFAULT_CLEANUP_SCHEDULE;
use crate::shutdown::DEFAULT_SHUTDOWN_GRACE;

pub const DOCUMENT_EXPORT_QUEUE: &str = "document-export";
pub const FILE_PARSING_QUEUE: &str = "file-parsing";
pub const AI_GENERATION_QUEUE: &str = "ai-generation";
pub const EMBEDDING_GENERATION_QUEUE: &str = "embedding-generation";

const DEFAULT_MONITOR_ADDR: &str = "0.0.0.0:9100";

/// The four queues of the platform with their production settings
pub fn default_definitions() -> Vec<QueueDefinition> {
    let backoff = BackoffPolicy::exponential(Duration::from_secs(2));
    let retention = RetentionPolicy::default();

    vec![
        QueueDefinition::new(DOCUMENT_EXPORT_QUEUE)
            .with_concurrency(5)
            .with_job_timeout(Duration::from_secs(60))
            .with_backoff(backoff)
            .with_retention(retention),
        QueueDefinition::new(FILE_PARSING_QUEUE)
            .with_concurrency(5)
            .with_job_timeout(Duration::from_secs(60))
            .with_backoff(backoff)
            .with_retention(retention),
        QueueDefinition::new(AI_GENERATION_QUEUE)
            .with_concurrency(3)
            .with_job_timeout(Duration::from_secs(300))
            .with_backoff(backoff)
            .with_retention(retention),
        QueueDefinition::new(EMBEDDING_GENERATION_QUEUE)
            .with_concurrency(2)
            .with_job_timeout(Duration::from_secs(120))
            .with_backoff(backoff)
            .with_retention(retention)
            .with_retry_on(RetryClassification::transient_connection()),
    ]
}

/// Monitoring HTTP server settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Listen address
    pub addr: String,

    /// Basic-auth credentials for every route
    pub credentials: Credentials,
}

impl MonitorConfig {
    pub fn uses_default_credentials(&self) -> bool {
        self.credentials == Credentials::default()
    }
}

/// Everything the job server reads at startup
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub store: StoreConfig,

    /// Queue definitions after per-queue overrides
    pub queues: Vec<QueueDefinition>,

    /// Endpoint each queue's jobs are delegated to, by queue name
    pub processor_urls: HashMap<String, String>,

    /// Cron expression of the retention sweep
    pub cleanup_schedule: String,

    /// How long workers may drain on shutdown
    pub shutdown_grace: Duration,

    pub monitor: MonitorConfig,
}

impl OrchestratorConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `JOB_STORE_URL` / `DATABASE_URL`: Job store (default: in-memory)
    /// - `QUEUE_<NAME>_CONCURRENCY`, `_TIMEOUT_MS`, `_ATTEMPTS`, `_BACKOFF_MS`,
    ///   `_BACKOFF_TYPE`, `_COMPLETED_MAX_AGE_SECS`, `_COMPLETED_MAX_COUNT`,
    ///   `_FAILED_MAX_AGE_SECS`, `_PROCESSOR_URL`: Per-queue overrides, where
    ///   `<NAME>` is the queue name upper-cased with `-` replaced by `_`
    /// - `CLEANUP_SCHEDULE`: Cron expression (default: `0 0 3 * * *`)
    /// - `SHUTDOWN_GRACE_SECS`: Drain period (default: 30)
    /// - `MONITOR_ADDR`: Monitoring listen address (default: `0.0.0.0:9100`)
    /// - `MONITOR_USERNAME` / `MONITOR_PASSWORD`: Basic auth (default: admin/admin)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut processor_urls = HashMap::new();
        let queues = default_definitions()
            .into_iter()
            .map(|definition| {
                let prefix = env_prefix(&definition.name);
                if let Some(url) = lookup(&format!("{prefix}_PROCESSOR_URL")) {
                    processor_urls.insert(definition.name.clone(), url);
                }
                apply_overrides(definition, &prefix, &lookup)
            })
            .collect();

        let cleanup_schedule =
            lookup("CLEANUP_SCHEDULE").unwrap_or_else(|| DEFAULT_CLEANUP_SCHEDULE.to_string());

        let shutdown_grace = lookup("SHUTDOWN_GRACE_SECS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE);

        let defaults = Credentials::default();
        let monitor = MonitorConfig {
            addr: lookup("MONITOR_ADDR").unwrap_or_else(|| DEFAULT_MONITOR_ADDR.to_string()),
            credentials: Credentials {
                username: lookup("MONITOR_USERNAME").unwrap_or(defaults.username),
                password: lookup("MONITOR_PASSWORD").unwrap_or(defaults.password),
            },
        };
        if monitor.uses_default_credentials() {
            warn!("MONITOR_USERNAME/MONITOR_PASSWORD not set, monitoring uses default credentials");
        }

        Self {
            store: StoreConfig::from_lookup(&lookup),
            queues,
            processor_urls,
            cleanup_schedule,
            shutdown_grace,
            monitor,
        }
    }
}

/// `document-export` -> `QUEUE_DOCUMENT_EXPORT`
fn env_prefix(queue: &str) -> String {
    format!("QUEUE_{}", queue.to_uppercase().replace('-', "_"))
}

fn apply_overrides(
    mut definition: QueueDefinition,
    prefix: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> QueueDefinition {
    let get = |suffix: &str| lookup(&format!("{prefix}_{suffix}"));
    let parse_u64 = |suffix: &str| get(suffix).and_then(|v| v.parse::<u64>().ok());

    if let Some(concurrency) = get("CONCURRENCY").and_then(|v| v.parse().ok()) {
        definition.concurrency = concurrency;
    }
    if let Some(ms) = parse_u64("TIMEOUT_MS") {
        definition.job_timeout = Duration::from_millis(ms);
    }
    if let Some(attempts) = get("ATTEMPTS").and_then(|v| v.parse().ok()) {
        definition.attempts = attempts;
    }
    if let Some(ms) = parse_u64("BACKOFF_MS") {
        definition.backoff.base_delay = Duration::from_millis(ms);
    }
    if let Some(kind) = get("BACKOFF_TYPE") {
        match kind.parse::<BackoffKind>() {
            Ok(kind) => definition.backoff.kind = kind,
            Err(e) => warn!(queue = %definition.name, "{}, keeping default", e),
        }
    }
    if let Some(secs) = parse_u64("COMPLETED_MAX_AGE_SECS") {
        definition.retention.completed_max_age = Some(Duration::from_secs(secs));
    }
    if let Some(count) = get("COMPLETED_MAX_COUNT").and_then(|v| v.parse().ok()) {
        definition.retention.completed_max_count = Some(count);
    }
    if let Some(secs) = parse_u64("FAILED_MAX_AGE_SECS") {
        definition.retention.failed_max_age = Some(Duration::from_secs(secs));
    }

    definition
}
