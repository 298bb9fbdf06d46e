use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use tracing::trace;

/// Storage configuration for the core database.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Retention period in days (history/status/metric rows older than this are deleted)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./serviceradar.db")
}

fn default_retention_days() -> u32 {
    7
}

/// In-memory latency ring configuration.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Samples kept per node
    #[serde(default = "default_metrics_retention")]
    pub retention: usize,

    /// Global cap on tracked nodes; LRU eviction above this
    #[serde(default = "default_metrics_max_nodes")]
    pub max_nodes: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            retention: default_metrics_retention(),
            max_nodes: default_metrics_max_nodes(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_retention() -> usize {
    100
}

fn default_metrics_max_nodes() -> usize {
    10_000
}

/// Outbound webhook alert target.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Target id recorded on notification target rows
    #[serde(default = "default_webhook_name")]
    pub name: String,

    pub url: String,

    /// Minimum seconds between alerts for the same (node, title, service) key.
    /// 0 disables the cooldown check.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Optional payload template; the default payload is the notification as JSON
    pub template: Option<String>,

    /// Shared secret for HMAC-SHA-256 signing of the request body
    pub secret: Option<String>,

    /// Header carrying the hex signature
    #[serde(default = "default_signature_header")]
    pub signature_header: String,

    /// Extra request headers; overrides Content-Type if set here
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Discord alert target (webhook URL with embed + ack components).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub webhook_url: String,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Base URL for the "View Details" link button
    pub details_url: Option<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_webhook_name() -> String {
    "default".to_string()
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_signature_header() -> String {
    "X-Signature".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_timeout_secs() -> u64 {
    10
}

/// Alert target registry.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct AlertingConfig {
    pub webhook: Option<WebhookConfig>,

    pub discord: Option<DiscordConfig>,
}

/// HTTP API server configuration.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    #[serde(default = "default_api_cors")]
    pub enable_cors: bool,

    /// Secret seeded as the `bootstrap` admin API key on startup.
    /// Only the SHA-256 hash is persisted.
    pub bootstrap_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
            port: default_api_port(),
            enable_cors: default_api_cors(),
            bootstrap_key: None,
        }
    }
}

fn default_api_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8090
}

fn default_api_cors() -> bool {
    true
}

/// Health monitoring knobs for the state machine.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitorConfig {
    /// A healthy node with no report for this long is marked offline
    #[serde(default = "default_alert_threshold_secs")]
    pub alert_threshold_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            alert_threshold_secs: default_alert_threshold_secs(),
        }
    }
}

fn default_alert_threshold_secs() -> u64 {
    300
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Poller ids the core accepts reports from: exact ids or glob patterns
    /// (`*` matches any run of characters). Reports from anything else are
    /// acknowledged but ignored.
    #[serde(default)]
    pub known_pollers: Vec<String>,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub alerting: AlertingConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.storage.retention_days < 1 {
            return Err("storage.retention_days must be at least 1".to_string());
        }
        if self.storage.retention_days > 3650 {
            return Err("storage.retention_days cannot exceed 3650 (10 years)".to_string());
        }

        if self.metrics.retention == 0 {
            return Err("metrics.retention must be at least 1".to_string());
        }
        if self.metrics.max_nodes == 0 {
            return Err("metrics.max_nodes must be at least 1".to_string());
        }

        if let Some(webhook) = &self.alerting.webhook {
            if webhook.url.is_empty() {
                return Err("alerting.webhook.url must not be empty".to_string());
            }
        }

        if let Some(discord) = &self.alerting.discord {
            if discord.webhook_url.is_empty() {
                return Err("alerting.discord.webhook_url must not be empty".to_string());
            }
        }

        // Surface bad glob patterns at startup rather than at first report
        KnownPollers::compile(&self.known_pollers).map_err(|e| e.to_string())?;

        Ok(())
    }

    pub fn alert_threshold(&self) -> Duration {
        Duration::from_secs(self.monitor.alert_threshold_secs)
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("invalid configuration file: {e}"))
        .inspect(|config: &Config| trace!("loaded config: {config:?}"))
}

/// Compiled known-poller patterns.
///
/// Exact entries match by equality; entries containing `*` are glob patterns
/// compiled to anchored regexes.
#[derive(Debug, Clone)]
pub struct KnownPollers {
    exact: Vec<String>,
    globs: Vec<Regex>,
}

impl KnownPollers {
    pub fn compile(patterns: &[String]) -> anyhow::Result<Self> {
        let mut exact = Vec::new();
        let mut globs = Vec::new();

        for pattern in patterns {
            if pattern.contains('*') {
                let escaped = pattern
                    .split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(".*");
                let anchored = format!("^{escaped}$");
                globs.push(
                    Regex::new(&anchored)
                        .map_err(|e| anyhow::anyhow!("invalid poller pattern {pattern:?}: {e}"))?,
                );
            } else {
                exact.push(pattern.clone());
            }
        }

        Ok(Self { exact, globs })
    }

    pub fn matches(&self, poller_id: &str) -> bool {
        self.exact.iter().any(|id| id == poller_id)
            || self.globs.iter().any(|re| re.is_match(poller_id))
    }

    /// Exact (non-glob) ids, used to pre-register node rows at startup.
    pub fn exact_ids(&self) -> &[String] {
        &self.exact
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.globs.is_empty()
    }
}
