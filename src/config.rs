use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Attempt ceiling used when `max_retries` is left unset (0)
pub const DEFAULT_MAX_RETRIES: u32 = 100;

/// Sweep period used when the configured interval is not positive
pub const DEFAULT_RECONCILER_INTERVAL_MS: u64 = 500;

/// Live delivery policy shared by the service, the sweeper and storage retries
pub type SharedDeliveryConfig = Arc<RwLock<DeliveryConfig>>;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Retry and acknowledgement policy for command delivery.
///
/// Hot-swappable at runtime through `DeliveryService::update_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Deadline granted to each attempt before it is due for replay
    pub ack_timeout_ms: u64,
    /// Attempt ceiling before terminal failure (0 = unset)
    pub max_retries: u32,
    /// Backoff per attempt number; the last value is reused past the end
    pub retry_backoff_ms: Vec<u64>,
    /// Reconciliation sweep period
    pub reconciler_interval_ms: u64,
    /// Maximum entries replayed per sweep
    pub batch_size: i64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 150,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: vec![50, 100, 200, 400, 800],
            reconciler_interval_ms: DEFAULT_RECONCILER_INTERVAL_MS,
            batch_size: 128,
        }
    }
}

impl DeliveryConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Vec<Duration> {
        self.retry_backoff_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    /// Sweep period, falling back to 500ms when unset
    pub fn reconciler_interval(&self) -> Duration {
        if self.reconciler_interval_ms == 0 {
            Duration::from_millis(DEFAULT_RECONCILER_INTERVAL_MS)
        } else {
            Duration::from_millis(self.reconciler_interval_ms)
        }
    }

    /// Attempt ceiling shared by command retries and storage retries
    pub fn effective_max_retries(&self) -> u32 {
        if self.max_retries == 0 {
            DEFAULT_MAX_RETRIES
        } else {
            self.max_retries
        }
    }

    /// Backoff for a 1-based attempt number.
    ///
    /// The table is clamped to its last entry; an empty table falls back to
    /// the ack timeout.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if self.retry_backoff_ms.is_empty() {
            return self.ack_timeout();
        }
        let index = (attempt.max(1) as usize - 1).min(self.retry_backoff_ms.len() - 1);
        Duration::from_millis(self.retry_backoff_ms[index])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DryRunConfig {
    /// Run without a database; `migrate` and `journal` commands are refused
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("COPYRELAY_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // COPYRELAY_DELIVERY__ACK_TIMEOUT_MS, COPYRELAY_DATABASE__URL, ...
            .add_source(
                Environment::with_prefix("COPYRELAY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("delivery.retry_backoff_ms")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let delivery = &self.delivery;

        if delivery.ack_timeout_ms == 0 {
            errors.push("delivery.ack_timeout_ms must be positive".to_string());
        }

        if delivery.retry_backoff_ms.is_empty() {
            errors.push("delivery.retry_backoff_ms must list at least one backoff".to_string());
        }

        if delivery
            .retry_backoff_ms
            .windows(2)
            .any(|pair| pair[1] < pair[0])
        {
            errors.push("delivery.retry_backoff_ms should be non-decreasing".to_string());
        }

        if delivery.batch_size <= 0 {
            errors.push("delivery.batch_size must be positive".to_string());
        }

        if !self.dry_run.enabled && self.database.url.trim().is_empty() {
            errors.push("database.url is required unless dry_run is enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
