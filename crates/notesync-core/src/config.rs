//! Configuration module for NoteSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//! Every section is optional in the file; missing sections and fields take
//! their default values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for NoteSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub queue: QueueConfig,
    pub polling: PollingConfig,
    pub retry: RetryConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

/// Local data and reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory holding notes, the index and the sync state.
    pub data_dir: PathBuf,
    /// Seconds between full reconciliations that run regardless of the change feed.
    pub full_sync_interval_secs: u64,
}

/// Operation queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of operations waiting to be dispatched.
    pub capacity: usize,
    /// Maximum number of keys executing concurrently.
    pub parallelism: usize,
    /// Milliseconds an update waits for further edits before it runs.
    pub debounce_ms: u64,
}

/// Change poller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub base_interval_secs: u64,
    pub max_interval_secs: u64,
    /// Multiplier applied after a check that found nothing relevant.
    pub growth_factor: f64,
    pub reconnect_initial_secs: u64,
    pub reconnect_max_secs: u64,
    pub reconnect_factor: f64,
}

/// Retry policy for remote calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts for uploads and downloads.
    pub transfer_attempts: u32,
    /// Attempts for metadata calls (listing, change feed).
    pub metadata_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub metadata_max_delay_ms: u64,
}

/// Remote store selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Backend: `directory` or `memory`.
    pub backend: String,
    /// Root of the shared directory for the `directory` backend.
    pub path: PathBuf,
    /// Optional parent id under which blobs are created.
    pub parent_id: Option<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/notesync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("notesync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("notesync")
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            full_sync_interval_secs: 300,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            parallelism: 4,
            debounce_ms: 3000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: 5,
            max_interval_secs: 60,
            growth_factor: 1.5,
            reconnect_initial_secs: 10,
            reconnect_max_secs: 180,
            reconnect_factor: 1.5,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transfer_attempts: 4,
            metadata_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 30_000,
            metadata_max_delay_ms: 10_000,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: "directory".to_string(),
            path: default_data_dir().join("remote"),
            parent_id: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Duration accessors
// ---------------------------------------------------------------------------

impl QueueConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl PollingConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_secs(self.base_interval_secs)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_secs(self.reconnect_initial_secs)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs)
    }
}

impl SyncConfig {
    pub fn full_sync_interval(&self) -> Duration {
        Duration::from_secs(self.full_sync_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"queue.capacity"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

/// Valid values for `remote.backend`.
const VALID_BACKENDS: &[&str] = &["directory", "memory"];

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

fn growth(errors: &mut Vec<ValidationError>, field: &str, value: f64) {
    if !(value >= 1.0 && value.is_finite()) {
        errors.push(ValidationError {
            field: field.into(),
            message: format!("must be a finite factor of at least 1.0, got {value}"),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sync.data_dir".into(),
                message: "must not be empty".into(),
            });
        }
        positive(
            &mut errors,
            "sync.full_sync_interval_secs",
            self.sync.full_sync_interval_secs,
        );

        // --- queue ---
        positive(&mut errors, "queue.capacity", self.queue.capacity as u64);
        positive(&mut errors, "queue.parallelism", self.queue.parallelism as u64);

        // --- polling ---
        positive(
            &mut errors,
            "polling.base_interval_secs",
            self.polling.base_interval_secs,
        );
        if self.polling.max_interval_secs < self.polling.base_interval_secs {
            errors.push(ValidationError {
                field: "polling.max_interval_secs".into(),
                message: format!(
                    "must be at least base_interval_secs ({})",
                    self.polling.base_interval_secs
                ),
            });
        }
        growth(&mut errors, "polling.growth_factor", self.polling.growth_factor);
        positive(
            &mut errors,
            "polling.reconnect_initial_secs",
            self.polling.reconnect_initial_secs,
        );
        if self.polling.reconnect_max_secs < self.polling.reconnect_initial_secs {
            errors.push(ValidationError {
                field: "polling.reconnect_max_secs".into(),
                message: format!(
                    "must be at least reconnect_initial_secs ({})",
                    self.polling.reconnect_initial_secs
                ),
            });
        }
        growth(
            &mut errors,
            "polling.reconnect_factor",
            self.polling.reconnect_factor,
        );

        // --- retry ---
        positive(
            &mut errors,
            "retry.transfer_attempts",
            u64::from(self.retry.transfer_attempts),
        );
        positive(
            &mut errors,
            "retry.metadata_attempts",
            u64::from(self.retry.metadata_attempts),
        );
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            errors.push(ValidationError {
                field: "retry.max_delay_ms".into(),
                message: "must be at least base_delay_ms".into(),
            });
        }
        if self.retry.metadata_max_delay_ms < self.retry.base_delay_ms {
            errors.push(ValidationError {
                field: "retry.metadata_max_delay_ms".into(),
                message: "must be at least base_delay_ms".into(),
            });
        }

        // --- remote ---
        if !VALID_BACKENDS.contains(&self.remote.backend.as_str()) {
            errors.push(ValidationError {
                field: "remote.backend".into(),
                message: format!(
                    "invalid backend '{}', expected one of: {}",
                    self.remote.backend,
                    VALID_BACKENDS.join(", ")
                ),
            });
        }
        if self.remote.backend == "directory" && self.remote.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "remote.path".into(),
                message: "required for the directory backend".into(),
            });
        }
        if let Some(parent) = &self.remote.parent_id {
            if parent.trim().is_empty() {
                errors.push(ValidationError {
                    field: "remote.parent_id".into(),
                    message: "must not be blank when set".into(),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}', expected one of: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Config`], starting from defaults.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from [`Config::default`].
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.sync.data_dir = dir.into();
        self
    }

    pub fn full_sync_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync.full_sync_interval_secs = secs;
        self
    }

    // --- queue ---

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue.capacity = capacity;
        self
    }

    pub fn queue_parallelism(mut self, parallelism: usize) -> Self {
        self.config.queue.parallelism = parallelism;
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.queue.debounce_ms = ms;
        self
    }

    // --- polling ---

    pub fn polling_base_interval_secs(mut self, secs: u64) -> Self {
        self.config.polling.base_interval_secs = secs;
        self
    }

    pub fn polling_max_interval_secs(mut self, secs: u64) -> Self {
        self.config.polling.max_interval_secs = secs;
        self
    }

    pub fn polling_growth_factor(mut self, factor: f64) -> Self {
        self.config.polling.growth_factor = factor;
        self
    }

    // --- retry ---

    pub fn retry_attempts(mut self, transfer: u32, metadata: u32) -> Self {
        self.config.retry.transfer_attempts = transfer;
        self.config.retry.metadata_attempts = metadata;
        self
    }

    pub fn retry_delays_ms(mut self, base: u64, max: u64) -> Self {
        self.config.retry.base_delay_ms = base;
        self.config.retry.max_delay_ms = max;
        self.config.retry.metadata_max_delay_ms = max;
        self
    }

    // --- remote ---

    pub fn remote_backend(mut self, backend: impl Into<String>) -> Self {
        self.config.remote.backend = backend.into();
        self
    }

    pub fn remote_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.remote.path = path.into();
        self
    }

    pub fn remote_parent_id(mut self, parent: impl Into<String>) -> Self {
        self.config.remote.parent_id = Some(parent.into());
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
