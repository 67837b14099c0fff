use crate::tasks::{QueueSettings, RecoveryPolicy};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_UPLOAD_DIR: &str = "./uploads";
const DEFAULT_MAX_CONCURRENT_TASKS: usize = 5;
const DEFAULT_MAX_FILE_SIZE: usize = 50 * 1024 * 1024;
const DEFAULT_RETENTION_HOURS: u64 = 24;
const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 30;
const TASKS_DIRNAME: &str = "tasks";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Configuration was already installed in the global cache.
    #[error("Configuration already initialised")]
    AlreadyInitialized,
}

/// Runtime configuration for the chapter splitter service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root directory for uploads, artifacts and task snapshots.
    pub upload_dir: PathBuf,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Number of concurrent split workers.
    pub max_concurrent_tasks: usize,
    /// Largest accepted upload in bytes.
    pub max_file_size: usize,
    /// Default age after which finished tasks are removed.
    pub task_retention_hours: u64,
    /// Interval of the background retention sweep; disabled when unset.
    pub cleanup_interval_minutes: Option<u64>,
    /// Handling of tasks interrupted by a restart.
    pub recovery_policy: RecoveryPolicy,
    /// Grace period granted to busy workers during shutdown.
    pub shutdown_grace_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            server_port: None,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            task_retention_hours: DEFAULT_RETENTION_HOURS,
            cleanup_interval_minutes: None,
            recovery_policy: RecoveryPolicy::default(),
            shutdown_grace_seconds: DEFAULT_SHUTDOWN_GRACE_SECONDS,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let max_concurrent_tasks =
            parse_optional(get("MAX_CONCURRENT_TASKS"), "MAX_CONCURRENT_TASKS")?
                .unwrap_or(defaults.max_concurrent_tasks);
        if max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidValue("MAX_CONCURRENT_TASKS".into()));
        }

        Ok(Self {
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            server_port: parse_optional(get("SERVER_PORT"), "SERVER_PORT")?,
            max_concurrent_tasks,
            max_file_size: parse_optional(get("MAX_FILE_SIZE"), "MAX_FILE_SIZE")?
                .unwrap_or(defaults.max_file_size),
            task_retention_hours: parse_optional(
                get("TASK_RETENTION_HOURS"),
                "TASK_RETENTION_HOURS",
            )?
            .unwrap_or(defaults.task_retention_hours),
            cleanup_interval_minutes: parse_optional(
                get("TASK_CLEANUP_INTERVAL_MINUTES"),
                "TASK_CLEANUP_INTERVAL_MINUTES",
            )?
            .filter(|minutes| *minutes > 0),
            recovery_policy: get("TASK_RECOVERY_POLICY")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("TASK_RECOVERY_POLICY".into()))
                })
                .transpose()?
                .unwrap_or(defaults.recovery_policy),
            shutdown_grace_seconds: parse_optional(
                get("SHUTDOWN_GRACE_SECONDS"),
                "SHUTDOWN_GRACE_SECONDS",
            )?
            .unwrap_or(defaults.shutdown_grace_seconds),
        })
    }

    /// Directory holding task snapshots.
    pub fn tasks_dir(&self) -> PathBuf {
        self.upload_dir.join(TASKS_DIRNAME)
    }

    /// Default retention window for finished tasks.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_hours.saturating_mul(3600))
    }

    /// Interval of the background retention sweep, when enabled.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        self.cleanup_interval_minutes
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
    }

    /// Task queue parameters derived from this configuration.
    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            workers: self.max_concurrent_tasks,
            tasks_dir: self.tasks_dir(),
            recovery: self.recovery_policy,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds),
        }
    }
}

fn parse_optional<T: FromStr>(value: Option<String>, key: &str) -> Result<Option<T>, ConfigError> {
    value
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from `.env` and the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    init_config_with(|_| {})
}

/// Like [`init_config`], letting the caller override values (for example from CLI flags).
pub fn init_config_with<F>(adjust: F) -> Result<&'static Config, ConfigError>
where
    F: FnOnce(&mut Config),
{
    dotenvy::dotenv().ok();
    let mut config = Config::from_env()?;
    adjust(&mut config);
    if config.max_concurrent_tasks == 0 {
        return Err(ConfigError::InvalidValue("MAX_CONCURRENT_TASKS".into()));
    }

    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    let config = CONFIG.get().ok_or(ConfigError::AlreadyInitialized)?;
    tracing::debug!(
        upload_dir = %config.upload_dir.display(),
        server_port = ?config.server_port,
        workers = config.max_concurrent_tasks,
        recovery = config.recovery_policy.as_str(),
        "Loaded configuration"
    );
    Ok(config)
}
