//! Configuration management for PIR.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/pir/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Job execution pacing, concurrency and budget
    pub execution: BrokerJobExecutionConfig,
    /// Automation backend settings
    pub browser: BrowserConfig,
    /// Broker catalog location
    pub catalog: CatalogConfig,
    /// Job state persistence location
    pub storage: StorageConfig,
    /// Feature toggles consulted before scheduling jobs
    pub features: FeatureConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `PIR_HEADLESS`: Override browser headless mode (true/false)
    /// - `PIR_CONCURRENT_JOBS`: Override the number of concurrently running jobs
    /// - `PIR_OPERATION_AWAIT_MS`: Override the pause before each action dispatch
    /// - `PIR_BACKGROUND_BUDGET_SECS`: Set a background execution budget for a sweep
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `PIR_*` overrides using the given variable lookup.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(headless) = lookup("PIR_HEADLESS").and_then(|v| v.parse().ok()) {
            self.browser.headless = headless;
            tracing::debug!("Override browser.headless from env: {}", headless);
        }

        if let Some(jobs) = lookup("PIR_CONCURRENT_JOBS").and_then(|v| v.parse().ok()) {
            self.execution.concurrent_jobs = jobs;
            tracing::debug!("Override execution.concurrent_jobs from env: {}", jobs);
        }

        if let Some(ms) = lookup("PIR_OPERATION_AWAIT_MS").and_then(|v| v.parse().ok()) {
            self.execution.operation_await_time_ms = ms;
            tracing::debug!("Override execution.operation_await_time_ms from env: {}", ms);
        }

        if let Some(secs) = lookup("PIR_BACKGROUND_BUDGET_SECS").and_then(|v| v.parse().ok()) {
            self.execution.background_budget_secs = Some(secs);
            tracing::debug!("Override execution.background_budget_secs from env: {}", secs);
        }
    }

    /// Check values that would make orchestration impossible.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.execution.concurrent_jobs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "execution.concurrent_jobs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.execution.action_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "execution.action_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/pir/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/pir`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Get the cache directory path.
    ///
    /// Uses XDG base directories: `~/.cache/pir`
    pub fn cache_dir() -> ConfigResult<PathBuf> {
        Ok(Self::project_dirs()?.cache_dir().to_path_buf())
    }

    fn project_dirs() -> ConfigResult<ProjectDirs> {
        ProjectDirs::from("com", "pir", "pir").ok_or(ConfigError::NoConfigDir)
    }
}

/// Pacing, concurrency and budget limits for broker jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerJobExecutionConfig {
    /// Number of (broker, profile query) entries processed at the same time
    pub concurrent_jobs: usize,
    /// Pause before every action dispatch, in milliseconds
    pub operation_await_time_ms: u64,
    /// Upper bound for a single backend callback, in seconds
    pub action_timeout_secs: u64,
    /// How many times a failed expectation action is attempted again
    pub max_expectation_retries: u32,
    /// Interval between confirmation-link polls, in seconds
    pub email_poll_interval_secs: u64,
    /// Number of confirmation-link polls before giving up
    pub email_max_polls: u32,
    /// Interval between captcha solution polls, in seconds
    pub captcha_poll_interval_secs: u64,
    /// Number of captcha solution polls before giving up
    pub captcha_max_polls: u32,
    /// Host-imposed budget for a whole sweep (unbounded when unset)
    pub background_budget_secs: Option<u64>,
    /// Remaining budget at which in-flight jobs are stopped
    pub budget_grace_secs: u64,
    /// Remaining budget required before a new job is started
    pub min_job_budget_secs: u64,
}

impl BrokerJobExecutionConfig {
    /// Pause before every action dispatch.
    #[must_use]
    pub fn operation_await_time(&self) -> Duration {
        Duration::from_millis(self.operation_await_time_ms)
    }

    /// Upper bound for a single backend callback.
    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    /// Interval between confirmation-link polls.
    #[must_use]
    pub fn email_poll_interval(&self) -> Duration {
        Duration::from_secs(self.email_poll_interval_secs)
    }

    /// Interval between captcha solution polls.
    #[must_use]
    pub fn captcha_poll_interval(&self) -> Duration {
        Duration::from_secs(self.captcha_poll_interval_secs)
    }

    /// Host-imposed budget for a whole sweep.
    #[must_use]
    pub fn background_budget(&self) -> Option<Duration> {
        self.background_budget_secs.map(Duration::from_secs)
    }

    /// Remaining budget at which in-flight jobs are stopped.
    #[must_use]
    pub fn budget_grace(&self) -> Duration {
        Duration::from_secs(self.budget_grace_secs)
    }

    /// Remaining budget required before a new job is started.
    #[must_use]
    pub fn min_job_budget(&self) -> Duration {
        Duration::from_secs(self.min_job_budget_secs)
    }
}

impl Default for BrokerJobExecutionConfig {
    fn default() -> Self {
        Self {
            concurrent_jobs: 2,
            operation_await_time_ms: 3000,
            action_timeout_secs: 120,
            max_expectation_retries: 1,
            email_poll_interval_secs: 10,
            email_max_polls: 30,
            captcha_poll_interval_secs: 5,
            captcha_max_polls: 24,
            background_budget_secs: None,
            budget_grace_secs: 30,
            min_job_budget_secs: 90,
        }
    }
}

/// Automation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Write a screenshot and HTML snapshot before every extract action
    pub debug_snapshots: bool,
    /// Where debug snapshots go (defaults to `<cache dir>/snapshots`)
    pub snapshot_dir: Option<PathBuf>,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            debug_snapshots: false,
            snapshot_dir: None,
            navigation_timeout_secs: 30,
        }
    }
}

/// Broker catalog location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory of broker TOML files (defaults to `broker-definitions/` in the workspace)
    pub definitions_dir: Option<PathBuf>,
}

/// Job state persistence location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding all job records (defaults to `<data dir>/jobs.json`)
    pub state_file: Option<PathBuf>,
}

/// Feature toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct FeatureConfig {
    /// Run scan jobs
    pub scans: bool,
    /// Run opt-out jobs
    pub opt_outs: bool,
    /// Allow opt-out steps that need an email confirmation
    pub email_confirmation: bool,
    /// Allow opt-out steps that need a captcha solved
    pub captcha_solving: bool,
    /// Broker IDs excluded from every sweep
    pub disabled_brokers: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            scans: true,
            opt_outs: true,
            email_confirmation: true,
            captcha_solving: true,
            disabled_brokers: Vec::new(),
        }
    }
}
