//! Resumable browser scrape orchestration for jewelry product configurators
//!
//! Drives a bounded pool of browser sessions through a work list, retrying each
//! item with exponential backoff, restarting sessions after navigation failure
//! streaks, and appending one audit row per attempt to a CSV sink.

mod browser;
pub mod browser_setup;
pub mod item;
pub mod ledger;
pub mod orchestrator;
pub mod record;
pub mod retry;
pub mod session;
pub mod sink;
pub mod task;
mod utils;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::task::TaskSpec;

/// File looked up in the working directory when no config path is given
pub const DEFAULT_CONFIG_FILE: &str = "jewel_scraper.yaml";

/// Run configuration, constructed once at startup and shared by reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_input_path")]
    pub input_path: PathBuf,

    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: PathBuf,

    /// Column holding the work item key (the product URL)
    #[serde(default = "default_key_column")]
    pub key_column: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_ready_poll_ms")]
    pub ready_poll_ms: u64,

    /// Visible body text must be longer than this for the page to count as ready
    #[serde(default = "default_min_visible_text")]
    pub min_visible_text: usize,

    /// Pause between the ready check and the product signal check
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_unlimited_retry")]
    pub unlimited_retry: bool,

    /// Only consulted when `unlimited_retry` is false
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_restart_after_failures")]
    pub restart_after_failures: u32,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: f64,

    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: f64,

    #[serde(default = "default_jitter_min_secs")]
    pub jitter_min_secs: f64,

    #[serde(default = "default_jitter_max_secs")]
    pub jitter_max_secs: f64,

    #[serde(default = "default_sink_write_retries")]
    pub sink_write_retries: u32,

    #[serde(default)]
    pub resume_policy: ResumePolicy,

    /// Selectors whose visible presence marks a real product page
    #[serde(default = "default_product_signals")]
    pub product_signals: Vec<ProductSignal>,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub task: TaskSpec,
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Disable Same-Origin Policy
    /// WARNING: Only enable for trusted content
    #[serde(default = "default_disable_security")]
    pub disable_security: bool,

    /// Window dimensions
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn default_input_path() -> PathBuf {
    PathBuf::from("input.csv")
}
fn default_output_path() -> PathBuf {
    PathBuf::from("output_results.csv")
}
fn default_screenshot_dir() -> PathBuf {
    PathBuf::from("screenshots")
}
fn default_key_column() -> String {
    "product_url".to_string()
}
fn default_pool_size() -> usize {
    2
}
fn default_navigation_timeout_secs() -> u64 {
    45
}
fn default_ready_timeout_secs() -> u64 {
    25
}
fn default_ready_poll_ms() -> u64 {
    300
}
fn default_min_visible_text() -> usize {
    50
}
fn default_settle_ms() -> u64 {
    800
}
fn default_unlimited_retry() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    8
}
fn default_restart_after_failures() -> u32 {
    3
}
fn default_backoff_base_secs() -> f64 {
    1.0
}
fn default_backoff_cap_secs() -> f64 {
    20.0
}
fn default_jitter_min_secs() -> f64 {
    0.15
}
fn default_jitter_max_secs() -> f64 {
    0.45
}
fn default_sink_write_retries() -> u32 {
    3
}
fn default_product_signals() -> Vec<ProductSignal> {
    utils::constants::default_product_signals()
}

fn default_headless() -> bool {
    true
}

fn default_disable_security() -> bool {
    false
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            input_path: default_input_path(),
            output_path: default_output_path(),
            screenshot_dir: default_screenshot_dir(),
            key_column: default_key_column(),
            pool_size: default_pool_size(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            ready_poll_ms: default_ready_poll_ms(),
            min_visible_text: default_min_visible_text(),
            settle_ms: default_settle_ms(),
            unlimited_retry: default_unlimited_retry(),
            max_attempts: default_max_attempts(),
            restart_after_failures: default_restart_after_failures(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            jitter_min_secs: default_jitter_min_secs(),
            jitter_max_secs: default_jitter_max_secs(),
            sink_write_retries: default_sink_write_retries(),
            resume_policy: ResumePolicy::default(),
            product_signals: default_product_signals(),
            browser: BrowserConfig::default(),
            task: TaskSpec::default(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            disable_security: default_disable_security(),
            window: WindowConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl ScrapeConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_base_secs)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_cap_secs)
    }

    pub fn jitter_min(&self) -> Duration {
        Duration::from_secs_f64(self.jitter_min_secs)
    }

    pub fn jitter_max(&self) -> Duration {
        Duration::from_secs_f64(self.jitter_max_secs)
    }

    /// Reject settings the engine cannot run with
    ///
    /// Float fields are checked before the `Duration` accessors are used,
    /// since `Duration::from_secs_f64` panics on negative or non-finite input.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_column.trim().is_empty() {
            return Err(ConfigError::Invalid("key_column must not be empty".into()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.restart_after_failures == 0 {
            return Err(ConfigError::Invalid(
                "restart_after_failures must be at least 1".into(),
            ));
        }
        utils::validate_navigation_timeout(self.navigation_timeout_secs)?;
        utils::validate_ready_timeout(self.ready_timeout_secs)?;

        for (name, value) in [
            ("backoff_base_secs", self.backoff_base_secs),
            ("backoff_cap_secs", self.backoff_cap_secs),
            ("jitter_min_secs", self.jitter_min_secs),
            ("jitter_max_secs", self.jitter_max_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number of seconds, got {value}"
                )));
            }
        }
        if self.backoff_base_secs > self.backoff_cap_secs {
            return Err(ConfigError::Invalid(format!(
                "backoff_base_secs ({}) exceeds backoff_cap_secs ({})",
                self.backoff_base_secs, self.backoff_cap_secs
            )));
        }
        if self.jitter_min_secs > self.jitter_max_secs {
            return Err(ConfigError::Invalid(format!(
                "jitter_min_secs ({}) exceeds jitter_max_secs ({})",
                self.jitter_min_secs, self.jitter_max_secs
            )));
        }
        Ok(())
    }
}

/// Load config from a YAML file
///
/// With no explicit path, `jewel_scraper.yaml` in the working directory is
/// used if present; otherwise defaults apply. An explicit path must exist.
pub fn load_yaml_config(path: Option<&Path>) -> Result<ScrapeConfig, ConfigError> {
    let (config_path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    if !required && !config_path.exists() {
        tracing::debug!("No {} found, using default configuration", DEFAULT_CONFIG_FILE);
        return Ok(ScrapeConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
        path: config_path.clone(),
        source,
    })?;
    let config: ScrapeConfig = serde_yaml::from_str(&contents)?;
    Ok(config)
}

pub use browser::{
    BrowserError, BrowserResult, ChromeDriver, ChromeDriverFactory, DriverFactory,
    PageDriver, ProductSignal, Readiness,
};
pub use item::{InputError, WorkItem, load_work_items};
pub use ledger::{Ledger, LedgerError, ResumePolicy};
pub use orchestrator::{Orchestrator, RunSummary};
pub use record::{AttemptRecord, AttemptStatus, OutputFields};
pub use retry::{RetryPolicy, process_item};
pub use session::{NavigationOutcome, SessionSettings, WorkerSession};
pub use sink::{CsvSink, MemorySink, RecordSink, SinkError};
pub use task::{ConfiguredExecutor, TaskExecutor};
pub use utils::{ScrapeError, backoff, jitter, jitter_duration, sleep_or_cancel};
