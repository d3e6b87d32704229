use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub database_path: String,
    pub media_directory: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    pub slicer: SlicerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path)
    }

    pub fn media_directory(&self) -> PathBuf {
        PathBuf::from(&self.media_directory)
    }
}

/// How the external slicing engine is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlicerConfig {
    /// Path to the engine executable.
    pub binary: String,
    /// Program the binary is run through, e.g. `bash` for a wrapper script.
    #[serde(default)]
    pub launcher: Option<String>,
    /// Printer/print profile passed with `--load`.
    pub profile: String,
    /// Where G-code is written. When unset the engine writes next to the input.
    #[serde(default)]
    pub output_directory: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_threads")]
    pub threads: u32,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Case-insensitive regexes marking output that no retry can fix.
    #[serde(default = "default_permanent_failure_patterns")]
    pub permanent_failure_patterns: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_threads() -> u32 {
    1
}

pub fn default_permanent_failure_patterns() -> Vec<String> {
    vec![
        r"exceeds? the maximum build volume".to_string(),
        r"outside of the print volume".to_string(),
        r"could not fit on the bed".to_string(),
        r"too tall and cannot be sliced".to_string(),
        r"no object.*(?:printable|fit)".to_string(),
    ]
}

impl SlicerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per queue entry, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt + 1`, given `attempt` failed attempts so far.
    /// Doubles from `base_delay_ms` and saturates at `max_delay_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a claimed entry stays invisible to other workers. Must outlive
    /// the slicer timeout or healthy jobs get redelivered.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_lease_secs() -> u64 {
    900
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            lease_secs: default_lease_secs(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Machine-time charge per started hour, in minor currency units.
    #[serde(default = "default_hourly_rate")]
    pub hourly_rate: i64,
}

fn default_hourly_rate() -> i64 {
    crate::pricing::TIME_RATE
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            hourly_rate: default_hourly_rate(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
