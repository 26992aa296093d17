use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Eligibility policy applied to every listed upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Minimum age before an incomplete upload becomes eligible for abort.
    ///
    /// Env: S3_JANITOR__POLICY__MIN_AGE
    #[serde(with = "humantime_serde")]
    pub min_age: Duration,

    /// Restrict aborts to keys under this prefix.
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// When non-empty, only uploads initiated by one of these owners are
    /// touched; everything else is skipped.
    #[serde(default)]
    pub owner_allow_list: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_age: Duration::from_secs(24 * 3600),
            key_prefix: None,
            owner_allow_list: Vec::new(),
        }
    }
}

/// Execution knobs: retry, timeouts, and the two concurrency tiers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Log every would-be abort without issuing it.
    ///
    /// Env: S3_JANITOR__REAPER__DRY_RUN
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,

    /// Maximum attempts per provider call, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Backoff delay ceiling.
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Deadline for a single provider call.
    #[serde(with = "humantime_serde", default = "default_call_timeout")]
    pub call_timeout: Duration,

    /// Concurrent abort calls within one bucket.
    #[serde(default = "default_abort_workers")]
    pub abort_workers: usize,

    /// Concurrent bucket reapers across the whole target set.
    #[serde(default = "default_global_parallelism")]
    pub global_parallelism: usize,
}

fn default_dry_run() -> bool {
    true // Destructive runs are opt-in
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_abort_workers() -> usize {
    4
}

fn default_global_parallelism() -> usize {
    8
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            dry_run: default_dry_run(),
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            call_timeout: default_call_timeout(),
            abort_workers: default_abort_workers(),
            global_parallelism: default_global_parallelism(),
        }
    }
}

impl ReaperConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reaper.max_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        if self.abort_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reaper.abort_workers",
                message: "must be at least 1".to_string(),
            });
        }
        if self.global_parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reaper.global_parallelism",
                message: "must be at least 1".to_string(),
            });
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reaper.backoff_multiplier",
                message: format!("{} would shrink the delay", self.backoff_multiplier),
            });
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "reaper.call_timeout",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// One profile worth of buckets to reap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetConfig {
    pub profile: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Explicit bucket list; empty means "discover every visible bucket".
    #[serde(default)]
    pub buckets: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    pub policy: PolicyConfig,
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file("s3-janitor.toml"))
            .merge(Env::prefixed("S3_JANITOR__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &std::path::Path) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("S3_JANITOR__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reaper.validate()?;
        for target in &self.targets {
            if target.profile.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "targets.profile",
                    message: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}
