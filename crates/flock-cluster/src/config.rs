//! Cluster service configuration

use crate::error::{ClusterError, Result};
use crate::heartbeat::StalenessDetector;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `FLOCK_CLUSTER_ACQUIRE_LOCK_INTERVAL=2`
pub const ENV_PREFIX: &str = "FLOCK_CLUSTER";

/// Main cluster service configuration
///
/// Timing values are in seconds. Fields are validated as a whole by
/// [`ClusterServiceConfig::validate`]; invalid values are fatal at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterServiceConfig {
    /// Coordination directory shared by every node
    pub root: PathBuf,

    /// Extension of the data file next to each namespace lock file
    pub data_file_extension: String,

    /// Delay before the first acquisition attempt
    pub acquire_lock_delay: f64,

    /// Period between election ticks; also the recorded heartbeat interval
    pub acquire_lock_interval: f64,

    /// A leader is stale after `interval * multiplier` without a heartbeat
    pub heartbeat_timeout_multiplier: i64,

    /// Pause after losing leadership before trying to acquire it again
    pub acquire_leadership_backoff: f64,

    /// Timeout of a single data file read or write attempt
    pub cluster_data_task_timeout: f64,

    /// Attempts per data file read or write before the tick gives up
    pub cluster_data_task_max_attempts: i64,

    /// fsync the data file after each write
    pub sync_writes: bool,
}

impl Default for ClusterServiceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("cluster"),
            data_file_extension: "data".to_string(),
            acquire_lock_delay: 1.0,
            acquire_lock_interval: 10.0,
            heartbeat_timeout_multiplier: 5,
            acquire_leadership_backoff: 0.0,
            cluster_data_task_timeout: 10.0,
            cluster_data_task_max_attempts: 5,
            sync_writes: true,
        }
    }
}

impl ClusterServiceConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_acquire_lock_delay(mut self, delay: Duration) -> Self {
        self.acquire_lock_delay = delay.as_secs_f64();
        self
    }

    pub fn with_acquire_lock_interval(mut self, interval: Duration) -> Self {
        self.acquire_lock_interval = interval.as_secs_f64();
        self
    }

    pub fn with_heartbeat_timeout_multiplier(mut self, multiplier: i64) -> Self {
        self.heartbeat_timeout_multiplier = multiplier;
        self
    }

    pub fn with_acquire_leadership_backoff(mut self, backoff: Duration) -> Self {
        self.acquire_leadership_backoff = backoff.as_secs_f64();
        self
    }

    pub fn with_cluster_data_task_timeout(mut self, timeout: Duration) -> Self {
        self.cluster_data_task_timeout = timeout.as_secs_f64();
        self
    }

    pub fn with_data_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.data_file_extension = extension.into();
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClusterError::configuration(format!("Failed to read config file: {}", e)))?;

        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;

        std::fs::write(path, content)
            .map_err(|e| ClusterError::configuration(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Load configuration from an optional file layered with
    /// `FLOCK_CLUSTER_*` environment variables. Environment wins.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Validate configuration, producing the settings the election runs on
    pub fn validate(&self) -> Result<ElectionSettings> {
        if self.root.as_os_str().is_empty() {
            return Err(ClusterError::configuration("root cannot be empty"));
        }

        if self.data_file_extension.is_empty() {
            return Err(ClusterError::configuration("data_file_extension cannot be empty"));
        }

        if self.data_file_extension.contains(['/', '\\', '\0']) {
            return Err(ClusterError::configuration(
                "data_file_extension cannot contain path separators",
            ));
        }

        let staleness = StalenessDetector::new(self.heartbeat_timeout_multiplier)?;

        let acquire_lock_delay = seconds("acquire_lock_delay", self.acquire_lock_delay)?;

        let acquire_lock_interval = seconds("acquire_lock_interval", self.acquire_lock_interval)?;
        if acquire_lock_interval < Duration::from_millis(1) {
            return Err(ClusterError::configuration(
                "acquire_lock_interval must be at least 1ms",
            ));
        }

        let acquire_leadership_backoff =
            seconds("acquire_leadership_backoff", self.acquire_leadership_backoff)?;

        let data_task_timeout = seconds("cluster_data_task_timeout", self.cluster_data_task_timeout)?;
        if data_task_timeout.is_zero() {
            return Err(ClusterError::configuration(
                "cluster_data_task_timeout must be greater than zero",
            ));
        }

        if self.cluster_data_task_max_attempts < 1 {
            return Err(ClusterError::configuration(format!(
                "cluster_data_task_max_attempts must be >= 1, got {}",
                self.cluster_data_task_max_attempts
            )));
        }
        let data_task_max_attempts = u32::try_from(self.cluster_data_task_max_attempts)
            .map_err(|_| ClusterError::configuration("cluster_data_task_max_attempts is too large"))?;

        Ok(ElectionSettings {
            acquire_lock_delay,
            acquire_lock_interval,
            staleness,
            acquire_leadership_backoff,
            data_task_timeout,
            data_task_max_attempts,
            sync_writes: self.sync_writes,
        })
    }

    /// Lock and data file locations for a namespace
    pub fn paths_for(&self, namespace: &str) -> Result<NamespacePaths> {
        NamespacePaths::new(&self.root, namespace, &self.data_file_extension)
    }
}

/// Validated, typed view of [`ClusterServiceConfig`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElectionSettings {
    pub acquire_lock_delay: Duration,
    pub acquire_lock_interval: Duration,
    pub staleness: StalenessDetector,
    pub acquire_leadership_backoff: Duration,
    pub data_task_timeout: Duration,
    pub data_task_max_attempts: u32,
    pub sync_writes: bool,
}

impl ElectionSettings {
    /// Heartbeat interval written into every leader record
    pub fn heartbeat_interval_millis(&self) -> i64 {
        i64::try_from(self.acquire_lock_interval.as_millis()).unwrap_or(i64::MAX)
    }

    /// Upper bound for one relinquish write during shutdown
    pub fn relinquish_budget(&self) -> Duration {
        self.data_task_timeout
            .saturating_mul(self.data_task_max_attempts)
            .saturating_add(Duration::from_secs(1))
    }
}

/// Lock file and data file of one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePaths {
    pub lock_file: PathBuf,
    pub data_file: PathBuf,
}

impl NamespacePaths {
    pub fn new(root: &Path, namespace: &str, data_file_extension: &str) -> Result<Self> {
        validate_namespace(namespace)?;
        Ok(Self {
            lock_file: root.join(namespace),
            data_file: root.join(format!("{}.{}", namespace, data_file_extension)),
        })
    }
}

/// Namespaces name files directly under the root, so they must be plain names
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(ClusterError::invalid_namespace("namespace cannot be empty"));
    }
    if namespace == "." || namespace == ".." {
        return Err(ClusterError::invalid_namespace(format!(
            "namespace cannot be {:?}",
            namespace
        )));
    }
    if namespace.contains(['/', '\\', '\0']) {
        return Err(ClusterError::invalid_namespace(format!(
            "namespace cannot contain path separators: {:?}",
            namespace
        )));
    }
    Ok(())
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(ClusterError::configuration(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, value
        )));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| ClusterError::configuration(format!("{} is out of range: {}", name, e)))
}
