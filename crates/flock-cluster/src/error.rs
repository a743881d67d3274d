//! Cluster error types

use std::io;

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Cluster-specific error types
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Invalid configuration. Always fatal: raised while constructing or
    /// starting the service.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Failed to acquire lock file: {0}")]
    LockAcquisition(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Cluster data task failed: {0}")]
    DataTask(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClusterError {
    pub fn configuration<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_namespace<T: Into<String>>(msg: T) -> Self {
        Self::InvalidNamespace(msg.into())
    }

    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn data_task<T: Into<String>>(msg: T) -> Self {
        Self::DataTask(msg.into())
    }

    pub fn runtime<T: Into<String>>(msg: T) -> Self {
        Self::Runtime(msg.into())
    }

    /// Whether this error must abort service initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Runtime(_))
    }
}

impl From<toml::de::Error> for ClusterError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for ClusterError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(format!("TOML serialize error: {}", err))
    }
}

impl From<::config::ConfigError> for ClusterError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::configuration(format!("Failed to load config: {}", err))
    }
}
