//! Error types for Nodelink

use std::path::PathBuf;
use thiserror::Error;

use nodelink_tasks::{DagError, PoolError, RunError};

/// Result type alias using NodelinkError
pub type Result<T> = std::result::Result<T, NodelinkError>;

/// Main error type for Nodelink operations
#[derive(Debug, Error)]
pub enum NodelinkError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Package discovery errors
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Errors while setting up packages
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// The package dependency graph is invalid
    #[error(transparent)]
    Graph(#[from] DagError),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Package discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to read or parse a manifest
    #[error("Failed to parse manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    /// Manifest has no package name
    #[error("Manifest {0} has no \"name\" field")]
    MissingName(PathBuf),

    /// Two manifests declare the same package name
    #[error("Package '{name}' is defined by both {first} and {second}")]
    DuplicatePackage {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Failed to walk a directory
    #[error("Failed to walk {path}: {reason}")]
    Walk { path: PathBuf, reason: String },
}

/// Errors raised by the per-package setup actions
#[derive(Debug, Error)]
pub enum SetupError {
    /// The install command is not on PATH
    #[error("Install command '{0}' not found on PATH")]
    CommandNotFound(String),

    /// The install command could not be started
    #[error("Failed to spawn '{command}' in {dir}: {reason}")]
    SpawnFailed {
        command: String,
        dir: PathBuf,
        reason: String,
    },

    /// The install command exited unsuccessfully
    #[error("'{command}' exited with code {code} in {dir}: {stderr}")]
    CommandFailed {
        command: String,
        dir: PathBuf,
        code: i32,
        stderr: String,
    },

    /// Creating or removing a link failed
    #[error("Failed to link {dest} -> {src}: {source}")]
    Link {
        src: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The executor pool could not be created
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// One or more packages failed to set up
    #[error(transparent)]
    Run(#[from] RunError),
}
