//! Configuration types

use serde::{Deserialize, Serialize};

use nodelink_tasks::default_concurrency;

use super::defaults::{DEFAULT_MANIFEST, NODE_MODULES};

/// Main configuration for Nodelink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Package discovery configuration
    pub discovery: DiscoveryConfig,

    /// Package setup configuration
    pub setup: SetupConfig,
}

/// How packages are found under the search roots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Manifest file name that marks a package directory
    pub manifest: String,

    /// Glob patterns for directories that are never searched
    pub exclude: Vec<String>,

    /// Whether `devDependencies` count as dependency edges
    pub dev_dependencies: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            manifest: DEFAULT_MANIFEST.to_string(),
            exclude: vec![NODE_MODULES.to_string()],
            dev_dependencies: true,
        }
    }
}

/// How each package is set up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// Maximum packages set up at once; the processor count when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Link the executables of local dependencies into `node_modules/.bin`
    pub link_bins: bool,

    /// External install step
    pub install: InstallConfig,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            link_bins: true,
            install: InstallConfig::default(),
        }
    }
}

impl SetupConfig {
    /// Concurrency to run with
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.unwrap_or_else(default_concurrency)
    }
}

/// External install command run in each package directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Whether the install command runs at all
    pub enabled: bool,

    /// Program to run
    pub command: String,

    /// Arguments passed to the program
    pub args: Vec<String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "npm".to_string(),
            args: vec!["install".to_string()],
        }
    }
}

impl InstallConfig {
    /// The command line as a single string, for display
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
