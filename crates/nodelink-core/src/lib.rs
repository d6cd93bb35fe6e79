//! Nodelink Core - local package linking for JavaScript monorepos
//!
//! This crate provides the error types, configuration, package discovery and
//! per-package setup actions. Scheduling is delegated to `nodelink-tasks`.

pub mod config;
pub mod error;
pub mod monorepo;
pub mod setup;

pub use config::Config;
pub use error::{ConfigError, DiscoveryError, NodelinkError, Result, SetupError};
pub use monorepo::{package_graph, DiscoveredPackage, PackageDiscovery, PackageGraph};
pub use setup::{Installer, PackageOutcome, PackageSetup, SetupMode, SetupReport};
