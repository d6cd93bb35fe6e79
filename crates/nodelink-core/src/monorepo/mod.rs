//! Local package discovery for multi-package repositories
//!
//! This module finds the packages under a set of search roots and builds
//! the dependency graph between them:
//! - Manifest parsing (`package.json`)
//! - Directory walking with exclude globs
//! - Package dependency graph over the task scheduler's graph type

pub mod discovery;
pub mod graph;
pub mod manifest;

pub use discovery::{DiscoveredPackage, PackageDiscovery};
pub use graph::{local_dependencies, package_graph, PackageGraph};
pub use manifest::{BinField, PackageJson};
