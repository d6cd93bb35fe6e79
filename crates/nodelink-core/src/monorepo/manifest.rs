//! package.json handling

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

/// The parts of a package.json that package setup cares about
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
    /// Package name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Package version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Whether package is private
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,

    /// Dependencies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, serde_json::Value>>,

    /// Dev dependencies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_dependencies: Option<BTreeMap<String, serde_json::Value>>,

    /// Peer dependencies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_dependencies: Option<BTreeMap<String, serde_json::Value>>,

    /// Executables shipped by the package
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin: Option<BinField>,
}

/// The `bin` field: either a single script or a map of command names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinField {
    /// One executable named after the package
    Single(String),
    /// Command name to script path
    Map(BTreeMap<String, String>),
}

impl PackageJson {
    /// Load package.json from a path
    pub fn load(path: &Path) -> Result<Self, DiscoveryError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DiscoveryError::ManifestParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Self::parse(path, &content)
    }

    /// Parse package.json content read from `path`
    pub fn parse(path: &Path, content: &str) -> Result<Self, DiscoveryError> {
        serde_json::from_str(content).map_err(|e| DiscoveryError::ManifestParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Names of every declared dependency
    pub fn dependency_names(&self, include_dev: bool) -> BTreeSet<String> {
        let dev = if include_dev {
            self.dev_dependencies.as_ref()
        } else {
            None
        };

        [self.dependencies.as_ref(), dev, self.peer_dependencies.as_ref()]
            .into_iter()
            .flatten()
            .flat_map(|section| section.keys().cloned())
            .collect()
    }

    /// Executables as command name to script path, relative to the package
    /// directory. A single `bin` script is named after the unscoped package
    /// name.
    pub fn executables(&self) -> BTreeMap<String, String> {
        match (&self.bin, &self.name) {
            (Some(BinField::Single(script)), Some(name)) => {
                BTreeMap::from([(unscoped_name(name).to_string(), script.clone())])
            }
            (Some(BinField::Map(map)), _) => map.clone(),
            _ => BTreeMap::new(),
        }
    }
}

/// Package name without its `@scope/` prefix
pub fn unscoped_name(name: &str) -> &str {
    match name.strip_prefix('@') {
        Some(scoped) => scoped.split_once('/').map_or(name, |(_, bare)| bare),
        None => name,
    }
}
