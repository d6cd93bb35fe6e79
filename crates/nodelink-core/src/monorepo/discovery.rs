//! Package discovery under search roots

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::config::DiscoveryConfig;
use crate::error::{ConfigError, DiscoveryError, Result};

use super::manifest::PackageJson;

/// A discovered package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredPackage {
    /// Package name
    pub name: String,
    /// Package version, if declared
    pub version: Option<String>,
    /// Path to the package directory
    pub path: PathBuf,
    /// Path to the manifest file
    pub manifest_path: PathBuf,
    /// Every declared dependency name, local or not
    pub dependencies: BTreeSet<String>,
    /// Executables as command name to script path
    pub bin: BTreeMap<String, String>,
    /// Whether this is a private package
    pub private: bool,
}

impl DiscoveredPackage {
    /// Create from a parsed manifest
    pub fn from_manifest(
        manifest: PackageJson,
        manifest_path: &Path,
        include_dev: bool,
    ) -> std::result::Result<Self, DiscoveryError> {
        let dependencies = manifest.dependency_names(include_dev);
        let bin = manifest.executables();
        let name = manifest
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| DiscoveryError::MissingName(manifest_path.to_path_buf()))?;

        Ok(Self {
            name,
            version: manifest.version,
            path: manifest_path
                .parent()
                .unwrap_or(Path::new("."))
                .to_path_buf(),
            manifest_path: manifest_path.to_path_buf(),
            dependencies,
            bin,
            private: manifest.private.unwrap_or(false),
        })
    }
}

/// Finds packages by walking directories for manifest files.
///
/// A directory holding a manifest is a package and is not searched further.
/// Directories matching an exclude pattern are never entered, and symbolic
/// links are not followed.
pub struct PackageDiscovery {
    manifest: String,
    exclude: GlobSet,
    include_dev: bool,
}

impl PackageDiscovery {
    /// Create a discovery instance from configuration
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude {
            let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidValue {
                field: "discovery.exclude".to_string(),
                message: format!("invalid glob '{}': {}", pattern, e),
            })?;
            builder.add(glob);
        }
        let exclude = builder.build().map_err(|e| ConfigError::InvalidValue {
            field: "discovery.exclude".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            manifest: config.manifest.clone(),
            exclude,
            include_dev: config.dev_dependencies,
        })
    }

    /// Discover all packages under the given roots, sorted by name
    #[instrument(skip_all, fields(roots = roots.len(), manifest = %self.manifest))]
    pub fn discover<P: AsRef<Path>>(&self, roots: &[P]) -> Result<Vec<DiscoveredPackage>> {
        let mut packages: Vec<DiscoveredPackage> = Vec::new();
        let mut by_name: HashMap<String, PathBuf> = HashMap::new();
        let mut seen_manifests: HashSet<PathBuf> = HashSet::new();

        for root in roots {
            let root = root.as_ref();
            if !root.is_dir() {
                warn!(root = %root.display(), "search root is not a directory, skipping");
                continue;
            }

            for manifest_path in self.find_manifests(root)? {
                let canonical =
                    std::fs::canonicalize(&manifest_path).unwrap_or_else(|_| manifest_path.clone());
                if !seen_manifests.insert(canonical) {
                    debug!(manifest = %manifest_path.display(), "manifest already discovered");
                    continue;
                }

                let manifest = PackageJson::load(&manifest_path)?;
                let package =
                    DiscoveredPackage::from_manifest(manifest, &manifest_path, self.include_dev)?;

                if let Some(first) = by_name.get(&package.name) {
                    return Err(DiscoveryError::DuplicatePackage {
                        name: package.name,
                        first: first.clone(),
                        second: manifest_path,
                    }
                    .into());
                }

                debug!(
                    package = %package.name,
                    path = %package.path.display(),
                    dependencies = package.dependencies.len(),
                    "discovered package"
                );
                by_name.insert(package.name.clone(), manifest_path);
                packages.push(package);
            }
        }

        packages.sort_by(|a, b| a.name.cmp(&b.name));
        info!(count = packages.len(), "discovered packages");
        Ok(packages)
    }

    /// Manifest paths under one root, in file name order
    fn find_manifests(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut manifests = Vec::new();
        let mut walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| DiscoveryError::Walk {
                path: e.path().unwrap_or(root).to_path_buf(),
                reason: e.to_string(),
            })?;

            if !entry.file_type().is_dir() {
                continue;
            }

            if entry.depth() > 0 && self.is_excluded(root, entry.path()) {
                debug!(dir = %entry.path().display(), "excluded from discovery");
                walker.skip_current_dir();
                continue;
            }

            let manifest_path = entry.path().join(&self.manifest);
            if manifest_path.is_file() {
                manifests.push(manifest_path);
                walker.skip_current_dir();
            }
        }

        Ok(manifests)
    }

    /// Match either the directory name or its path relative to the root
    fn is_excluded(&self, root: &Path, dir: &Path) -> bool {
        if dir
            .file_name()
            .is_some_and(|name| self.exclude.is_match(Path::new(name)))
        {
            return true;
        }
        dir.strip_prefix(root)
            .is_ok_and(|relative| self.exclude.is_match(relative))
    }
}
