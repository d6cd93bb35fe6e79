//! CLI commands

mod manifests;
mod names;
mod setup;

use std::path::{Path, PathBuf};

use clap::Args;
use tracing::debug;

use nodelink_core::config::load_config_or_default;
use nodelink_core::{Config, DiscoveredPackage, PackageDiscovery};

pub use manifests::ManifestsCommand;
pub use names::NamesCommand;
pub use setup::SetupCommand;

/// Where to look for packages
#[derive(Debug, Clone, Args)]
pub struct DiscoveryArgs {
    /// Where to look for packages (can be repeated)
    #[arg(short = 'd', long = "dir", value_name = "DIR", default_value = ".")]
    pub dirs: Vec<PathBuf>,
}

impl DiscoveryArgs {
    /// Load configuration and discover the packages under the given roots
    pub fn discover(&self) -> anyhow::Result<(Config, Vec<DiscoveredPackage>)> {
        let cwd = std::env::current_dir()?;
        self.discover_from(&cwd)
    }

    /// Like [`discover`](Self::discover), with relative roots resolved against `cwd`
    pub fn discover_from(&self, cwd: &Path) -> anyhow::Result<(Config, Vec<DiscoveredPackage>)> {
        let config_dir = self.config_dir(cwd);
        let (config, config_path) = load_config_or_default(&config_dir)?;
        if let Some(path) = &config_path {
            debug!(path = %path.display(), "using config file");
        }

        let roots: Vec<PathBuf> = self.dirs.iter().map(|dir| resolve(cwd, dir)).collect();
        let packages = PackageDiscovery::new(&config.discovery)?.discover(&roots)?;
        Ok((config, packages))
    }

    /// The config file is searched upward from the first root, or from `cwd`
    /// when that root is not a directory
    fn config_dir(&self, cwd: &Path) -> PathBuf {
        match self.dirs.first().map(|dir| resolve(cwd, dir)) {
            Some(root) if root.is_dir() => root,
            _ => cwd.to_path_buf(),
        }
    }
}

/// Join `dir` onto `cwd`, dropping `.` components
fn resolve(cwd: &Path, dir: &Path) -> PathBuf {
    cwd.join(dir).components().collect()
}
