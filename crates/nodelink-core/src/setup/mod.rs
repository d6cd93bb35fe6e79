//! Package setup
//!
//! Sets up every discovered package once all of its local dependencies have
//! been set up: local dependencies are linked into the package's
//! `node_modules`, their executables are exposed in `node_modules/.bin`, and
//! the configured install command fetches everything else. Packages run on
//! the dependency scheduler, so independent packages are set up in parallel
//! up to the configured concurrency.

mod install;
mod link;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nodelink_tasks::{
    DependencyScheduler, Node, NodeFailure, RunError, SchedulerOptions, TaskReporter,
    TracingReporter,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, instrument};

use crate::config::SetupConfig;
use crate::error::{Result, SetupError};
use crate::monorepo::{DiscoveredPackage, PackageGraph};

pub use install::InstallCommand;
pub use link::{clear_link, link_dependency, link_executables, node_modules_dir, BIN_DIR};

/// How packages are set up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupMode {
    /// Link local dependencies and run the install command
    Install,
    /// Wait the given time per package without touching the filesystem
    Simulate(Duration),
}

/// What setup did for one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSetup {
    /// Package name
    pub name: String,
    /// Package directory
    pub path: PathBuf,
    /// Local dependencies linked into `node_modules`
    pub linked: Vec<String>,
    /// Executables linked into `node_modules/.bin`
    pub bins: Vec<String>,
    /// Whether the install command ran
    pub installed: bool,
    /// Time spent on this package in milliseconds
    pub duration_ms: u64,
}

/// Final outcome of one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PackageOutcome {
    /// Setup finished
    Completed(PackageSetup),
    /// Setup of this package failed
    Failed { name: String, reason: String },
    /// Never set up because a dependency did not complete
    Skipped {
        name: String,
        blocked_by: String,
        root: String,
    },
}

impl PackageOutcome {
    /// Name of the package
    pub fn name(&self) -> &str {
        match self {
            Self::Completed(setup) => &setup.name,
            Self::Failed { name, .. } | Self::Skipped { name, .. } => name,
        }
    }
}

/// Outcome of a whole setup run
#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    /// Every package, in topological order
    pub packages: Vec<PackageOutcome>,
    /// Wall time of the run in milliseconds
    pub duration_ms: u64,
    #[serde(skip)]
    error: Option<RunError>,
}

impl SetupReport {
    /// Check if every package was set up
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Packages that were set up
    pub fn completed(&self) -> impl Iterator<Item = &PackageSetup> {
        self.packages.iter().filter_map(|outcome| match outcome {
            PackageOutcome::Completed(setup) => Some(setup),
            _ => None,
        })
    }

    /// Packages whose setup failed
    pub fn failed(&self) -> impl Iterator<Item = &PackageOutcome> {
        self.packages
            .iter()
            .filter(|outcome| matches!(outcome, PackageOutcome::Failed { .. }))
    }

    /// Packages skipped because a dependency failed
    pub fn skipped(&self) -> impl Iterator<Item = &PackageOutcome> {
        self.packages
            .iter()
            .filter(|outcome| matches!(outcome, PackageOutcome::Skipped { .. }))
    }

    /// Turn a failed run into an error carrying every failure
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(error) => Err(SetupError::Run(error).into()),
            None => Ok(self),
        }
    }
}

/// Sets up the packages of a graph in dependency order
pub struct Installer {
    config: SetupConfig,
    mode: SetupMode,
    reporter: Arc<dyn TaskReporter>,
}

impl Installer {
    /// Create an installer that reports through tracing
    pub fn new(config: SetupConfig, mode: SetupMode) -> Self {
        Self {
            config,
            mode,
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Report progress to the given reporter instead
    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Number of packages set up at once
    pub fn concurrency(&self) -> usize {
        self.config.effective_concurrency()
    }

    /// Resolve the install command, if this run uses one.
    ///
    /// Called before any package is touched so a missing installer fails the
    /// run up front.
    pub fn install_command(&self) -> Result<Option<InstallCommand>> {
        match self.mode {
            SetupMode::Install if self.config.install.enabled => {
                Ok(Some(InstallCommand::resolve(&self.config.install)?))
            }
            _ => Ok(None),
        }
    }

    /// Set up every package of the graph.
    ///
    /// Package failures do not fail the call; they are recorded in the
    /// report and block only the packages that depend on them.
    #[instrument(skip_all, fields(packages = graph.len(), mode = ?self.mode))]
    pub async fn run(&self, graph: &PackageGraph) -> Result<SetupReport> {
        let command = self.install_command()?.map(Arc::new);
        let scheduler = DependencyScheduler::new(
            SchedulerOptions {
                concurrency: self.concurrency(),
            },
            self.reporter.clone(),
        )
        .map_err(SetupError::Pool)?;

        let locals: Arc<HashMap<String, DiscoveredPackage>> = Arc::new(
            graph
                .iter()
                .map(|node| (node.id.clone(), node.payload.clone()))
                .collect(),
        );
        let mode = self.mode;
        let link_bins = self.config.link_bins;

        let started = Instant::now();
        let run = scheduler.schedule(graph, move |node: Arc<Node<DiscoveredPackage>>| {
            let locals = locals.clone();
            let command = command.clone();
            async move {
                setup_package(&node.payload, &locals, mode, link_bins, command.as_deref()).await
            }
        });

        let completions: Vec<_> = graph
            .sorted()
            .iter()
            .filter_map(|name| run.completion(name))
            .collect();
        let error = run.wait().await.err();

        let mut packages = Vec::with_capacity(completions.len());
        for completion in completions {
            packages.push(match completion.await {
                Ok(setup) => PackageOutcome::Completed(setup),
                Err(NodeFailure::Failed { node, reason }) => PackageOutcome::Failed {
                    name: node,
                    reason,
                },
                Err(NodeFailure::Blocked {
                    node,
                    blocked_by,
                    root,
                }) => PackageOutcome::Skipped {
                    name: node,
                    blocked_by,
                    root,
                },
            });
        }

        Ok(SetupReport {
            packages,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        })
    }
}

async fn setup_package(
    package: &DiscoveredPackage,
    locals: &HashMap<String, DiscoveredPackage>,
    mode: SetupMode,
    link_bins: bool,
    command: Option<&InstallCommand>,
) -> std::result::Result<PackageSetup, SetupError> {
    let started = Instant::now();
    let dependencies: Vec<&DiscoveredPackage> = package
        .dependencies
        .iter()
        .filter_map(|name| locals.get(name))
        .collect();

    let mut linked = Vec::with_capacity(dependencies.len());
    let mut bins = Vec::new();
    let mut installed = false;

    match mode {
        SetupMode::Simulate(delay) => {
            tokio::time::sleep(delay).await;
            for dependency in &dependencies {
                linked.push(dependency.name.clone());
                if link_bins {
                    bins.extend(dependency.bin.keys().cloned());
                }
            }
            info!(package = %package.name, "All dependencies for {} are installed", package.name);
        }
        SetupMode::Install => {
            let node_modules = node_modules_dir(&package.path);
            create_node_modules(&package.path, &node_modules)?;

            for dependency in &dependencies {
                link_dependency(&node_modules, dependency)?;
                linked.push(dependency.name.clone());
                if link_bins {
                    bins.extend(link_executables(&node_modules, dependency)?);
                }
            }

            if let Some(command) = command {
                command.run(&package.path).await?;
                installed = true;
            }
        }
    }

    Ok(PackageSetup {
        name: package.name.clone(),
        path: package.path.clone(),
        linked,
        bins,
        installed,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

fn create_node_modules(
    package_dir: &Path,
    node_modules: &Path,
) -> std::result::Result<(), SetupError> {
    std::fs::create_dir_all(node_modules).map_err(|source| SetupError::Link {
        src: package_dir.to_path_buf(),
        dest: node_modules.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallConfig;
    use crate::monorepo::package_graph;
    use nodelink_tasks::{CollectingReporter, TaskEvent};
    use std::collections::{BTreeMap, BTreeSet};

    fn package(root: &Path, name: &str, deps: &[&str]) -> DiscoveredPackage {
        let path = root.join(name);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("package.json"), format!(r#"{{"name": "{name}"}}"#)).unwrap();
        DiscoveredPackage {
            name: name.to_string(),
            version: None,
            manifest_path: path.join("package.json"),
            path,
            dependencies: deps.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>(),
            bin: BTreeMap::new(),
            private: false,
        }
    }

    fn config(concurrency: usize, install: InstallConfig) -> SetupConfig {
        SetupConfig {
            concurrency: Some(concurrency),
            link_bins: true,
            install,
        }
    }

    fn no_install() -> InstallConfig {
        InstallConfig {
            enabled: false,
            ..InstallConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_run_sets_up_in_dependency_order() {
        let temp = tempfile::TempDir::new().unwrap();
        let graph = package_graph(vec![
            package(temp.path(), "app", &["ui", "react"]),
            package(temp.path(), "core", &[]),
            package(temp.path(), "ui", &["core"]),
        ])
        .unwrap();

        let reporter = Arc::new(CollectingReporter::default());
        let installer = Installer::new(
            config(4, InstallConfig::default()),
            SetupMode::Simulate(Duration::from_millis(500)),
        )
        .with_reporter(reporter.clone());

        let report = installer.run(&graph).await.unwrap();

        assert!(report.is_success());
        assert_eq!(reporter.started(), vec!["core", "ui", "app"]);
        let names: Vec<&str> = report.packages.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["core", "ui", "app"]);
        let app = report.completed().find(|p| p.name == "app").unwrap();
        assert_eq!(app.linked, vec!["ui"]);
        assert!(!app.installed);
        assert!(!temp.path().join("app").join("node_modules").exists());
        assert!(report.duration_ms >= 1500 && report.duration_ms < 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_independent_packages_run_together() {
        let temp = tempfile::TempDir::new().unwrap();
        let graph = package_graph(vec![
            package(temp.path(), "a", &[]),
            package(temp.path(), "b", &[]),
            package(temp.path(), "c", &[]),
        ])
        .unwrap();

        let installer = Installer::new(
            config(3, no_install()),
            SetupMode::Simulate(Duration::from_millis(200)),
        );
        let report = installer.run(&graph).await.unwrap();

        assert_eq!(report.completed().count(), 3);
        assert!(report.duration_ms >= 200 && report.duration_ms < 400);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_links_local_dependencies() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut core = package(temp.path(), "core", &[]);
        std::fs::write(core.path.join("cli.js"), "").unwrap();
        core.bin.insert("core-cli".to_string(), "cli.js".to_string());
        let app = package(temp.path(), "app", &["core", "lodash"]);
        let graph = package_graph(vec![app, core]).unwrap();

        let installer = Installer::new(config(2, no_install()), SetupMode::Install);
        let report = installer.run(&graph).await.unwrap().into_result().unwrap();

        let app_modules = temp.path().join("app").join("node_modules");
        assert!(app_modules.join("core").join("package.json").is_file());
        assert!(!app_modules.join("lodash").exists());
        assert!(app_modules.join(BIN_DIR).join("core-cli").exists());
        assert!(temp.path().join("core").join("node_modules").is_dir());

        let app = report.completed().find(|p| p.name == "app").unwrap();
        assert_eq!(app.bins, vec!["core-cli"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_failure_skips_dependents_only() {
        let temp = tempfile::TempDir::new().unwrap();
        let core = package(temp.path(), "core", &[]);
        std::fs::write(core.path.join("fail"), "").unwrap();
        let graph = package_graph(vec![
            core,
            package(temp.path(), "app", &["core"]),
            package(temp.path(), "other", &[]),
        ])
        .unwrap();

        let install = InstallConfig {
            enabled: true,
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "if [ -f fail ]; then echo nope >&2; exit 1; fi".to_string(),
            ],
        };
        let reporter = Arc::new(CollectingReporter::default());
        let installer =
            Installer::new(config(2, install), SetupMode::Install).with_reporter(reporter.clone());

        let report = installer.run(&graph).await.unwrap();

        assert!(!report.is_success());
        let failed: Vec<&str> = report.failed().map(|p| p.name()).collect();
        assert_eq!(failed, vec!["core"]);
        match report.skipped().next().unwrap() {
            PackageOutcome::Skipped {
                name, blocked_by, ..
            } => {
                assert_eq!(name, "app");
                assert_eq!(blocked_by, "core");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let other = report.completed().find(|p| p.name == "other").unwrap();
        assert!(other.installed);
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, TaskEvent::Skipped { id, .. } if id == "app")));

        let err = report.into_result().unwrap_err();
        assert!(err.to_string().contains("1 task failed, 1 skipped"));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_missing_install_command_fails_up_front() {
        let install = InstallConfig {
            command: "nodelink-no-such-installer".to_string(),
            ..InstallConfig::default()
        };
        let installer = Installer::new(config(1, install.clone()), SetupMode::Install);
        assert!(installer.install_command().is_err());

        let simulated = Installer::new(
            config(1, install),
            SetupMode::Simulate(Duration::from_millis(1)),
        );
        assert!(simulated.install_command().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let graph = package_graph(vec![package(temp.path(), "a", &[])]).unwrap();
        let installer = Installer::new(config(0, no_install()), SetupMode::Install);
        assert!(installer.run(&graph).await.is_err());
    }
}
