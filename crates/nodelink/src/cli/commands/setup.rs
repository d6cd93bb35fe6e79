//! Setup command: link local packages and install the rest

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use nodelink_core::{package_graph, Installer, PackageGraph, PackageOutcome, SetupMode, SetupReport};
use nodelink_tasks::{TaskEvent, TaskReporter, TracingReporter};

use crate::cli::output::{self, header, package_style, plural};
use crate::cli::{Cli, OutputFormat};

use super::DiscoveryArgs;

/// Link local packages and install the rest
#[derive(Debug, Args)]
pub struct SetupCommand {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    /// Maximum packages set up at once (default: number of processors)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: Option<u16>,

    /// Link local packages without running the install command
    #[arg(long)]
    pub no_install: bool,

    /// Wait this many milliseconds per package instead of setting it up
    #[arg(long, value_name = "MS")]
    pub simulate: Option<u64>,

    /// Show execution plan without running
    #[arg(long)]
    pub dry_run: bool,
}

impl SetupCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let (mut config, packages) = self.discovery.discover()?;

        if let Some(concurrency) = self.concurrency {
            config.setup.concurrency = Some(usize::from(concurrency));
        }
        if self.no_install {
            config.setup.install.enabled = false;
        }

        if packages.is_empty() {
            if !cli.quiet && cli.format == OutputFormat::Text {
                output::warning("No packages found");
            }
            return Ok(());
        }

        // A cycle fails here, before anything is touched
        let graph = package_graph(packages)?;

        if self.dry_run {
            return print_plan(cli, &graph);
        }

        let mode = match self.simulate {
            Some(ms) => SetupMode::Simulate(Duration::from_millis(ms)),
            None => SetupMode::Install,
        };
        let installer = Installer::new(config.setup.clone(), mode);

        if !cli.quiet && cli.format == OutputFormat::Text {
            output::info(&format!(
                "Setting up {} package{} ({} at a time)",
                graph.len(),
                plural(graph.len()),
                installer.concurrency()
            ));
            if config.setup.install.enabled && mode == SetupMode::Install {
                println!(
                    "  {}",
                    style(format!("install command: {}", config.setup.install.command_line())).dim()
                );
            }
            println!();
        }

        let reporter: Arc<dyn TaskReporter> = if cli.quiet || cli.format == OutputFormat::Json {
            Arc::new(TracingReporter)
        } else {
            Arc::new(ConsoleReporter::new(graph.len(), cli.verbose))
        };
        let installer = installer.with_reporter(reporter);

        let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
        let report = runtime.block_on(installer.run(&graph))?;

        match cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text if !cli.quiet => print_summary(&report),
            OutputFormat::Text => {}
        }

        report.into_result()?;
        Ok(())
    }
}

fn print_plan(cli: &Cli, graph: &PackageGraph) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => {
            let plan: Vec<serde_json::Value> = graph
                .iter()
                .map(|node| {
                    serde_json::json!({
                        "name": node.id,
                        "path": node.payload.path,
                        "after": graph.dependencies_in_graph(&node.id),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        OutputFormat::Text => {
            println!("{}", header("Execution plan"));
            print!("{}", graph.execution_plan());
            println!();
            println!(
                "{}",
                style("[DRY RUN - no packages will be set up]").yellow().bold()
            );
        }
    }
    Ok(())
}

fn print_summary(report: &SetupReport) {
    let failed: Vec<&PackageOutcome> = report.failed().collect();
    let skipped: Vec<&PackageOutcome> = report.skipped().collect();
    let completed = report.completed().count();

    println!();
    if failed.is_empty() && skipped.is_empty() {
        output::success(&format!(
            "{} package{} set up in {:.1}s",
            completed,
            plural(completed),
            Duration::from_millis(report.duration_ms).as_secs_f64()
        ));
        return;
    }

    output::error(&format!(
        "{}/{} packages set up, {} failed, {} skipped",
        completed,
        report.packages.len(),
        failed.len(),
        skipped.len()
    ));
    for outcome in failed {
        if let PackageOutcome::Failed { name, reason } = outcome {
            println!("    {} {}: {}", style("✗").red(), style(name).red(), reason);
        }
    }
    for outcome in skipped {
        if let PackageOutcome::Skipped {
            name, blocked_by, ..
        } = outcome
        {
            println!(
                "    {} {} {}",
                style("○").yellow(),
                style(name).yellow(),
                style(format!("(blocked by {})", blocked_by)).dim()
            );
        }
    }
}

/// Console reporter with a progress bar
struct ConsoleReporter {
    progress: ProgressBar,
    verbose: bool,
}

impl ConsoleReporter {
    fn new(total: usize, verbose: bool) -> Self {
        let progress = ProgressBar::new(total as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        progress.enable_steady_tick(Duration::from_millis(100));
        Self { progress, verbose }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Queued { id } => {
                if self.verbose {
                    self.progress
                        .println(format!("  {} {} queued", style("·").dim(), id));
                }
            }
            TaskEvent::Started { id } => {
                self.progress.set_message(id.clone());
                if self.verbose {
                    self.progress.println(format!(
                        "  {} {}",
                        style("▸").dim(),
                        style(id).bold()
                    ));
                }
            }
            TaskEvent::Completed { id, duration } => {
                self.progress.inc(1);
                self.progress.println(format!(
                    "  {} {} {}",
                    style("✓").green(),
                    package_style().apply_to(id),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim()
                ));
            }
            TaskEvent::Failed {
                id,
                duration,
                error,
            } => {
                self.progress.inc(1);
                self.progress.println(format!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(id).red(),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                    style(error).red().dim()
                ));
            }
            TaskEvent::Skipped { id, blocked_by } => {
                self.progress.inc(1);
                self.progress.println(format!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(id).yellow(),
                    style(format!("(blocked by {})", blocked_by)).dim()
                ));
            }
            TaskEvent::AllCompleted { .. } => {
                self.progress.finish_and_clear();
            }
        }
    }
}
