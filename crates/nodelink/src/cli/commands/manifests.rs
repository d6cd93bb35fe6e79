//! Manifests command

use clap::Args;

use crate::cli::output::path_style;
use crate::cli::{Cli, OutputFormat};

use super::DiscoveryArgs;

/// List the paths to the package manifests
#[derive(Debug, Args)]
pub struct ManifestsCommand {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,
}

impl ManifestsCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let (_, packages) = self.discovery.discover()?;

        match cli.format {
            OutputFormat::Json => {
                let manifests: Vec<serde_json::Value> = packages
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "name": p.name,
                            "manifest": p.manifest_path,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&manifests)?);
            }
            OutputFormat::Text => {
                for package in &packages {
                    println!("{}", path_style().apply_to(package.manifest_path.display()));
                }
            }
        }

        Ok(())
    }
}
