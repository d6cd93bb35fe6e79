//! Names command

use clap::Args;

use crate::cli::output::package_style;
use crate::cli::{Cli, OutputFormat};

use super::DiscoveryArgs;

/// List the names of the packages
#[derive(Debug, Args)]
pub struct NamesCommand {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,
}

impl NamesCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let (_, packages) = self.discovery.discover()?;

        match cli.format {
            OutputFormat::Json => {
                let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
                println!("{}", serde_json::to_string_pretty(&names)?);
            }
            OutputFormat::Text => {
                for package in &packages {
                    println!("{}", package_style().apply_to(&package.name));
                }
            }
        }

        Ok(())
    }
}
