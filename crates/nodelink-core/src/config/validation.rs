//! Configuration validation

use globset::Glob;
use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_discovery(config)?;
    validate_setup(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_discovery(config: &Config) -> Result<()> {
    let manifest = &config.discovery.manifest;
    if manifest.is_empty() || manifest.contains(['/', '\\']) {
        return Err(ConfigError::InvalidValue {
            field: "discovery.manifest".to_string(),
            message: "must be a plain file name".to_string(),
        }
        .into());
    }

    for pattern in &config.discovery.exclude {
        if let Err(e) = Glob::new(pattern) {
            return Err(ConfigError::InvalidValue {
                field: "discovery.exclude".to_string(),
                message: format!("invalid glob '{}': {}", pattern, e),
            }
            .into());
        }
    }

    Ok(())
}

fn validate_setup(config: &Config) -> Result<()> {
    if config.setup.concurrency == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: "setup.concurrency".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into());
    }

    if config.setup.install.enabled && config.setup.install.command.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "setup.install.command".to_string(),
            message: "command cannot be empty when install is enabled".to_string(),
        }
        .into());
    }

    Ok(())
}
