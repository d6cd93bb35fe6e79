//! Exit codes for the CLI

use nodelink_core::NodelinkError;

/// Success
pub const SUCCESS: u8 = 0;

/// General error
pub const ERROR: u8 = 1;

/// Configuration error
pub const CONFIG_ERROR: u8 = 2;

/// Package discovery error
pub const DISCOVERY_ERROR: u8 = 3;

/// Dependency cycle or otherwise invalid package graph
pub const GRAPH_ERROR: u8 = 4;

/// One or more packages failed to set up
pub const SETUP_ERROR: u8 = 5;

/// Map an error to the exit code it should produce
pub fn for_error(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<NodelinkError>() {
        Some(NodelinkError::Config(_)) => CONFIG_ERROR,
        Some(NodelinkError::Discovery(_)) => DISCOVERY_ERROR,
        Some(NodelinkError::Graph(_)) => GRAPH_ERROR,
        Some(NodelinkError::Setup(_)) => SETUP_ERROR,
        _ => ERROR,
    }
}
