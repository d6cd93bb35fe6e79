//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "nodelink.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "nodelink.yaml";

/// Manifest file that marks a package directory
pub const DEFAULT_MANIFEST: &str = "package.json";

/// Directory that holds installed and linked dependencies
pub const NODE_MODULES: &str = "node_modules";

/// Get list of config file names to search for, in priority order
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".nodelink.toml",
        ".nodelink.yaml",
    ]
}
