mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {:?}", path))
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./castforge.toml",
        "~/.config/castforge/config.toml",
        "/etc/castforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let streaming = &config.streaming;
    if streaming.segment_duration_secs == 0 {
        anyhow::bail!("streaming.segment_duration_secs must be greater than 0");
    }
    if streaming.window_size == 0 {
        anyhow::bail!("streaming.window_size must be greater than 0");
    }
    if streaming.kill_grace_secs == 0 {
        anyhow::bail!("streaming.kill_grace_secs must be greater than 0");
    }
    if streaming.sweep_interval_secs == 0 {
        anyhow::bail!("streaming.sweep_interval_secs must be greater than 0");
    }
    if streaming.channel_capacity == 0 {
        anyhow::bail!("streaming.channel_capacity must be greater than 0");
    }
    if streaming.direct_bytes_per_second == 0 {
        anyhow::bail!("streaming.direct_bytes_per_second must be greater than 0");
    }

    if !config.library.root.exists() {
        tracing::warn!("Library root does not exist: {:?}", config.library.root);
    }

    Ok(())
}
