mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    expand_paths(&mut config);

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./clipshrink.toml",
        "~/.config/clipshrink/config.toml",
        "/etc/clipshrink/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn expand_paths(config: &mut Config) {
    if let Some(dir) = config.output.directory.take() {
        let expanded = shellexpand::tilde(&dir.to_string_lossy()).into_owned();
        config.output.directory = Some(PathBuf::from(expanded));
    }
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.transcode.readiness_timeout_ms == 0 {
        anyhow::bail!("transcode.readiness_timeout_ms cannot be 0");
    }

    if config.transcode.encoder_preset.trim().is_empty() {
        anyhow::bail!("transcode.encoder_preset cannot be empty");
    }

    // An empty suffix next to the input would name the output after the input
    if config.transcode.output_suffix.is_empty() && config.output.directory.is_none() {
        anyhow::bail!("transcode.output_suffix cannot be empty unless output.directory is set");
    }

    if config.transcode.output_suffix.contains(std::path::is_separator) {
        anyhow::bail!(
            "transcode.output_suffix '{}' cannot contain a path separator",
            config.transcode.output_suffix
        );
    }

    if let Some(ref dir) = config.output.directory {
        let expanded = shellexpand::tilde(&dir.to_string_lossy()).into_owned();
        if !Path::new(&expanded).is_dir() {
            tracing::warn!("Output directory does not exist: {:?}", dir);
        }
    }

    Ok(())
}
