use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use super::types::Settings;

/// Default settings file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "pgkeep.yaml";

/// Load settings from a YAML file.
///
/// The default file may be absent, in which case defaults are used. An
/// explicitly named file must exist.
pub fn load_settings(path: &str) -> Result<Settings> {
    let p = Path::new(path);

    if p.is_file() {
        let content = fs::read_to_string(p)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let settings = parse_settings(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path))?;
        tracing::debug!(path = %path, "Loaded settings");
        return Ok(settings);
    }

    if path == DEFAULT_CONFIG_FILE && !p.exists() {
        tracing::debug!("No {} found, using default settings", DEFAULT_CONFIG_FILE);
        return Ok(Settings::default());
    }

    bail!("Config not found: '{}'", path)
}

/// Parse YAML content into settings. Empty content yields defaults.
pub fn parse_settings(content: &str) -> Result<Settings> {
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    let settings: Settings =
        serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;
    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<()> {
    if settings.state_path.trim().is_empty() {
        bail!("state_path must not be empty");
    }
    if !settings.database_configuration_dir.is_absolute() {
        bail!(
            "database_configuration_dir must be an absolute path, got '{}'",
            settings.database_configuration_dir.display()
        );
    }
    if settings.metrics.default_window_mins <= 0 {
        bail!("metrics.default_window_mins must be positive");
    }
    Ok(())
}
