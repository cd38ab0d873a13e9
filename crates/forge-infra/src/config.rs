//! Configuration loader for Adventure Forge.
//!
//! Reads `config.toml` (by default from the data directory, `~/.forge/`)
//! and deserializes it into [`ForgeConfig`]. Falls back to defaults when the
//! file is missing or malformed, then applies environment overrides.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

use forge_types::config::ForgeConfig;

use crate::sqlite::pool::{data_dir, default_database_url};

/// Default location of `config.toml`.
pub fn default_config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Load configuration from `path`, then apply environment overrides.
///
/// - If the file does not exist, starts from [`ForgeConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and starts from the default.
pub async fn load_config(path: &Path) -> ForgeConfig {
    let mut config = read_config_file(path).await;
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

async fn read_config_file(path: &Path) -> ForgeConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", path.display());
            return ForgeConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return ForgeConfig::default();
        }
    };

    match toml::from_str::<ForgeConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            ForgeConfig::default()
        }
    }
}

/// Apply `FORGE_*` overrides read through `lookup`.
///
/// Recognised keys: `FORGE_DATABASE_URL`, `FORGE_HOST`, `FORGE_PORT`,
/// `FORGE_MODEL`. Unparseable values are ignored with a warning.
pub fn apply_overrides<F>(config: &mut ForgeConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("FORGE_DATABASE_URL").filter(|v| !v.is_empty()) {
        config.database.url = Some(url);
    }
    if let Some(host) = lookup("FORGE_HOST").filter(|v| !v.is_empty()) {
        config.server.host = host;
    }
    if let Some(port) = lookup("FORGE_PORT") {
        match port.parse() {
            Ok(port) => config.server.port = port,
            Err(err) => tracing::warn!(value = %port, "Ignoring invalid FORGE_PORT: {err}"),
        }
    }
    if let Some(model) = lookup("FORGE_MODEL").filter(|v| !v.is_empty()) {
        config.generation.model = model;
    }
}

/// Database URL from config, or the data directory default.
pub fn database_url(config: &ForgeConfig) -> String {
    config
        .database
        .url
        .clone()
        .unwrap_or_else(default_database_url)
}

/// Read a secret from the environment variable `env_name`.
///
/// Empty values count as unset.
pub fn resolve_secret(env_name: &str) -> Option<SecretString> {
    std::env::var(env_name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}
