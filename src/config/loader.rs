use std::path::{Path, PathBuf};

use crate::error::AuthError;

use super::env::expand_auth_config;
use super::types::AuthConfig;

const APP_DIR: &str = "tokenkeeper";

/// Per-user configuration directory, e.g. `~/.config/tokenkeeper` on Linux.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Where the credential record lives unless overridden.
pub fn default_credentials_path() -> PathBuf {
    config_dir().join("credentials.json")
}

/// Discover config files in precedence order (highest first).
///
/// Precedence:
/// 1. `--config` CLI flag
/// 2. `TOKENKEEPER_CONFIG` env var
/// 3. `./config/tokenkeeper.json` (project-level)
/// 4. `<config_dir>/tokenkeeper/config.json` (user-level)
pub fn discover_config_files(cli_config: Option<&str>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = cli_config {
        candidates.push(PathBuf::from(path));
    }
    if let Ok(env_path) = std::env::var("TOKENKEEPER_CONFIG") {
        candidates.push(PathBuf::from(env_path));
    }
    candidates.push(PathBuf::from("./config/tokenkeeper.json"));
    candidates.push(config_dir().join("config.json"));

    let mut files: Vec<PathBuf> = Vec::new();
    for p in candidates {
        if p.exists() && !files.contains(&p) {
            files.push(p);
        }
    }
    files
}

fn load_config_file(path: &Path) -> Result<AuthConfig, AuthError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AuthError::Configuration(format!("Cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str::<AuthConfig>(&content).map_err(|e| {
        AuthError::Configuration(format!("Invalid JSON in {}: {e}", path.display()))
    })
}

/// Apply `TOKENKEEPER_*` overrides on top of file values.
fn apply_env_overrides(config: &mut AuthConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(id) = lookup("TOKENKEEPER_CLIENT_ID").filter(|v| !v.is_empty()) {
        config.client_id = id;
    }
    if let Some(secret) = lookup("TOKENKEEPER_CLIENT_SECRET").filter(|v| !v.is_empty()) {
        config.client_secret = Some(secret);
    }
    if let Some(path) = lookup("TOKENKEEPER_CREDENTIALS").filter(|v| !v.is_empty()) {
        config.credentials_path = Some(PathBuf::from(path));
    }
}

/// Load the highest-precedence config file, then layer env overrides and
/// `${VAR}` expansion on top.
///
/// An explicit `--config` path that does not exist is an error; the implicit
/// locations are optional.
pub fn load_config(cli_config: Option<&str>) -> Result<AuthConfig, AuthError> {
    if let Some(path) = cli_config {
        if !Path::new(path).exists() {
            return Err(AuthError::Configuration(format!(
                "Config file {path} does not exist"
            )));
        }
    }

    let mut config = match discover_config_files(cli_config).first() {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            load_config_file(path)?
        }
        None => {
            tracing::debug!("no config file found, using defaults and environment");
            AuthConfig::default()
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    expand_auth_config(&mut config)?;
    Ok(config)
}
