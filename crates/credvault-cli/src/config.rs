use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use credvault_storage::key_provider::EnvVarNames;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// Operator configuration loaded from `~/.config/credvault/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the record directory.
    pub data_dir: Option<PathBuf>,
    /// Where the master key comes from.
    #[serde(default)]
    pub key: KeyConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    #[default]
    Env,
    Keyring,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KeyConfig {
    #[serde(default)]
    pub source: KeySource,
    /// Env var names, defaulting to `CREDVAULT_MASTER_KEY` and friends.
    pub secret_var: Option<String>,
    pub key_id_var: Option<String>,
    pub previous_secret_var: Option<String>,
    pub previous_key_id_var: Option<String>,
    /// Keyring source only.
    pub keyring_service: Option<String>,
    pub keyring_account: Option<String>,
    pub key_id: Option<String>,
}

impl KeyConfig {
    pub fn env_var_names(&self) -> EnvVarNames {
        let defaults = EnvVarNames::default();
        EnvVarNames {
            secret: self.secret_var.clone().unwrap_or(defaults.secret),
            key_id: self.key_id_var.clone().unwrap_or(defaults.key_id),
            previous_secret: self
                .previous_secret_var
                .clone()
                .unwrap_or(defaults.previous_secret),
            previous_key_id: self
                .previous_key_id_var
                .clone()
                .unwrap_or(defaults.previous_key_id),
        }
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("credvault").join("config.toml"))
}

/// Write the given config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
