use std::{path::PathBuf, sync::Arc};

use crate::config::{Config, KeySource};
use color_eyre::Result;
use credvault_secrets::KvCredentialRepository;
use credvault_storage::{
    envelope::EnvelopeCodec,
    file_store::FileKvStore,
    key_provider::{EnvKeyProvider, KeyProvider, KeyRing, KeyringProvider, DEFAULT_KEY_ID},
};
use dirs::data_dir;
use tracing::debug;

pub type Repository = KvCredentialRepository<FileKvStore>;

/// Resolve the default data directory for credvault.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("credvault"))
}

/// Build the configured key provider.
pub fn key_provider(config: &Config) -> Box<dyn KeyProvider> {
    match config.key.source {
        KeySource::Env => Box::new(EnvKeyProvider::new(config.key.env_var_names())),
        KeySource::Keyring => Box::new(KeyringProvider::new(
            config
                .key
                .keyring_service
                .clone()
                .unwrap_or_else(|| "credvault".to_string()),
            config
                .key
                .keyring_account
                .clone()
                .unwrap_or_else(|| "master-key".to_string()),
            config
                .key
                .key_id
                .clone()
                .unwrap_or_else(|| DEFAULT_KEY_ID.to_string()),
        )),
    }
}

/// Load master key material once. A missing or implausible key is fatal.
pub async fn load_keys(provider: &dyn KeyProvider) -> Result<Arc<KeyRing>> {
    let ring = provider
        .load()
        .await
        .map_err(|e| color_eyre::eyre::eyre!("refusing to start: {e}"))?;
    Ok(Arc::new(ring))
}

/// Build the file store using config overrides.
pub fn store_from_config(config: &Config) -> Result<FileKvStore> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, "initializing record store");
    Ok(FileKvStore::new(root))
}

/// Build the credential repository: keys first, so nothing touches storage without them.
pub async fn repository_from_config(config: &Config) -> Result<Repository> {
    let keys = load_keys(key_provider(config).as_ref()).await?;
    let store = store_from_config(config)?;
    Ok(KvCredentialRepository::new(store, EnvelopeCodec::new(keys)))
}
