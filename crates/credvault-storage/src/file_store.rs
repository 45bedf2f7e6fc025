use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use credvault_core::{
    clock::{Clock, SystemClock},
    storage::{KvStore, KvStoreError},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// File-backed `KvStore`: one JSON document per key under `root`, with optional expiry.
/// Values are stored as given; sensitive fields arrive already sealed in envelopes.
/// File names are a fixed-length digest of the key, so keys of any length fit.
pub struct FileKvStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileKvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, Arc::new(SystemClock))
    }

    pub fn with_clock(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(sanitize_key(key))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

#[async_trait]
impl KvStore for FileKvStore {
    #[instrument(skip_all, fields(key))]
    async fn get(&self, key: &str) -> Result<Option<Value>, KvStoreError> {
        let path = self.path_for(key);
        let Some(entry) = read_entry(&path)? else {
            return Ok(None);
        };

        if entry
            .expires_at
            .is_some_and(|at| self.clock.now_millis() >= at)
        {
            debug!("evicting expired entry");
            remove_entry(&path)?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    #[instrument(skip_all, fields(key))]
    async fn set(&self, key: &str, value: Value) -> Result<(), KvStoreError> {
        let entry = StoredEntry {
            value,
            expires_at: None,
        };
        write_entry(&self.path_for(key), &entry)
    }

    #[instrument(skip_all, fields(key, ttl_seconds))]
    async fn set_with_ttl(
        &self,
        key: &str,
        value: Value,
        ttl_seconds: u64,
    ) -> Result<(), KvStoreError> {
        if ttl_seconds == 0 {
            return Err(KvStoreError::InvalidTtl);
        }
        let ttl_ms = i64::try_from(ttl_seconds.saturating_mul(1_000)).unwrap_or(i64::MAX);
        let entry = StoredEntry {
            value,
            expires_at: Some(self.clock.now_millis().saturating_add(ttl_ms)),
        };
        write_entry(&self.path_for(key), &entry)
    }

    #[instrument(skip_all, fields(key))]
    async fn delete(&self, key: &str) -> Result<(), KvStoreError> {
        remove_entry(&self.path_for(key))
    }
}

fn write_entry(path: &Path, entry: &StoredEntry) -> Result<(), KvStoreError> {
    let parent = path.parent().ok_or_else(|| KvStoreError::Storage {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec(entry).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_entry(path: &Path) -> Result<Option<StoredEntry>, KvStoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    serde_json::from_slice(&buf).map(Some).map_err(storage_err)
}

fn remove_entry(path: &Path) -> Result<(), KvStoreError> {
    match fs::remove_file(path) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(storage_err(err)),
    }
}

fn sanitize_key(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key.as_bytes()))
}

fn storage_err<E: ToString>(err: E) -> KvStoreError {
    KvStoreError::Storage {
        reason: err.to_string(),
    }
}
