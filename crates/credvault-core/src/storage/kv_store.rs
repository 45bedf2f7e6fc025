use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};

/// Errors produced by key-value storage backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KvStoreError {
    /// Underlying storage failure (backend unreachable, I/O, rejected write).
    #[error("storage failure: {reason}")]
    Storage { reason: String },
    /// A TTL of zero seconds was requested.
    #[error("ttl must be at least one second")]
    InvalidTtl,
}

/// Key-value contract for JSON documents, with optional native expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Retrieve the value for a key. Missing and expired entries are `None`.
    async fn get(&self, key: &str) -> Result<Option<Value>, KvStoreError>;

    /// Persist a value under a key, overwriting any existing entry and clearing its expiry.
    async fn set(&self, key: &str, value: Value) -> Result<(), KvStoreError>;

    /// Persist a value that the backend evicts after `ttl_seconds`.
    async fn set_with_ttl(
        &self,
        key: &str,
        value: Value,
        ttl_seconds: u64,
    ) -> Result<(), KvStoreError>;

    /// Remove a key and its value (idempotent).
    async fn delete(&self, key: &str) -> Result<(), KvStoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at_ms: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

/// In-memory store for tests and ephemeral runs. Expired entries are purged on read and
/// swept on every write, so keys that are never read again do not accumulate.
#[derive(Debug, Clone)]
pub struct InMemoryKvStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, KvStoreError> {
        self.inner.lock().map_err(|err| KvStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }

    fn insert(&self, key: &str, entry: Entry) -> Result<(), KvStoreError> {
        let now_ms = self.clock.now_millis();
        let mut map = self.lock()?;
        map.retain(|_, existing| !existing.is_expired(now_ms));
        map.insert(key.to_string(), entry);
        Ok(())
    }

    #[cfg(test)]
    fn resident_keys(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or_default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, KvStoreError> {
        let now_ms = self.clock.now_millis();
        let mut map = self.lock()?;

        match map.get(key) {
            Some(entry) if entry.is_expired(now_ms) => {
                map.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), KvStoreError> {
        self.insert(
            key,
            Entry {
                value,
                expires_at_ms: None,
            },
        )
    }

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
        let expires_at_ms = self.clock.now_millis().saturating_add(ttl_ms);
        self.insert(
            key,
            Entry {
                value,
                expires_at_ms: Some(expires_at_ms),
            },
        )
    }

    async fn delete(&self, key: &str) -> Result<(), KvStoreError> {
        let mut map = self.lock()?;
        map.remove(key);
        Ok(())
    }
}
