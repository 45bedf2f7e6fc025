use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shortest operator secret accepted as master key material.
pub const MIN_SECRET_LEN: usize = 16;

/// Key id used when the operator does not name the key.
pub const DEFAULT_KEY_ID: &str = "v1";

pub const MASTER_KEY_VAR: &str = "CREDVAULT_MASTER_KEY";
pub const MASTER_KEY_ID_VAR: &str = "CREDVAULT_MASTER_KEY_ID";
pub const PREVIOUS_KEY_VAR: &str = "CREDVAULT_PREVIOUS_MASTER_KEY";
pub const PREVIOUS_KEY_ID_VAR: &str = "CREDVAULT_PREVIOUS_MASTER_KEY_ID";

/// Symmetric key derived from an operator secret.
/// No `PartialEq`: key bytes are never compared outside tests.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// Identifier written into every envelope (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: [u8; 32],
}

impl KeyMaterial {
    /// Derive a key from a secret of any length via SHA-256.
    pub fn derive(id: impl Into<String>, secret: &str) -> Result<Self, KeyError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(KeyError::InvalidId);
        }
        let actual = secret.chars().count();
        if actual < MIN_SECRET_LEN {
            return Err(KeyError::TooShort {
                min: MIN_SECRET_LEN,
                actual,
            });
        }

        let digest = Sha256::digest(secret.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Ok(Self { id, bytes })
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("master key is not configured ({source_name})")]
    Missing { source_name: String },
    #[error("master key is too short: expected at least {min} characters, got {actual}")]
    TooShort { min: usize, actual: usize },
    #[error("key id must not be empty")]
    InvalidId,
    #[error("key id {id:?} is already held")]
    DuplicateId { id: String },
    #[error("keyring error: {0}")]
    Keyring(String),
}

/// The keys this process holds: one active key for encryption plus any previous keys
/// still accepted for decryption.
#[derive(Clone)]
pub struct KeyRing {
    active: String,
    keys: HashMap<String, KeyMaterial>,
}

impl KeyRing {
    pub fn new(active: KeyMaterial) -> Self {
        let id = active.id.clone();
        let mut keys = HashMap::new();
        keys.insert(id.clone(), active);
        Self { active: id, keys }
    }

    /// Keep accepting envelopes written under an older key.
    pub fn with_previous(mut self, key: KeyMaterial) -> Result<Self, KeyError> {
        if self.keys.contains_key(&key.id) {
            return Err(KeyError::DuplicateId { id: key.id.clone() });
        }
        self.keys.insert(key.id.clone(), key);
        Ok(self)
    }

    pub fn active(&self) -> &KeyMaterial {
        // `active` is inserted by `new` and keys are never removed.
        &self.keys[&self.active]
    }

    pub fn get(&self, id: &str) -> Option<&KeyMaterial> {
        self.keys.get(id)
    }

    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("active", &self.active)
            .field("keys", &self.key_ids())
            .finish()
    }
}

/// Loads master key material once at startup.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn load(&self) -> Result<KeyRing, KeyError>;
}

/// Names of the environment variables holding key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVarNames {
    pub secret: String,
    pub key_id: String,
    pub previous_secret: String,
    pub previous_key_id: String,
}

impl Default for EnvVarNames {
    fn default() -> Self {
        Self {
            secret: MASTER_KEY_VAR.to_string(),
            key_id: MASTER_KEY_ID_VAR.to_string(),
            previous_secret: PREVIOUS_KEY_VAR.to_string(),
            previous_key_id: PREVIOUS_KEY_ID_VAR.to_string(),
        }
    }
}

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment-backed provider. The active secret is required; a previous secret/id pair
/// may be supplied while old envelopes are still around.
#[derive(Clone)]
pub struct EnvKeyProvider {
    names: EnvVarNames,
    lookup: Lookup,
}

impl EnvKeyProvider {
    pub fn new(names: EnvVarNames) -> Self {
        Self::with_lookup(names, |name| std::env::var(name).ok())
    }

    /// Resolve variables through `lookup` instead of the process environment.
    pub fn with_lookup(
        names: EnvVarNames,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            names,
            lookup: Arc::new(lookup),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }
}

#[async_trait]
impl KeyProvider for EnvKeyProvider {
    async fn load(&self) -> Result<KeyRing, KeyError> {
        let secret = self.var(&self.names.secret).ok_or_else(|| KeyError::Missing {
            source_name: self.names.secret.clone(),
        })?;
        let id = self
            .var(&self.names.key_id)
            .unwrap_or_else(|| DEFAULT_KEY_ID.to_string());
        let mut ring = KeyRing::new(KeyMaterial::derive(id, &secret)?);

        if let Some(previous) = self.var(&self.names.previous_secret) {
            let previous_id =
                self.var(&self.names.previous_key_id)
                    .ok_or_else(|| KeyError::Missing {
                        source_name: self.names.previous_key_id.clone(),
                    })?;
            ring = ring.with_previous(KeyMaterial::derive(previous_id, &previous)?)?;
        }

        debug!(
            active = %ring.active().id,
            keys = ?ring.key_ids(),
            "loaded master key from environment"
        );
        Ok(ring)
    }
}

/// OS keyring-backed provider. Uses the `keyring` crate to store the master secret,
/// generating one on first use.
pub struct KeyringProvider {
    service: String,
    account: String,
    key_id: String,
}

impl KeyringProvider {
    pub fn new(
        service: impl Into<String>,
        account: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
            key_id: key_id.into(),
        }
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn load(&self) -> Result<KeyRing, KeyError> {
        // Keyring operations are synchronous; wrap in async for trait compatibility.
        let entry = keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Keyring(e.to_string()))?;

        let secret = match entry.get_password() {
            Ok(secret) => secret,
            Err(keyring::Error::NoEntry) => {
                let secret = generate_secret();
                entry
                    .set_password(&secret)
                    .map_err(|e| KeyError::Keyring(e.to_string()))?;
                debug!(service = %self.service, "generated new master secret in keyring");
                secret
            }
            Err(err) => return Err(KeyError::Keyring(err.to_string())),
        };

        Ok(KeyRing::new(KeyMaterial::derive(self.key_id.clone(), &secret)?))
    }
}

/// Provider wrapping a prebuilt ring, for tests and embedding.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    ring: KeyRing,
}

impl StaticKeyProvider {
    pub fn new(ring: KeyRing) -> Self {
        Self { ring }
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn load(&self) -> Result<KeyRing, KeyError> {
        Ok(self.ring.clone())
    }
}

/// Fresh random master secret (32 bytes, base64).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let secret = general_purpose::STANDARD.encode(bytes);
    bytes.zeroize();
    secret
}
