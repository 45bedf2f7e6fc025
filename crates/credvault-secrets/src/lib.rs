//! Credential repository backed by any `KvStore`.
//!
//! Secrets (the app secret, tenant access tokens) are sealed with the envelope codec
//! before they reach storage; everything else is stored as plain JSON. Reads that hit
//! an undecryptable or malformed record are logged and reported as absent.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credvault_core::{
    clock::{Clock, SystemClock},
    credentials::{
        AppCredentials, CredentialError, CredentialRepository, TenantSelection, TenantToken,
    },
    storage::KvStore,
};
use credvault_storage::envelope::{EncryptedEnvelope, EnvelopeCodec, EnvelopeError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument, warn};

const APP_CONFIG_ID: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    AppConfig,
    TenantToken,
    TenantSelection,
}

impl RecordKind {
    fn as_str(self) -> &'static str {
        match self {
            RecordKind::AppConfig => "app_config",
            RecordKind::TenantToken => "tenant_token",
            RecordKind::TenantSelection => "tenant_selection",
        }
    }

    fn storage_key(self, id: &str) -> String {
        format!("{}:{id}", self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppConfigRecord {
    app_id: String,
    secret_enc: EncryptedEnvelope,
    updated_at: DateTime<Utc>,
}

/// Encrypted subset of the app config.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppSecret {
    app_secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantTokenRecord {
    token_enc: EncryptedEnvelope,
    /// Unix epoch milliseconds.
    expires_at: i64,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantSelectionRecord {
    #[serde(flatten)]
    selection: TenantSelection,
    updated_at: DateTime<Utc>,
}

/// Why a stored record could not be turned into a plaintext view.
enum ReadFailure {
    Envelope(EnvelopeError),
    Record(serde_json::Error),
}

impl ReadFailure {
    fn reason(&self) -> &'static str {
        match self {
            ReadFailure::Envelope(err) => err.reason(),
            ReadFailure::Record(_) => "record_malformed",
        }
    }
}

impl fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadFailure::Envelope(err) => write!(f, "{err}"),
            ReadFailure::Record(err) => write!(f, "record does not match its kind: {err}"),
        }
    }
}

fn report(kind: RecordKind, id: &str, failure: &ReadFailure) {
    warn!(
        record_kind = %kind.as_str(),
        record_id = %id,
        reason = %failure.reason(),
        error = %failure,
        "unreadable credential record; treating as absent"
    );
}

/// Seconds until `expires_at_ms`, never less than one so the backend always accepts the TTL.
fn ttl_seconds(expires_at_ms: i64, now_ms: i64) -> u64 {
    let remaining = expires_at_ms.saturating_sub(now_ms).div_euclid(1_000);
    u64::try_from(remaining.max(1)).unwrap_or(1)
}

fn check_tenant_id(tenant_id: &str) -> Result<(), CredentialError> {
    if tenant_id.trim().is_empty() {
        return Err(CredentialError::InvalidId {
            id: tenant_id.to_string(),
        });
    }
    Ok(())
}

fn encode<T: Serialize>(record: &T) -> Result<serde_json::Value, CredentialError> {
    serde_json::to_value(record).map_err(|e| CredentialError::Encoding {
        reason: e.to_string(),
    })
}

/// `CredentialRepository` over a key-value store, sealing secrets with an `EnvelopeCodec`.
pub struct KvCredentialRepository<S: KvStore> {
    store: Arc<S>,
    codec: EnvelopeCodec,
    clock: Arc<dyn Clock>,
}

impl<S: KvStore> KvCredentialRepository<S> {
    pub fn new(store: S, codec: EnvelopeCodec) -> Self {
        Self::with_clock(Arc::new(store), codec, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, codec: EnvelopeCodec, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            codec,
            clock,
        }
    }

    fn seal<T: Serialize>(&self, value: &T) -> Result<EncryptedEnvelope, CredentialError> {
        self.codec
            .encrypt(value)
            .map_err(|e| CredentialError::Encryption {
                reason: e.to_string(),
            })
    }

    fn open<T: DeserializeOwned>(
        &self,
        kind: RecordKind,
        id: &str,
        envelope: &EncryptedEnvelope,
    ) -> Option<T> {
        match self.codec.decrypt(envelope) {
            Ok(value) => Some(value),
            Err(err) => {
                report(kind, id, &ReadFailure::Envelope(err));
                None
            }
        }
    }

    async fn load<T: DeserializeOwned>(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<Option<T>, CredentialError> {
        let Some(raw) = self.store.get(&kind.storage_key(id)).await? else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                report(kind, id, &ReadFailure::Record(err));
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<S: KvStore> CredentialRepository for KvCredentialRepository<S> {
    #[instrument(skip_all, fields(app_id = %app_id))]
    async fn put_app_config(&self, app_id: &str, app_secret: &str) -> Result<(), CredentialError> {
        let record = AppConfigRecord {
            app_id: app_id.to_string(),
            secret_enc: self.seal(&AppSecret {
                app_secret: app_secret.to_string(),
            })?,
            updated_at: self.clock.now(),
        };
        let key = RecordKind::AppConfig.storage_key(APP_CONFIG_ID);
        self.store.set(&key, encode(&record)?).await?;
        debug!(key_id = %record.secret_enc.key_id, "stored app config");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn get_app_config(&self) -> Result<Option<AppCredentials>, CredentialError> {
        let kind = RecordKind::AppConfig;
        let Some(record) = self.load::<AppConfigRecord>(kind, APP_CONFIG_ID).await? else {
            return Ok(None);
        };
        let secret: Option<AppSecret> = self.open(kind, APP_CONFIG_ID, &record.secret_enc);
        Ok(secret.map(|secret| AppCredentials {
            app_id: record.app_id,
            app_secret: secret.app_secret,
        }))
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, expires_at_ms = expires_at_ms))]
    async fn put_tenant_token(
        &self,
        tenant_id: &str,
        token: &TenantToken,
        expires_at_ms: i64,
    ) -> Result<(), CredentialError> {
        check_tenant_id(tenant_id)?;
        let now = self.clock.now();
        let record = TenantTokenRecord {
            token_enc: self.seal(token)?,
            expires_at: expires_at_ms,
            updated_at: now,
        };
        let ttl = ttl_seconds(expires_at_ms, now.timestamp_millis());
        let key = RecordKind::TenantToken.storage_key(tenant_id);
        self.store
            .set_with_ttl(&key, encode(&record)?, ttl)
            .await?;
        debug!(ttl_seconds = ttl, "stored tenant token");
        Ok(())
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    async fn get_tenant_token(
        &self,
        tenant_id: &str,
    ) -> Result<Option<TenantToken>, CredentialError> {
        check_tenant_id(tenant_id)?;
        let kind = RecordKind::TenantToken;
        let Some(record) = self.load::<TenantTokenRecord>(kind, tenant_id).await? else {
            return Ok(None);
        };
        // The backend TTL may lag or the clocks may disagree; never hand out an expired token.
        if self.clock.now_millis() > record.expires_at {
            debug!(expires_at = record.expires_at, "tenant token expired");
            return Ok(None);
        }
        Ok(self.open(kind, tenant_id, &record.token_enc))
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    async fn delete_tenant_token(&self, tenant_id: &str) -> Result<(), CredentialError> {
        check_tenant_id(tenant_id)?;
        let key = RecordKind::TenantToken.storage_key(tenant_id);
        self.store.delete(&key).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    async fn put_tenant_selection(
        &self,
        tenant_id: &str,
        selection: &TenantSelection,
    ) -> Result<(), CredentialError> {
        check_tenant_id(tenant_id)?;
        let record = TenantSelectionRecord {
            selection: selection.clone(),
            updated_at: self.clock.now(),
        };
        let key = RecordKind::TenantSelection.storage_key(tenant_id);
        self.store.set(&key, encode(&record)?).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    async fn get_tenant_selection(
        &self,
        tenant_id: &str,
    ) -> Result<Option<TenantSelection>, CredentialError> {
        check_tenant_id(tenant_id)?;
        let record = self
            .load::<TenantSelectionRecord>(RecordKind::TenantSelection, tenant_id)
            .await?;
        Ok(record.map(|record| record.selection))
    }
}
