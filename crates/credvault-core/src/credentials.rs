use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::KvStoreError;

/// Global app credentials for the ads platform. The app id is a public client identifier;
/// the secret is only ever persisted encrypted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCredentials {
    pub app_id: String,
    pub app_secret: String,
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

/// Per-tenant OAuth access token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl TenantToken {
    pub fn new(access_token: impl Into<String>, token_type: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type,
        }
    }
}

impl fmt::Debug for TenantToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Which business and ad account a tenant reports on. Nothing here is secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSelection {
    pub business_id: Option<String>,
    pub ad_account_id: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Errors surfaced by credential repositories.
///
/// Decryption failures are deliberately absent: an undecryptable record reads as `None`.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The storage backend failed; propagated unchanged.
    #[error(transparent)]
    Storage(#[from] KvStoreError),
    /// Encrypting a secret for writing failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },
    /// A record could not be encoded for storage.
    #[error("record encoding failed: {reason}")]
    Encoding { reason: String },
    /// Tenant ids must be non-empty.
    #[error("invalid tenant id: {id:?}")]
    InvalidId { id: String },
}

/// Persistence contract for the app secret and per-tenant credentials.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Store the global app id and encrypted app secret, replacing any prior value.
    async fn put_app_config(&self, app_id: &str, app_secret: &str) -> Result<(), CredentialError>;

    /// Read the global app credentials. Absent or undecryptable records are `None`.
    async fn get_app_config(&self) -> Result<Option<AppCredentials>, CredentialError>;

    /// Store a tenant token that expires at `expires_at_ms` (Unix epoch milliseconds).
    async fn put_tenant_token(
        &self,
        tenant_id: &str,
        token: &TenantToken,
        expires_at_ms: i64,
    ) -> Result<(), CredentialError>;

    /// Read a tenant token. Expired, evicted or undecryptable records are `None`.
    async fn get_tenant_token(&self, tenant_id: &str)
        -> Result<Option<TenantToken>, CredentialError>;

    /// Forget a tenant token (idempotent).
    async fn delete_tenant_token(&self, tenant_id: &str) -> Result<(), CredentialError>;

    async fn put_tenant_selection(
        &self,
        tenant_id: &str,
        selection: &TenantSelection,
    ) -> Result<(), CredentialError>;

    async fn get_tenant_selection(
        &self,
        tenant_id: &str,
    ) -> Result<Option<TenantSelection>, CredentialError>;
}
