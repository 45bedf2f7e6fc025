//! Self-describing encrypted envelopes for JSON values.
//!
//! Payload layout (base64 STANDARD on the wire):
//! `[12 bytes: IV][16 bytes: GCM tag][N bytes: ciphertext]`
//!
//! The IV is fresh for every call, so identical plaintexts never share a payload.
//! The envelope's `keyId` names the master key that sealed it and is checked
//! before any payload work.

use std::sync::Arc;

use aes_gcm::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce, Tag,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::key_provider::{KeyMaterial, KeyRing};

/// Byte length of the AES-GCM initialization vector.
pub const IV_LEN: usize = 12;

/// Byte length of the AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Anything shorter cannot hold an IV and a tag.
pub const MIN_PAYLOAD_LEN: usize = IV_LEN + TAG_LEN;

/// Encrypted unit as persisted inside records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    /// Id of the key that produced this envelope. Immutable once written.
    pub key_id: String,
    /// base64(IV || tag || ciphertext).
    pub payload: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope references unknown key id {key_id:?}")]
    UnknownKeyId { key_id: String },
    #[error("malformed envelope: {reason}")]
    Malformed { reason: String },
    /// Tag mismatch: tampering, corruption, or a different key under the same id.
    #[error("envelope failed authentication")]
    Authentication,
    #[error("decrypted payload is not valid JSON: {reason}")]
    Deserialization { reason: String },
    #[error("plaintext could not be serialized: {reason}")]
    Serialization { reason: String },
    #[error("encryption failed")]
    Encryption,
}

impl EnvelopeError {
    /// Stable label for structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            EnvelopeError::UnknownKeyId { .. } => "unknown_key_id",
            EnvelopeError::Malformed { .. } => "envelope_malformed",
            EnvelopeError::Authentication => "authentication_failure",
            EnvelopeError::Deserialization { .. } => "deserialization_failure",
            EnvelopeError::Serialization { .. } => "serialization_failure",
            EnvelopeError::Encryption => "encryption_failure",
        }
    }
}

/// Encrypts with the ring's active key; decrypts with whichever held key the envelope names.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    keys: Arc<KeyRing>,
}

impl EnvelopeCodec {
    pub fn new(keys: Arc<KeyRing>) -> Self {
        Self { keys }
    }

    pub fn active_key_id(&self) -> &str {
        &self.keys.active().id
    }

    /// Serialize `value` to JSON and seal it under the active key.
    pub fn encrypt<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<EncryptedEnvelope, EnvelopeError> {
        let mut plaintext = serde_json::to_vec(value).map_err(|e| EnvelopeError::Serialization {
            reason: e.to_string(),
        })?;
        let sealed = self.seal(&plaintext);
        plaintext.zeroize();
        sealed
    }

    /// Open an envelope and parse the plaintext as `T`.
    pub fn decrypt<T: DeserializeOwned>(
        &self,
        envelope: &EncryptedEnvelope,
    ) -> Result<T, EnvelopeError> {
        let mut plaintext = self.open(envelope)?;
        let parsed =
            serde_json::from_slice(&plaintext).map_err(|e| EnvelopeError::Deserialization {
                reason: e.to_string(),
            });
        plaintext.zeroize();
        parsed
    }

    fn seal(&self, plaintext: &[u8]) -> Result<EncryptedEnvelope, EnvelopeError> {
        let key = self.keys.active();
        let cipher = build_cipher(key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(&nonce, b"", &mut buffer)
            .map_err(|_| EnvelopeError::Encryption)?;

        let mut payload = Vec::with_capacity(MIN_PAYLOAD_LEN + buffer.len());
        payload.extend_from_slice(nonce.as_slice());
        payload.extend_from_slice(tag.as_slice());
        payload.extend_from_slice(&buffer);

        Ok(EncryptedEnvelope {
            key_id: key.id.clone(),
            payload: STANDARD.encode(payload),
        })
    }

    fn open(&self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, EnvelopeError> {
        let key = self
            .keys
            .get(&envelope.key_id)
            .ok_or_else(|| EnvelopeError::UnknownKeyId {
                key_id: envelope.key_id.clone(),
            })?;

        let payload = STANDARD
            .decode(&envelope.payload)
            .map_err(|e| EnvelopeError::Malformed {
                reason: format!("payload is not base64: {e}"),
            })?;
        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(EnvelopeError::Malformed {
                reason: format!(
                    "payload is {} bytes, need at least {MIN_PAYLOAD_LEN}",
                    payload.len()
                ),
            });
        }

        let (iv, rest) = payload.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let cipher = build_cipher(key);
        let mut buffer = ciphertext.to_vec();
        let (nonce, tag) = (Nonce::from_slice(iv), Tag::from_slice(tag));
        cipher
            .decrypt_in_place_detached(nonce, b"", &mut buffer, tag)
            .map_err(|_| EnvelopeError::Authentication)?;
        Ok(buffer)
    }
}

fn build_cipher(material: &KeyMaterial) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&material.bytes))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::key_provider::KeyMaterial;

    fn ring(id: &str, secret: &str) -> KeyRing {
        KeyRing::new(KeyMaterial::derive(id, secret).expect("derive"))
    }

    fn codec(id: &str, secret: &str) -> EnvelopeCodec {
        EnvelopeCodec::new(Arc::new(ring(id, secret)))
    }

    fn decoded_len(envelope: &EncryptedEnvelope) -> usize {
        STANDARD.decode(&envelope.payload).expect("base64").len()
    }

    #[test]
    fn round_trips_json_values() {
        let codec = codec("v1", "round-trip-master-secret");
        let values = [
            json!("plain string"),
            json!(42),
            json!(null),
            json!([1, "two", {"three": 3.5}]),
            json!({"appSecret": "topsecret"}),
            json!({"accessToken": "EAAB…", "tokenType": "bearer", "nested": {"ü": "✓"}}),
        ];

        for value in values {
            let envelope = codec.encrypt(&value).expect("encrypt");
            let decrypted: Value = codec.decrypt(&envelope).expect("decrypt");
            assert_eq!(decrypted, value);
        }
    }

    #[test]
    fn payload_layout_is_iv_tag_ciphertext() {
        let codec = codec("v1", "layout-master-secret");
        let plaintext = json!({"appSecret": "s"});
        let json_len = serde_json::to_vec(&plaintext).expect("json").len();

        let envelope = codec.encrypt(&plaintext).expect("encrypt");
        assert_eq!(envelope.key_id, "v1");
        assert_eq!(decoded_len(&envelope), IV_LEN + TAG_LEN + json_len);
    }

    #[test]
    fn fresh_iv_for_identical_plaintext() {
        let codec = codec("v1", "iv-freshness-master-secret");
        let first = codec.encrypt(&json!({"k": "v"})).expect("encrypt");
        let second = codec.encrypt(&json!({"k": "v"})).expect("encrypt");

        assert_ne!(first.payload, second.payload);
        let a: Value = codec.decrypt(&first).expect("decrypt");
        let b: Value = codec.decrypt(&second).expect("decrypt");
        assert_eq!(a, b);
    }

    #[test]
    fn any_flipped_byte_fails_authentication() {
        let codec = codec("v1", "tamper-master-secret");
        let envelope = codec.encrypt(&json!({"accessToken": "abc"})).expect("encrypt");
        let raw = STANDARD.decode(&envelope.payload).expect("base64");

        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            let forged = EncryptedEnvelope {
                key_id: envelope.key_id.clone(),
                payload: STANDARD.encode(&tampered),
            };
            let err = codec.decrypt::<Value>(&forged).expect_err("tampered payload");
            assert_eq!(err, EnvelopeError::Authentication, "byte {i}");
        }
    }

    #[test]
    fn short_payload_is_malformed() {
        let codec = codec("v1", "short-payload-master-secret");
        let envelope = EncryptedEnvelope {
            key_id: "v1".into(),
            payload: STANDARD.encode([0u8; MIN_PAYLOAD_LEN - 1]),
        };
        let err = codec.decrypt::<Value>(&envelope).expect_err("too short");
        assert!(matches!(err, EnvelopeError::Malformed { .. }));
        assert_eq!(err.reason(), "envelope_malformed");
    }

    #[test]
    fn empty_plaintext_bytes_still_carry_iv_and_tag() {
        let codec = codec("v1", "empty-payload-master-secret");
        let envelope = codec.seal(b"").expect("seal");
        assert_eq!(decoded_len(&envelope), MIN_PAYLOAD_LEN);
        // Authenticates, but an empty string is not JSON.
        let err = codec.decrypt::<Value>(&envelope).expect_err("not json");
        assert!(matches!(err, EnvelopeError::Deserialization { .. }));
    }

    #[test]
    fn invalid_base64_is_malformed() {
        let codec = codec("v1", "base64-master-secret");
        let envelope = EncryptedEnvelope {
            key_id: "v1".into(),
            payload: "not base64!!".into(),
        };
        assert!(matches!(
            codec.decrypt::<Value>(&envelope),
            Err(EnvelopeError::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_key_id_fails_even_with_valid_payload() {
        let codec = codec("v1", "unknown-key-master-secret");
        let mut envelope = codec.encrypt(&json!("hello")).expect("encrypt");
        envelope.key_id = "v0".into();

        let err = codec.decrypt::<Value>(&envelope).expect_err("unknown key");
        assert_eq!(
            err,
            EnvelopeError::UnknownKeyId {
                key_id: "v0".into()
            }
        );
    }

    #[test]
    fn same_id_different_secret_fails_authentication() {
        let writer = codec("v1", "the-original-secret");
        let reader = codec("v1", "a-different-secret");
        let envelope = writer.encrypt(&json!("hello")).expect("encrypt");
        assert_eq!(
            reader.decrypt::<Value>(&envelope),
            Err(EnvelopeError::Authentication)
        );
    }

    #[test]
    fn non_json_plaintext_is_a_deserialization_failure() {
        let codec = codec("v1", "non-json-master-secret");
        let envelope = codec.seal(b"{not json").expect("seal");
        let err = codec.decrypt::<Value>(&envelope).expect_err("bad json");
        assert_eq!(err.reason(), "deserialization_failure");
    }

    #[test]
    fn rotation_decrypts_old_and_encrypts_with_new() {
        let old = codec("2023-01", "the-old-master-secret");
        let legacy = old.encrypt(&json!({"appSecret": "legacy"})).expect("encrypt");

        let previous = KeyMaterial::derive("2023-01", "the-old-master-secret").expect("derive");
        let rotated = EnvelopeCodec::new(Arc::new(
            ring("2024-06", "the-new-master-secret")
                .with_previous(previous)
                .expect("ring"),
        ));

        let opened: Value = rotated.decrypt(&legacy).expect("decrypt legacy");
        assert_eq!(opened, json!({"appSecret": "legacy"}));

        let fresh = rotated.encrypt(&opened).expect("encrypt");
        assert_eq!(fresh.key_id, "2024-06");
        assert_eq!(rotated.active_key_id(), "2024-06");
        assert!(matches!(
            old.decrypt::<Value>(&fresh),
            Err(EnvelopeError::UnknownKeyId { .. })
        ));
    }

    #[test]
    fn envelope_serializes_with_camel_case_key_id() {
        let envelope = EncryptedEnvelope {
            key_id: "v1".into(),
            payload: "AAAA".into(),
        };
        assert_eq!(
            serde_json::to_value(&envelope).expect("serialize"),
            json!({"keyId": "v1", "payload": "AAAA"})
        );
    }
}
