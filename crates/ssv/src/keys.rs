//! Published verification keys and the provider's key-list format.
//!
//! The provider publishes its current keys as
//!
//! ```json
//! {"keys":[{"keyId":3335741209,"pem":"-----BEGIN PUBLIC KEY-----...","base64":"MFkwEwYHKoZIzj0CAQYI..."}]}
//! ```
//!
//! where `base64` is a standard-alphabet encoding of a DER SubjectPublicKeyInfo
//! for a P-256 key. [`parse_key_set`] turns such a document into a [`KeySet`],
//! parsing every key up front so the request path never decodes key material.

use std::{collections::HashMap, fmt, sync::Arc};

use base64::{Engine, engine::general_purpose::STANDARD};
use p256::{
    ecdsa::{Signature, VerifyingKey, signature::Verifier},
    pkcs8::DecodePublicKey,
};
use serde::Deserialize;

use crate::error::{Result, SsvError};

/// A single published verification key.
///
/// Built once when a key list is loaded; immutable afterwards.
#[derive(Clone)]
pub struct VerificationKey {
    key_id: String,
    pem: Option<String>,
    spki_der: Vec<u8>,
    verifying_key: VerifyingKey,
}

impl VerificationKey {
    /// Parses a key from its base64-encoded DER SubjectPublicKeyInfo.
    ///
    /// # Errors
    ///
    /// Returns [`SsvError::InvalidPublicKey`] if the encoding is not valid
    /// standard base64 or the decoded bytes are not a P-256 public key.
    pub fn from_base64(
        key_id: impl Into<String>,
        pem: Option<String>,
        encoded: &str,
    ) -> Result<Self> {
        let key_id = key_id.into();
        let spki_der = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SsvError::invalid_public_key(&key_id, format!("base64 decode: {e}")))?;
        Self::from_spki_der(key_id, pem, spki_der)
    }

    /// Parses a key from raw DER SubjectPublicKeyInfo bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SsvError::InvalidPublicKey`] if the bytes are not a P-256 public key.
    pub fn from_spki_der(
        key_id: impl Into<String>,
        pem: Option<String>,
        spki_der: Vec<u8>,
    ) -> Result<Self> {
        let key_id = key_id.into();
        let verifying_key = VerifyingKey::from_public_key_der(&spki_der)
            .map_err(|e| SsvError::invalid_public_key(&key_id, format!("P-256 SPKI: {e}")))?;
        Ok(Self { key_id, pem, spki_der, verifying_key })
    }

    /// Returns the key identifier.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the PEM text published alongside the key, if any.
    #[must_use]
    pub fn pem(&self) -> Option<&str> {
        self.pem.as_deref()
    }

    /// Returns the DER SubjectPublicKeyInfo the key was parsed from.
    #[must_use]
    pub fn spki_der(&self) -> &[u8] {
        &self.spki_der
    }

    /// Returns the parsed ECDSA verifying key.
    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Verifies an ECDSA P-256 / SHA-256 signature over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`SsvError::InvalidSignature`] if the signature does not match.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.verifying_key.verify(message, signature).map_err(|_| SsvError::InvalidSignature)
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("key_id", &self.key_id)
            .field("spki_len", &self.spki_der.len())
            .finish_non_exhaustive()
    }
}

/// An immutable set of verification keys indexed by key identifier.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<VerificationKey>>,
}

impl KeySet {
    /// Creates an empty key set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a key set, rejecting repeated key identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`SsvError::DuplicateKeyId`] on the first identifier seen twice.
    pub fn try_from_keys(keys: impl IntoIterator<Item = VerificationKey>) -> Result<Self> {
        let mut map = HashMap::new();
        for key in keys {
            if map.contains_key(key.key_id()) {
                return Err(SsvError::duplicate_key_id(key.key_id()));
            }
            map.insert(key.key_id().to_owned(), Arc::new(key));
        }
        Ok(Self { keys: map })
    }

    /// Returns the key with the given identifier.
    #[must_use]
    pub fn get(&self, key_id: &str) -> Option<&Arc<VerificationKey>> {
        self.keys.get(key_id)
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the key identifiers in ascending order.
    #[must_use]
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Iterates over the keys in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<VerificationKey>> {
        self.keys.values()
    }
}

#[derive(Deserialize)]
struct KeyList {
    keys: Vec<PublishedKey>,
}

#[derive(Deserialize)]
struct PublishedKey {
    #[serde(rename = "keyId")]
    key_id: u64,
    #[serde(default)]
    pem: Option<String>,
    base64: String,
}

/// Parses the provider's key-list document into a [`KeySet`].
///
/// The whole document is rejected if any entry fails to parse.
///
/// # Errors
///
/// - [`SsvError::MalformedKeySet`] if the body is not JSON, lacks a `keys` array, an entry is
///   missing `keyId`/`base64`, or the array is empty
/// - [`SsvError::InvalidPublicKey`] if an entry's key material does not decode
/// - [`SsvError::DuplicateKeyId`] if two entries share a `keyId`
pub fn parse_key_set(body: &[u8]) -> Result<KeySet> {
    let list: KeyList = serde_json::from_slice(body)
        .map_err(|e| SsvError::malformed_key_set_with_source("invalid key list document", e))?;

    if list.keys.is_empty() {
        return Err(SsvError::malformed_key_set("key list is empty"));
    }

    let keys = list
        .keys
        .into_iter()
        .map(|entry| VerificationKey::from_base64(entry.key_id.to_string(), entry.pem, &entry.base64))
        .collect::<Result<Vec<_>>>()?;

    KeySet::try_from_keys(keys)
}
