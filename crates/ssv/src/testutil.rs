//! Shared test utilities for callback verification.
//!
//! This module provides helpers for generating P-256 key pairs, signing
//! callbacks the way the provider does, building provider-style key-list
//! documents, and an in-memory [`KeySource`]. It is feature-gated behind
//! `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! reward-ssv = { path = "../ssv", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use reward_ssv::testutil::{TestKey, signed_callback_query};
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use p256::{
    ecdsa::{Signature, SigningKey, signature::Signer},
    pkcs8::{EncodePublicKey, LineEnding},
};
use parking_lot::Mutex;
use rand_core::OsRng;
use serde_json::json;

use crate::{
    error::{Result, SsvError},
    keys::{KeySet, VerificationKey},
    refresher::KeySource,
};

/// A freshly generated P-256 key pair standing in for one provider key.
pub struct TestKey {
    key_id: String,
    signing_key: SigningKey,
}

impl TestKey {
    /// Generates a random key pair published under `key_id`.
    ///
    /// `key_id` must be a decimal integer, like the provider's identifiers.
    pub fn generate(key_id: &str) -> Self {
        assert!(key_id.parse::<u64>().is_ok(), "test key ids must be numeric: {key_id}");
        Self { key_id: key_id.to_owned(), signing_key: SigningKey::random(&mut OsRng) }
    }

    /// Returns the key identifier.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the public key as DER SubjectPublicKeyInfo.
    pub fn spki_der(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_public_key_der()
            .expect("encode SPKI")
            .as_bytes()
            .to_vec()
    }

    /// Returns the public key as standard base64 DER, as in the key list's `base64` field.
    pub fn spki_base64(&self) -> String {
        STANDARD.encode(self.spki_der())
    }

    /// Returns the public key as PEM, as in the key list's `pem` field.
    pub fn pem(&self) -> String {
        self.signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("encode PEM")
    }

    /// Returns the public half as a [`VerificationKey`].
    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey::from_base64(&self.key_id, Some(self.pem()), &self.spki_base64())
            .expect("test key parses")
    }

    /// Signs `message` with ECDSA P-256 / SHA-256.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Signs `message` and encodes the DER signature the way the provider
    /// puts it in the `signature` parameter: base64url, no padding.
    pub fn sign_url_safe(&self, message: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(self.sign(message).to_der().as_bytes())
    }
}

/// Builds a [`KeySet`] holding the public halves of `keys`.
pub fn key_set_of(keys: &[&TestKey]) -> KeySet {
    KeySet::try_from_keys(keys.iter().map(|k| k.verification_key())).expect("unique test key ids")
}

/// Builds a provider-style key-list document for `keys`.
pub fn key_list_json(keys: &[&TestKey]) -> String {
    let entries: Vec<_> = keys
        .iter()
        .map(|k| {
            json!({
                "keyId": k.key_id().parse::<u64>().expect("numeric key id"),
                "pem": k.pem(),
                "base64": k.spki_base64(),
            })
        })
        .collect();
    json!({ "keys": entries }).to_string()
}

/// Signs `signed_params` with `key` and appends the signature and key id the
/// way the provider does.
///
/// Returns `(raw_query, signature_param)` where `raw_query` starts with `?`.
pub fn signed_callback_query(key: &TestKey, signed_params: &str) -> (String, String) {
    let signature = key.sign_url_safe(signed_params.as_bytes());
    let query = format!("?{signed_params}&signature={signature}&key_id={}", key.key_id());
    (query, signature)
}

/// In-memory [`KeySource`] serving a fixed body, optionally failing.
pub struct StaticKeySource {
    body: Mutex<Vec<u8>>,
    fail_with: Mutex<Option<SsvError>>,
    fetches: AtomicU64,
}

impl StaticKeySource {
    /// Creates a source serving `body`.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: Mutex::new(body.into().into_bytes()),
            fail_with: Mutex::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    /// Replaces the served body.
    pub fn set_body(&self, body: impl Into<String>) {
        *self.body.lock() = body.into().into_bytes();
    }

    /// Makes every fetch fail with (a copy of) `error`, or succeed again with `None`.
    pub fn set_failure(&self, error: Option<SsvError>) {
        *self.fail_with.lock() = error;
    }

    /// Returns how many fetches were attempted.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch_key_list(&self) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(ref error) = *self.fail_with.lock() {
            return Err(match error {
                SsvError::Timeout => SsvError::timeout(),
                SsvError::Fetch { message, .. } => SsvError::fetch(message),
                other => SsvError::fetch(other.to_string()),
            });
        }
        Ok(self.body.lock().clone())
    }
}

/// Asserts that a [`Result<T, SsvError>`] is an `Err` matching the given [`SsvError`] variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use reward_ssv::{assert_ssv_error, SsvError};
///
/// let result: Result<(), SsvError> = Err(SsvError::timeout());
/// assert_ssv_error!(result, Timeout);
/// ```
#[macro_export]
macro_rules! assert_ssv_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::SsvError::$variant { .. })),
            "expected SsvError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::SsvError::$variant { .. })),
            "{}: expected SsvError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
