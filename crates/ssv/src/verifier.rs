//! Callback signature verification.
//!
//! # Pipeline
//!
//! ```text
//! raw query ──► signed_message ──┐
//! signature ──► decode_signature ─┼──► VerificationKey::verify ──► bool
//! key_id ─────► KeyStore::lookup ─┘
//! ```
//!
//! Every failure along the way is a rejection, never a fault: callers only see
//! `true` or `false` from [`CallbackVerifier::verify`]. [`CallbackVerifier::check`]
//! runs the same pipeline and reports which step rejected the callback.
//! [`CallbackVerifier::verify_request`] also requires the `user_id` it reports
//! to be part of the signed portion.

use std::sync::Arc;

use crate::{
    callback::{CallbackRequest, decode_signature, signed_message},
    error::{Result, SsvError},
    key_store::KeyStore,
};

/// Verifies callback signatures against the keys in a shared [`KeyStore`].
///
/// Cheap to clone; clones share the store.
#[derive(Debug, Clone)]
pub struct CallbackVerifier {
    store: Arc<KeyStore>,
}

impl CallbackVerifier {
    /// Creates a verifier reading keys from `store`.
    #[must_use]
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self { store }
    }

    /// Returns the store this verifier reads from.
    #[must_use]
    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    /// Returns `true` if `signature` is a valid provider signature over the
    /// signed portion of `raw_query` under the key named by `key_id`.
    ///
    /// `user_id` is only recorded in diagnostics; it is already covered by the
    /// signed portion of the query.
    #[tracing::instrument(skip(self, raw_query, signature), fields(user_id = %user_id, key_id = %key_id))]
    pub fn verify(&self, raw_query: &str, user_id: &str, signature: &str, key_id: &str) -> bool {
        match self.check(raw_query, signature, key_id) {
            Ok(()) => {
                tracing::debug!("callback signature verified");
                true
            },
            Err(err) => {
                tracing::debug!(error = %err, "callback rejected");
                false
            },
        }
    }

    /// Verifies a parsed [`CallbackRequest`]. See [`verify`](Self::verify).
    ///
    /// Additionally requires the request's `user_id` to lie inside the signed
    /// portion of the query, so it cannot be appended after the signature.
    #[must_use]
    pub fn verify_request(&self, request: &CallbackRequest) -> bool {
        let (query, user_id) = (request.raw_query(), request.user_id());
        if !self.verify(query, user_id, request.signature(), request.key_id()) {
            return false;
        }
        if !request.is_user_id_signed() {
            tracing::debug!(
                user_id = %request.user_id(),
                key_id = %request.key_id(),
                "callback rejected: user_id outside signed portion"
            );
            return false;
        }
        true
    }

    /// Runs [`check`](Self::check) for a parsed request and then requires its
    /// `user_id` to be signed.
    ///
    /// # Errors
    ///
    /// Any error of [`check`](Self::check), or [`SsvError::UnsignedParameter`]
    /// if `user_id` only appears after the signature.
    pub fn check_request(&self, request: &CallbackRequest) -> Result<()> {
        self.check(request.raw_query(), request.signature(), request.key_id())?;
        if request.is_user_id_signed() {
            Ok(())
        } else {
            Err(SsvError::unsigned_parameter("user_id"))
        }
    }

    /// Runs the verification pipeline and reports why a callback was rejected.
    ///
    /// # Errors
    ///
    /// - [`SsvError::SignatureParamNotFound`] if `raw_query` has no `signature` parameter
    /// - [`SsvError::MalformedSignature`] if `signature` is not base64url DER
    /// - [`SsvError::KeyNotFound`] if no loaded key has `key_id`
    /// - [`SsvError::InvalidSignature`] if the signature does not match
    pub fn check(&self, raw_query: &str, signature: &str, key_id: &str) -> Result<()> {
        let message = signed_message(raw_query)?;
        let signature = decode_signature(signature)?;
        let key = self.store.lookup(key_id).ok_or_else(|| SsvError::key_not_found(key_id))?;
        key.verify(message.as_bytes(), &signature)
    }
}
