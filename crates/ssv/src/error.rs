//! Verification error types.
//!
//! Errors fall into three groups:
//!
//! - **Key-set refresh**: [`SsvError::Fetch`], [`SsvError::Timeout`], [`SsvError::MalformedKeySet`],
//!   [`SsvError::InvalidPublicKey`], [`SsvError::DuplicateKeyId`]. The refresher logs these and
//!   keeps the current key set.
//! - **Callback parsing**: [`SsvError::MissingParameter`], [`SsvError::MalformedQuery`]. The
//!   listener maps these to `400 Bad Request`.
//! - **Verification**: [`SsvError::SignatureParamNotFound`], [`SsvError::MalformedSignature`],
//!   [`SsvError::KeyNotFound`], [`SsvError::InvalidSignature`], [`SsvError::UnsignedParameter`].
//!   These only ever surface through
//!   [`CallbackVerifier::check`](crate::CallbackVerifier::check); the boolean
//!   [`CallbackVerifier::verify`](crate::CallbackVerifier::verify) folds them into `false`.

use std::sync::Arc;

use thiserror::Error;

/// A shared error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for verification operations.
pub type Result<T> = std::result::Result<T, SsvError>;

/// Errors produced by key-set refresh, callback parsing and signature verification.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SsvError {
    /// The key list could not be retrieved (connection failure, non-success status).
    #[error("Key fetch failed: {message}")]
    Fetch {
        /// Description of the failure.
        message: String,
        /// The underlying transport error.
        #[source]
        source: Option<BoxError>,
    },

    /// The key list request exceeded its timeout.
    #[error("Key fetch timed out")]
    Timeout,

    /// The key list payload is not the expected JSON document.
    #[error("Malformed key set: {message}")]
    MalformedKeySet {
        /// Description of what was wrong with the payload.
        message: String,
        /// The underlying decode error.
        #[source]
        source: Option<BoxError>,
    },

    /// A published key could not be decoded as a P-256 SubjectPublicKeyInfo.
    #[error("Invalid public key {key_id}: {message}")]
    InvalidPublicKey {
        /// Identifier of the offending key.
        key_id: String,
        /// Description of the decode failure.
        message: String,
    },

    /// The same key identifier appears more than once in one key list.
    #[error("Duplicate key id in key set: {key_id}")]
    DuplicateKeyId {
        /// The repeated identifier.
        key_id: String,
    },

    /// A required callback parameter is absent or blank.
    #[error("Missing callback parameter: {name}")]
    MissingParameter {
        /// Name of the query parameter.
        name: &'static str,
    },

    /// The callback query string could not be decoded.
    #[error("Malformed callback query: {message}")]
    MalformedQuery {
        /// Description of the decode failure.
        message: String,
    },

    /// The raw query string has no `signature=` parameter to delimit the signed message.
    #[error("Signature parameter not found in query string")]
    SignatureParamNotFound,

    /// The signature parameter is not valid base64url or not a DER ECDSA signature.
    #[error("Malformed signature: {message}")]
    MalformedSignature {
        /// Description of the decode failure.
        message: String,
    },

    /// No published key has the callback's key identifier.
    #[error("Verification key not found: {key_id}")]
    KeyNotFound {
        /// The identifier that was looked up.
        key_id: String,
    },

    /// The signature does not match the signed message under the selected key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// A callback parameter the caller relies on lies outside the signed portion of the query.
    #[error("Callback parameter not covered by signature: {name}")]
    UnsignedParameter {
        /// Name of the query parameter.
        name: &'static str,
    },

    /// Configuration rejected at construction time.
    #[error("Invalid configuration: {message}")]
    Config {
        /// Description of the invalid setting.
        message: String,
    },
}

impl SsvError {
    /// Creates a new `Fetch` error with the given message.
    #[must_use]
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch { message: message.into(), source: None }
    }

    /// Creates a new `Fetch` error with a message and source error.
    #[must_use]
    pub fn fetch_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fetch { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a new `MalformedKeySet` error with the given message.
    #[must_use]
    pub fn malformed_key_set(message: impl Into<String>) -> Self {
        Self::MalformedKeySet { message: message.into(), source: None }
    }

    /// Creates a new `MalformedKeySet` error with a message and source error.
    #[must_use]
    pub fn malformed_key_set_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::MalformedKeySet { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `InvalidPublicKey` error.
    #[must_use]
    pub fn invalid_public_key(key_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPublicKey { key_id: key_id.into(), message: message.into() }
    }

    /// Creates a new `DuplicateKeyId` error.
    #[must_use]
    pub fn duplicate_key_id(key_id: impl Into<String>) -> Self {
        Self::DuplicateKeyId { key_id: key_id.into() }
    }

    /// Creates a new `MissingParameter` error.
    #[must_use]
    pub fn missing_parameter(name: &'static str) -> Self {
        Self::MissingParameter { name }
    }

    /// Creates a new `MalformedQuery` error.
    #[must_use]
    pub fn malformed_query(message: impl Into<String>) -> Self {
        Self::MalformedQuery { message: message.into() }
    }

    /// Creates a new `MalformedSignature` error.
    #[must_use]
    pub fn malformed_signature(message: impl Into<String>) -> Self {
        Self::MalformedSignature { message: message.into() }
    }

    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(key_id: impl Into<String>) -> Self {
        Self::KeyNotFound { key_id: key_id.into() }
    }

    /// Creates a new `UnsignedParameter` error.
    #[must_use]
    pub fn unsigned_parameter(name: &'static str) -> Self {
        Self::UnsignedParameter { name }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Returns `true` for failures that may succeed on the next refresh cycle
    /// without any change on the provider side.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Timeout)
    }
}

impl From<reqwest::Error> for SsvError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return SsvError::Timeout;
        }
        match err.status() {
            Some(status) => SsvError::fetch_with_source(format!("HTTP status {status}"), err),
            None => SsvError::fetch_with_source("request failed", err),
        }
    }
}
