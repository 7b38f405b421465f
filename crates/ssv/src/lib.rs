//! # Reward SSV
//!
//! Server-side verification of signed reward-ad callbacks.
//!
//! When a user earns a reward, the ad network calls the publisher's server
//! with the reward details in the query string and an ECDSA signature over
//! them. This crate decides whether such a callback is authentic.
//!
//! This crate provides:
//! - **Key store**: the provider's published keys, replaced atomically as a whole
//! - **Key refresher**: background task keeping the key store current
//! - **Callback verifier**: signed-message reconstruction and ECDSA P-256 / SHA-256 verification
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use reward_ssv::{CallbackRequest, CallbackVerifier, KeyRefresher, KeyStore, RefresherConfig};
//!
//! # async fn example(raw_query: &str) -> Result<(), reward_ssv::SsvError> {
//! let store = Arc::new(KeyStore::new());
//! let refresher = Arc::new(KeyRefresher::new(Arc::clone(&store), &RefresherConfig::default())?)
//!     .start();
//! let verifier = CallbackVerifier::new(store);
//!
//! let request = CallbackRequest::from_raw_query(raw_query)?;
//! if verifier.verify_request(&request) {
//!     println!("reward granted to {}", request.user_id());
//! }
//!
//! refresher.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Callback query parsing and signed-message reconstruction.
pub mod callback;
/// Refresher configuration.
pub mod config;
/// Error types.
pub mod error;
/// Concurrent key store.
pub mod key_store;
/// Verification keys and key-list parsing.
pub mod keys;
/// Background key-list refresh.
pub mod refresher;
/// Shared test helpers.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Callback signature verification.
pub mod verifier;

// Re-export key types for convenience
pub use callback::{CallbackRequest, decode_signature, signed_message, to_standard_base64};
pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEY_URL, DEFAULT_REFRESH_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
    RefresherConfig,
};
pub use error::{Result, SsvError};
pub use key_store::KeyStore;
pub use keys::{KeySet, VerificationKey, parse_key_set};
pub use refresher::{HttpKeySource, KeyRefresher, KeySource};
pub use verifier::CallbackVerifier;
