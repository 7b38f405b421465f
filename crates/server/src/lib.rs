//! HTTP listener for reward-ad callbacks.
//!
//! Exposes the provider's callback as `GET /?<callback query>` and a
//! `GET /health` probe. Status codes are the only output of a callback:
//!
//! | Outcome                                     | Status |
//! |---------------------------------------------|--------|
//! | `user_id`, `signature` or `key_id` unusable | 400    |
//! | signature verified                          | 200    |
//! | anything else                               | 401    |

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::{env, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{RawQuery, State},
    http::StatusCode,
    routing::get,
};
use reward_ssv::{CallbackRequest, CallbackVerifier, KeyStore, SsvError};
use serde::Serialize;

/// Environment variable naming the listen address.
pub const LISTEN_ADDR_ENV: &str = "SSV_LISTEN_ADDR";

/// Listen address used when [`LISTEN_ADDR_ENV`] is unset.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Resolves the listen address from the environment.
///
/// # Errors
///
/// Returns [`SsvError::Config`] if the variable is set but is not a socket address.
pub fn listen_addr_from_env() -> Result<SocketAddr, SsvError> {
    let raw = env::var(LISTEN_ADDR_ENV).unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_owned());
    parse_listen_addr(&raw)
}

fn parse_listen_addr(raw: &str) -> Result<SocketAddr, SsvError> {
    raw.trim().parse().map_err(|e| {
        SsvError::config(format!("{LISTEN_ADDR_ENV}={raw:?} is not a socket address: {e}"))
    })
}

/// State shared by every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    verifier: CallbackVerifier,
}

impl AppState {
    /// Creates handler state reading keys from `store`.
    #[must_use]
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self { verifier: CallbackVerifier::new(store) }
    }

    /// Returns the verifier used for callbacks.
    #[must_use]
    pub fn verifier(&self) -> &CallbackVerifier {
        &self.verifier
    }
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the listener answers.
    pub status: &'static str,
    /// Number of keys currently loaded.
    pub keys: usize,
}

/// Builds the listener's router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_callback))
        .route("/health", get(health))
        .with_state(state)
}

async fn handle_callback(State(state): State<AppState>, RawQuery(query): RawQuery) -> StatusCode {
    let raw_query = query.map(|q| format!("?{q}")).unwrap_or_default();

    let request = match CallbackRequest::from_raw_query(&raw_query) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(error = %err, "rejecting unparseable callback");
            return StatusCode::BAD_REQUEST;
        },
    };

    if state.verifier.verify_request(&request) {
        tracing::info!(
            user_id = %request.user_id(),
            key_id = %request.key_id(),
            "reward callback accepted"
        );
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", keys: state.verifier.store().len() })
}
