//! Fuzz target for callback query parsing and verification.
//!
//! Feeds arbitrary strings as raw callback queries through parameter
//! extraction, signed-message slicing, signature decoding and the full
//! verifier. Every result must be `Ok(...)`, `Err(SsvError)` or `false`;
//! no input may panic.

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use reward_ssv::{
    CallbackRequest, CallbackVerifier, KeyStore, decode_signature, signed_message,
    to_standard_base64,
};

/// Structured input: a query assembled around a `signature` parameter.
#[derive(Debug, Arbitrary)]
struct FuzzedCallback {
    /// Parameters before the signature
    prefix: Vec<(String, String)>,
    /// Signature parameter value, sent as-is
    signature: String,
    /// Key identifier appended after the signature
    key_id: String,
    /// Whether to prepend `?`
    leading_question_mark: bool,
    /// Raw bytes tried as a query on their own
    raw: String,
}

fuzz_target!(|input: FuzzedCallback| {
    let verifier = CallbackVerifier::new(Arc::new(KeyStore::new()));

    let prefix = input
        .prefix
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mark = if input.leading_question_mark { "?" } else { "" };
    let query = format!("{mark}{prefix}&signature={}&key_id={}", input.signature, input.key_id);

    for candidate in [query.as_str(), input.raw.as_str()] {
        let _ = signed_message(candidate);
        if let Ok(request) = CallbackRequest::from_raw_query(candidate) {
            // An empty store must reject everything.
            assert!(!verifier.verify_request(&request));
        }
    }

    let _ = to_standard_base64(&input.signature);
    let _ = decode_signature(&input.signature);
    assert!(!verifier.verify(&query, "user", &input.signature, &input.key_id));
});
