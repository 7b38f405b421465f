//! Callback query parsing and signed-message reconstruction.
//!
//! The provider signs the callback's query string *as it appears on the wire*,
//! up to but excluding the `signature` parameter:
//!
//! ```text
//! ?ad_network=5450213213286189855&ad_unit=12345&user_id=u1&signature=MEUCIQ...&key_id=3335741209
//!  └──────────────────── signed bytes ─────────────────────┘
//! ```
//!
//! The signature parameter is base64url without padding and holds a DER
//! `SEQUENCE { r INTEGER, s INTEGER }`.

use base64::{Engine, engine::general_purpose::STANDARD};
use p256::ecdsa::Signature;
use serde::Deserialize;

use crate::error::{Result, SsvError};

/// Delimiter between the signed prefix and the signature parameter.
const SIGNATURE_SEPARATOR: &str = "&signature=";

/// Prefix used when the signature is the first parameter.
const SIGNATURE_FIRST: &str = "signature=";

/// The three parameters a callback must carry, plus the raw query they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRequest {
    raw_query: String,
    user_id: String,
    signature: String,
    key_id: String,
}

#[derive(Deserialize)]
struct CallbackParams {
    user_id: Option<String>,
    signature: Option<String>,
    key_id: Option<String>,
}

impl CallbackRequest {
    /// Extracts the required parameters from a raw query string.
    ///
    /// `raw_query` may start with `?`. It is kept verbatim for message
    /// reconstruction; only the extracted fields are percent-decoded.
    ///
    /// # Errors
    ///
    /// - [`SsvError::MalformedQuery`] if the query cannot be decoded
    /// - [`SsvError::MissingParameter`] if `user_id` is missing or blank, `signature` is missing,
    ///   or `key_id` is missing or blank
    pub fn from_raw_query(raw_query: &str) -> Result<Self> {
        let query = raw_query.strip_prefix('?').unwrap_or(raw_query);
        let params: CallbackParams = serde_urlencoded::from_str(query)
            .map_err(|e| SsvError::malformed_query(e.to_string()))?;

        // The provider may send an empty user_id; it is still unusable.
        let user_id = params
            .user_id
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SsvError::missing_parameter("user_id"))?;
        let signature = params.signature.ok_or_else(|| SsvError::missing_parameter("signature"))?;
        let key_id = params
            .key_id
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SsvError::missing_parameter("key_id"))?;

        Ok(Self { raw_query: raw_query.to_owned(), user_id, signature, key_id })
    }

    /// Returns the raw query string, exactly as received.
    #[must_use]
    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    /// Returns the `user_id` parameter.
    ///
    /// The value is read from anywhere in the query, including the unsigned
    /// tail after `signature`. Check [`is_user_id_signed`](Self::is_user_id_signed)
    /// before crediting a reward to it.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns `true` if the `user_id` pair appears in the signed portion of the query.
    #[must_use]
    pub fn is_user_id_signed(&self) -> bool {
        let Ok(message) = signed_message(&self.raw_query) else {
            return false;
        };
        serde_urlencoded::from_str::<Vec<(String, String)>>(message)
            .is_ok_and(|pairs| pairs.iter().any(|(k, v)| k == "user_id" && *v == self.user_id))
    }

    /// Returns the `signature` parameter (base64url).
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Returns the `key_id` parameter.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// Returns the portion of `raw_query` covered by the provider's signature.
///
/// That is everything after the optional leading `?` and before the
/// `&signature=` separator. When the signature is the first parameter the
/// signed portion is empty.
///
/// # Errors
///
/// Returns [`SsvError::SignatureParamNotFound`] if the query has no
/// `signature` parameter.
pub fn signed_message(raw_query: &str) -> Result<&str> {
    let query = raw_query.strip_prefix('?').unwrap_or(raw_query);
    if query.starts_with(SIGNATURE_FIRST) {
        return Ok("");
    }
    query
        .find(SIGNATURE_SEPARATOR)
        .map(|end| &query[..end])
        .ok_or(SsvError::SignatureParamNotFound)
}

/// Rewrites a URL-safe base64 string into the standard alphabet with padding.
///
/// `_` becomes `/`, `-` becomes `+`, and padding is chosen from the input
/// length: two `=` when it is 2 mod 4, one when 3 mod 4, none otherwise.
#[must_use]
pub fn to_standard_base64(url_safe: &str) -> String {
    let mut standard: String = url_safe
        .chars()
        .map(|c| match c {
            '_' => '/',
            '-' => '+',
            other => other,
        })
        .collect();
    match url_safe.len() % 4 {
        2 => standard.push_str("=="),
        3 => standard.push('='),
        _ => {},
    }
    standard
}

/// Decodes the callback's `signature` parameter into an ECDSA signature.
///
/// # Errors
///
/// Returns [`SsvError::MalformedSignature`] if the parameter is not base64url
/// or the decoded bytes are not a DER-encoded P-256 signature.
pub fn decode_signature(param: &str) -> Result<Signature> {
    let der = STANDARD
        .decode(to_standard_base64(param))
        .map_err(|e| SsvError::malformed_signature(format!("base64 decode: {e}")))?;
    Signature::from_der(&der).map_err(|e| SsvError::malformed_signature(format!("DER: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use rstest::rstest;

    use super::*;
    use crate::testutil::TestKey;

    #[rstest]
    #[case::signature_then_key_id(
        "?ad_network=5450213213286189855&user_id=u1&signature=abc&key_id=42",
        "ad_network=5450213213286189855&user_id=u1"
    )]
    #[case::no_leading_question_mark("user_id=u1&signature=abc", "user_id=u1")]
    #[case::signature_last("?a=1&b=2&signature=xyz", "a=1&b=2")]
    #[case::signature_first("?signature=xyz&key_id=1", "")]
    #[case::percent_encoding_kept(
        "?custom_data=a%20b&user_id=u%2B1&signature=s",
        "custom_data=a%20b&user_id=u%2B1"
    )]
    #[case::first_of_two("?a=1&signature=s1&signature=s2", "a=1")]
    fn test_signed_message(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(signed_message(raw).unwrap(), expected);
    }

    #[rstest]
    #[case::no_signature("?user_id=u1&key_id=42")]
    #[case::empty("")]
    #[case::suffix_only("?xsignature=abc")]
    fn test_signed_message_without_signature(#[case] raw: &str) {
        assert!(matches!(signed_message(raw), Err(SsvError::SignatureParamNotFound)));
    }

    #[rstest]
    #[case::len_mod_0("ab-_", "ab+/")]
    #[case::len_mod_1("abcde", "abcde")]
    #[case::len_mod_2("ab", "ab==")]
    #[case::len_mod_3("a-_", "a+/=")]
    #[case::empty("", "")]
    fn test_to_standard_base64(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(to_standard_base64(input), expected);
    }

    #[test]
    fn test_decode_signature_accepts_provider_encoding() {
        let key = TestKey::generate("1");
        let signature = key.sign(b"message");
        let param = URL_SAFE_NO_PAD.encode(signature.to_der().as_bytes());

        assert_eq!(decode_signature(&param).unwrap(), signature);
    }

    #[rstest]
    #[case::invalid_alphabet("***")]
    #[case::len_mod_1("MEUCI")]
    #[case::not_der("AAAAAAAA")]
    #[case::raw_fixed_width(&URL_SAFE_NO_PAD.encode([7u8; 64]))]
    fn test_decode_signature_rejects_garbage(#[case] param: &str) {
        assert!(matches!(decode_signature(param), Err(SsvError::MalformedSignature { .. })));
    }

    #[test]
    fn test_from_raw_query_extracts_fields() {
        let request = CallbackRequest::from_raw_query(
            "?ad_network=1&user_id=player%201&signature=MEUC-_&key_id=3335741209",
        )
        .unwrap();

        assert_eq!(request.user_id(), "player 1");
        assert_eq!(request.signature(), "MEUC-_");
        assert_eq!(request.key_id(), "3335741209");
        assert_eq!(
            request.raw_query(),
            "?ad_network=1&user_id=player%201&signature=MEUC-_&key_id=3335741209"
        );
    }

    #[rstest]
    #[case::missing_user_id("?signature=s&key_id=1", "user_id")]
    #[case::blank_user_id("?user_id=%20&signature=s&key_id=1", "user_id")]
    #[case::empty_user_id("?user_id=&signature=s&key_id=1", "user_id")]
    #[case::missing_signature("?user_id=u&key_id=1", "signature")]
    #[case::missing_key_id("?user_id=u&signature=s", "key_id")]
    #[case::blank_key_id("?user_id=u&signature=s&key_id=", "key_id")]
    fn test_from_raw_query_missing_parameter(#[case] raw: &str, #[case] expected: &str) {
        let result = CallbackRequest::from_raw_query(raw);
        assert!(
            matches!(result, Err(SsvError::MissingParameter { name }) if name == expected),
            "expected missing {expected}, got {result:?}"
        );
    }

    #[rstest]
    #[case::signed("?ad_network=1&user_id=u%201&signature=s&key_id=1", true)]
    #[case::signed_first("?user_id=u1&reward_amount=10&signature=s&key_id=1", true)]
    #[case::after_signature("?ad_network=1&signature=s&key_id=1&user_id=u1", false)]
    #[case::signature_first("?signature=s&user_id=u1&key_id=1", false)]
    #[case::similar_name("?xuser_id=u1&signature=s&key_id=1&user_id=u1", false)]
    fn test_is_user_id_signed(#[case] raw: &str, #[case] expected: bool) {
        let request = CallbackRequest::from_raw_query(raw).unwrap();
        assert_eq!(request.is_user_id_signed(), expected, "{raw}");
    }

    #[test]
    fn test_from_raw_query_allows_blank_signature() {
        let request = CallbackRequest::from_raw_query("?user_id=u&signature=&key_id=1").unwrap();
        assert_eq!(request.signature(), "");
    }

    #[test]
    fn test_from_raw_query_rejects_duplicate_parameter() {
        let result = CallbackRequest::from_raw_query("?user_id=a&user_id=b&signature=s&key_id=1");
        assert!(matches!(result, Err(SsvError::MalformedQuery { .. })));
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn prop_transcoding_decodes_url_safe_encoding(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
                let url_safe = URL_SAFE_NO_PAD.encode(&bytes);
                let decoded = STANDARD.decode(to_standard_base64(&url_safe)).unwrap();
                prop_assert_eq!(decoded, bytes);
            }

            #[test]
            fn prop_signed_message_is_prefix_before_signature(
                params in proptest::collection::vec(("[a-z_]{1,12}", "[A-Za-z0-9%._-]{0,16}"), 1..6),
                sig in "[A-Za-z0-9_-]{0,96}",
            ) {
                let prefix = params
                    .iter()
                    .filter(|(k, _)| k != "signature")
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&");
                prop_assume!(!prefix.is_empty());
                prop_assume!(!prefix.starts_with("signature="));
                let raw = format!("?{prefix}&signature={sig}&key_id=1");
                prop_assert_eq!(signed_message(&raw).unwrap(), prefix.as_str());
            }
        }
    }
}
