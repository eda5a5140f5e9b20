//! Utility functions for action handling.
//!
//! This module provides helpers for the Base64 JSON token format used by 3DS2,
//! extraction of redirect results from callback URLs, and correlation identifiers.

use crate::errors::{ActionError, Result};
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

/// Query parameters recognised as a redirect result, in priority order.
const REDIRECT_RESULT_KEYS: [&str; 2] = ["redirectResult", "payload"];

/// Encodes a value as Base64 JSON.
///
/// # Examples
///
/// ```
/// use checkout_actions::utils::{encode_base64_json, decode_base64_json};
/// use serde_json::{json, Value};
///
/// let encoded = encode_base64_json(&json!({"transStatus": "Y"})).unwrap();
/// let decoded: Value = decode_base64_json(&encoded).unwrap();
/// assert_eq!(decoded["transStatus"], "Y");
/// ```
pub fn encode_base64_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(BASE64.encode(json.as_bytes()))
}

/// Decodes a Base64 JSON value.
///
/// Standard and URL-safe alphabets are both accepted, with or without padding, since
/// tokens reach the client through different backends.
pub fn decode_base64_json<T: DeserializeOwned>(encoded: &str) -> Result<T> {
    let trimmed = encoded.trim();
    let bytes = match BASE64.decode(trimmed.as_bytes()) {
        Ok(bytes) => bytes,
        Err(_) => URL_SAFE_NO_PAD.decode(trimmed.trim_end_matches('=').as_bytes())?,
    };
    let json_str = String::from_utf8(bytes)
        .map_err(|e| ActionError::InvalidToken(format!("Invalid UTF-8: {}", e)))?;
    Ok(serde_json::from_str(&json_str)?)
}

/// Extracts the redirect result carried by a callback URL.
///
/// Recognises `redirectResult`, then `payload`, then the legacy `PaRes` + `MD` pair.
///
/// # Examples
///
/// ```
/// use checkout_actions::utils::extract_redirect_details;
/// use url::Url;
///
/// let url = Url::parse("myapp://return?redirectResult=X6XtfGC3%21Y").unwrap();
/// let details = extract_redirect_details(&url).unwrap();
/// assert_eq!(details["redirectResult"], "X6XtfGC3!Y");
/// ```
pub fn extract_redirect_details(url: &Url) -> Result<Map<String, Value>> {
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let find = |key: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };

    let mut details = Map::new();

    for key in REDIRECT_RESULT_KEYS {
        if let Some(value) = find(key) {
            details.insert(key.to_string(), Value::String(value));
            return Ok(details);
        }
    }

    if let (Some(pa_res), Some(md)) = (find("PaRes"), find("MD")) {
        details.insert("PaRes".to_string(), Value::String(pa_res));
        details.insert("MD".to_string(), Value::String(md));
        return Ok(details);
    }

    Err(ActionError::InvalidRedirectUrl(url.to_string()))
}

/// Generates a random identifier used to correlate log events of one action.
///
/// # Examples
///
/// ```
/// use checkout_actions::utils::generate_action_id;
///
/// let id = generate_action_id();
/// assert_eq!(id.len(), 16);
/// ```
pub fn generate_action_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let id: [u8; 8] = rng.gen();
    hex::encode(id)
}

/// Whether two URLs share scheme and host, compared case-insensitively.
pub fn same_origin(expected: &Url, candidate: &Url) -> bool {
    let host = |url: &Url| url.host_str().map(str::to_ascii_lowercase);
    expected.scheme().eq_ignore_ascii_case(candidate.scheme()) && host(expected) == host(candidate)
}
