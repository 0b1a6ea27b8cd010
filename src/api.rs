//! Shared HTTP plumbing for the backend document store, the push
//! notification endpoint and the connectivity probe.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise a backend base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Connection strings
// ---------------------------------------------------------------------------

/// Backend credentials packed into one pasteable string: either raw JSON or
/// URL-safe base64 of `{"url","key","project","store"}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionString {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub store_id: Option<String>,
}

fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

pub fn parse_connection_string(raw: &str) -> Option<ConnectionString> {
    let payload = decode_connection_string_payload(raw)?;
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let parsed = ConnectionString {
        url: field(&["url", "baseUrl"]).map(|u| normalize_base_url(&u)),
        api_key: field(&["key", "apiKey"]),
        project_id: field(&["project", "projectId"]),
        store_id: field(&["store", "storeId", "sid"]),
    };
    if parsed == ConnectionString::default() {
        return None;
    }
    Some(parsed)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
pub fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach backend at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid backend URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
pub fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session is invalid or expired".to_string(),
        403 => "Not authorized to write to this store".to_string(),
        404 => "Backend endpoint not found".to_string(),
        409 => "Write conflicted with an existing document".to_string(),
        429 => "Backend quota exceeded, retry later".to_string(),
        s if s >= 500 => format!("Backend server error (HTTP {s})"),
        s => format!("Unexpected response from backend (HTTP {s})"),
    }
}

/// Pull the most specific message out of an error body, falling back to the
/// status description.
pub fn error_detail(status: StatusCode, body_text: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body_text) {
        let message = json
            .get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(Value::as_str)
            .or_else(|| json.get("message").and_then(Value::as_str))
            .map(|s| s.to_string());
        if let Some(message) = message {
            return message;
        }
    }
    let trimmed = body_text.trim();
    if trimmed.is_empty() || trimmed.len() > 300 {
        status_error(status)
    } else {
        format!("{}: {trimmed}", status_error(status))
    }
}

pub fn build_client(timeout: Duration) -> Result<Client, String> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {e}"))
}
