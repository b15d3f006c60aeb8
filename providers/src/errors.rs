//! Upstream error classification and user-facing formatting.
//!
//! Grounded in the same split-and-classify shape a provider client needs
//! regardless of which HTTP API it wraps: separate the auth case (almost
//! always a fixable local misconfiguration) from everything else.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum InferenceError {
    #[error("{0}")]
    Http(String),
    #[error("{0}")]
    Upstream(String),
    #[error("stream cancelled")]
    Cancelled,
}

/// Heuristic: does this error text/status look like an authentication
/// failure rather than a generic upstream error?
#[must_use]
pub fn is_auth_error(status: Option<u16>, body: &str) -> bool {
    if matches!(status, Some(401 | 403)) {
        return true;
    }
    let lower = body.to_ascii_lowercase();
    lower.contains("authentication_error")
        || lower.contains("invalid api key")
        || lower.contains("unauthorized")
}

/// Pull a human-readable message out of a JSON error body shaped like
/// `{"error": {"message": "..."}}`, falling back to the raw body.
#[must_use]
pub fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Split a raw HTTP error response into a status and a best-effort message.
#[must_use]
pub fn split_api_error(status: u16, body: &str) -> (u16, String) {
    (status, extract_error_message(body))
}

/// Format an inference failure for display to the end user, with a fix-it
/// hint for the auth case.
#[must_use]
pub fn format_stream_error(provider: &str, model: &str, status: Option<u16>, body: &str) -> String {
    let message = extract_error_message(body);
    if is_auth_error(status, body) {
        format!(
            "Authentication failed for {provider} (model {model}): {message}. \
             Check that the API key environment variable is set and valid."
        )
    } else {
        format!("Inference error from {provider} (model {model}): {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_auth_error_by_status() {
        assert!(is_auth_error(Some(401), ""));
        assert!(!is_auth_error(Some(500), ""));
    }

    #[test]
    fn detects_auth_error_by_body_keyword() {
        assert!(is_auth_error(None, "authentication_error: bad key"));
    }

    #[test]
    fn extracts_nested_message() {
        let body = r#"{"error":{"type":"invalid_request_error","message":"bad model"}}"#;
        assert_eq!(extract_error_message(body), "bad model");
    }

    #[test]
    fn falls_back_to_raw_body() {
        assert_eq!(extract_error_message("not json"), "not json");
    }

    #[test]
    fn formats_auth_error_with_hint() {
        let msg = format_stream_error("claude", "model-x", Some(401), "bad key");
        assert!(msg.contains("Authentication failed"));
        assert!(msg.contains("model-x"));
    }
}
