//! Claude Messages API streaming client.
//!
//! Parses Server-Sent Events by hand over the raw byte stream rather than
//! pulling in an SSE crate: the framing is two lines (`event:`, `data:`)
//! separated by a blank line, and bounding the accumulation buffer is enough
//! to make a hand-rolled parser safe against a misbehaving upstream.

use std::sync::Mutex;

use futures_util::future::{AbortHandle, Abortable};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use inkstream_types::settings::ModeTable;
use inkstream_types::{Role, Turn};

use crate::errors::{format_stream_error, InferenceError};
use crate::{http_client, Inference, InferenceStream};

const FALLBACK_TEMPERATURE: f64 = 0.6;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Caps how much unterminated SSE data we'll buffer before giving up, so a
/// connection that never sends a blank-line terminator can't grow unbounded.
const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct ClaudeInference {
    api_key: String,
    model: String,
    modes: ModeTable,
    abort: Mutex<Option<AbortHandle>>,
}

impl ClaudeInference {
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, modes: ModeTable) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            modes,
            abort: Mutex::new(None),
        }
    }
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn build_request_body(
    model: &str,
    messages: &[Turn],
    system: &str,
    temperature: f64,
) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|turn| {
            serde_json::json!({
                "role": role_str(&turn.role),
                "content": turn.content,
            })
        })
        .collect();

    serde_json::json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "system": system,
        "messages": messages,
        "temperature": temperature,
        "stream": true,
    })
}

/// Find the end of the next complete SSE event (`\n\n` or `\r\n\r\n`) in
/// `buf`, returning the byte offset just past the terminator.
fn find_sse_event_boundary(buf: &str) -> Option<usize> {
    buf.find("\r\n\r\n")
        .map(|i| i + 4)
        .or_else(|| buf.find("\n\n").map(|i| i + 2))
}

/// Extract the concatenation of every `data:` line's payload from one raw
/// SSE event block.
fn extract_sse_data(event_block: &str) -> String {
    event_block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse one `data:` JSON payload into a text delta, if this event carries
/// one. Returns `Ok(None)` for event kinds we don't surface as deltas.
fn parse_stream_event(data: &str) -> Result<Option<String>, InferenceError> {
    if data == "[DONE]" {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| InferenceError::Upstream(format!("malformed SSE payload: {e}")))?;

    match value.get("type").and_then(|t| t.as_str()) {
        Some("content_block_delta") => {
            let text = value
                .pointer("/delta/text")
                .and_then(|t| t.as_str())
                .unwrap_or("");
            Ok(Some(text.to_string()))
        }
        Some("error") => {
            let message = value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown upstream error");
            Err(InferenceError::Upstream(message.to_string()))
        }
        _ => Ok(None),
    }
}

async fn read_capped_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() >= MAX_ERROR_BODY_BYTES {
            break;
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

async fn run_stream(
    client: reqwest::Client,
    api_key: String,
    model: String,
    messages: Vec<Turn>,
    system: String,
    temperature: f64,
    tx: mpsc::Sender<Result<String, InferenceError>>,
) {
    let body = build_request_body(&model, &messages, &system, temperature);

    tracing::debug!(model = %model, message_count = messages.len(), "starting claude stream");

    let response = match client
        .post(API_URL)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "claude request failed before a response arrived");
            let _ = tx.send(Err(InferenceError::Http(e.to_string()))).await;
            return;
        }
    };

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = read_capped_error_body(response).await;
        tracing::warn!(status, "claude returned a non-success status");
        let msg = format_stream_error("claude", &model, Some(status), &body);
        let _ = tx.send(Err(InferenceError::Upstream(msg))).await;
        return;
    }

    let mut buf = String::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(Err(InferenceError::Http(e.to_string()))).await;
                return;
            }
        };
        buf.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(boundary) = find_sse_event_boundary(&buf) {
            let event_block: String = buf.drain(..boundary).collect();
            let data = extract_sse_data(&event_block);
            if data.is_empty() {
                continue;
            }
            match parse_stream_event(&data) {
                Ok(Some(text)) => {
                    if tx.send(Ok(text)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }

        if buf.len() > MAX_SSE_BUFFER_BYTES {
            let _ = tx
                .send(Err(InferenceError::Upstream(
                    "SSE buffer exceeded bound without a frame terminator".to_string(),
                )))
                .await;
            return;
        }
    }
}

impl Inference for ClaudeInference {
    fn stream(
        &self,
        messages: Vec<Turn>,
        system: String,
        mode: &str,
        temperature: Option<f64>,
    ) -> InferenceStream {
        let effective_temp = temperature.unwrap_or_else(|| {
            self.modes
                .get(mode)
                .map(|m| m.temperature)
                .unwrap_or(FALLBACK_TEMPERATURE)
        });
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        *self.abort.lock().expect("abort mutex poisoned") = Some(abort_handle);

        let client = http_client().clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();

        tokio::spawn(async move {
            let task = run_stream(client, api_key, model, messages, system, effective_temp, tx);
            let _ = Abortable::new(task, abort_registration).await;
        });

        InferenceStream::new(rx)
    }

    fn cancel(&self) {
        if let Some(handle) = self.abort.lock().expect("abort mutex poisoned").take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_request_body_with_system_and_messages() {
        let messages = vec![Turn::user("hi"), Turn::assistant("hello")];
        let body = build_request_body("model-x", &messages, "be nice", 0.6);
        assert_eq!(body["model"], "model-x");
        assert_eq!(body["system"], "be nice");
        assert_eq!(body["temperature"], 0.6);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn extracts_data_lines_from_event_block() {
        let block = "event: content_block_delta\ndata: {\"a\":1}\n\n";
        assert_eq!(extract_sse_data(block), "{\"a\":1}");
    }

    #[test]
    fn finds_boundary_on_lf_and_crlf() {
        assert_eq!(find_sse_event_boundary("a\n\nb"), Some(3));
        assert_eq!(find_sse_event_boundary("a\r\n\r\nb"), Some(5));
        assert_eq!(find_sse_event_boundary("no boundary"), None);
    }

    #[test]
    fn parses_text_delta() {
        let data = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}"#;
        assert_eq!(parse_stream_event(data).unwrap(), Some("hi".to_string()));
    }

    #[test]
    fn ignores_non_delta_events() {
        let data = r#"{"type":"message_stop"}"#;
        assert_eq!(parse_stream_event(data).unwrap(), None);
    }

    #[test]
    fn surfaces_error_events() {
        let data = r#"{"type":"error","error":{"message":"overloaded"}}"#;
        assert!(parse_stream_event(data).is_err());
    }
}
