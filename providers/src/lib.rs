//! The inference capability: an abstract cancellable streaming source, a
//! Claude Messages API implementation, and a scripted test double.
//!
//! The orchestrator in `inkstream-engine` never inspects an `Inference`
//! implementation beyond [`Inference::stream`] and [`Inference::cancel`].

pub mod claude;
pub mod errors;
pub mod scripted;

use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::mpsc;

pub use errors::InferenceError;

/// A single item yielded by a running stream: a text delta, or the terminal
/// error that ended it. The channel closing without an `Err` is a normal
/// end-of-stream.
pub type InferenceEvent = Result<String, InferenceError>;

/// An abstract, cancellable source of streaming text.
///
/// One implementation wraps an HTTP streaming LLM API
/// ([`claude::ClaudeInference`]); [`scripted::ScriptedInference`] substitutes
/// deterministic scripted output for tests.
pub trait Inference: Send + Sync {
    /// Start a streaming completion. Returns immediately with a handle whose
    /// `next()` yields text deltas as they arrive.
    fn stream(
        &self,
        messages: Vec<inkstream_types::Turn>,
        system: String,
        mode: &str,
        temperature: Option<f64>,
    ) -> InferenceStream;

    /// Idempotent. Closes any in-flight stream. A no-op when none is active.
    fn cancel(&self);
}

/// A handle to a running stream's text deltas.
pub struct InferenceStream {
    rx: mpsc::Receiver<InferenceEvent>,
}

impl InferenceStream {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<InferenceEvent>) -> Self {
        Self { rx }
    }

    /// Await the next delta, or `None` once the stream has ended normally.
    pub async fn next(&mut self) -> Option<InferenceEvent> {
        self.rx.recv().await
    }
}

/// Shared HTTP client. Connect-timeout only: SSE streams intentionally run
/// long, so a read timeout would kill legitimate slow generations.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .https_only(true)
            .build()
            .expect("static reqwest client configuration is valid")
    })
}
