//! A deterministic test double for [`Inference`].
//!
//! Scripted as a queue of attempts, each a list of events to emit in order.
//! The orchestrator retries by calling `stream()` again after a backtrack,
//! which is exactly "pop the next attempt's script" here.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures_util::future::{AbortHandle, Abortable};
use tokio::sync::mpsc;

use inkstream_types::Turn;

use crate::errors::InferenceError;
use crate::{Inference, InferenceStream};

/// One item in a scripted attempt.
#[derive(Debug, Clone)]
pub enum ScriptedEvent {
    Text(String),
    Error(String),
}

pub struct ScriptedInference {
    attempts: Mutex<VecDeque<Vec<ScriptedEvent>>>,
    abort: Mutex<Option<AbortHandle>>,
    recorded_systems: Mutex<Vec<String>>,
}

impl ScriptedInference {
    /// `attempts[0]` is played back on the first `stream()` call,
    /// `attempts[1]` on the second (i.e. after one backtrack), and so on.
    /// A `stream()` call past the end of the script plays back no events.
    #[must_use]
    pub fn new(attempts: Vec<Vec<ScriptedEvent>>) -> Self {
        Self {
            attempts: Mutex::new(attempts.into()),
            abort: Mutex::new(None),
            recorded_systems: Mutex::new(Vec::new()),
        }
    }

    /// The `system` prompt passed to each `stream()` call so far, in order.
    /// Lets tests assert on what the orchestrator told the model without
    /// the scripted backend needing to understand prompt content.
    #[must_use]
    pub fn recorded_systems(&self) -> Vec<String> {
        self.recorded_systems
            .lock()
            .expect("recorded_systems mutex poisoned")
            .clone()
    }

    /// Convenience constructor for a single-attempt script of plain text
    /// deltas, with no retries expected.
    #[must_use]
    pub fn single_attempt(deltas: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(vec![deltas
            .into_iter()
            .map(|d| ScriptedEvent::Text(d.into()))
            .collect()])
    }
}

impl Inference for ScriptedInference {
    fn stream(
        &self,
        _messages: Vec<Turn>,
        system: String,
        _mode: &str,
        _temperature: Option<f64>,
    ) -> InferenceStream {
        self.recorded_systems
            .lock()
            .expect("recorded_systems mutex poisoned")
            .push(system);

        let script = self
            .attempts
            .lock()
            .expect("attempts mutex poisoned")
            .pop_front()
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(script.len().max(1));
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        *self.abort.lock().expect("abort mutex poisoned") = Some(abort_handle);

        tokio::spawn(async move {
            let task = async move {
                for event in script {
                    let item = match event {
                        ScriptedEvent::Text(t) => Ok(t),
                        ScriptedEvent::Error(msg) => Err(InferenceError::Upstream(msg)),
                    };
                    let is_err = item.is_err();
                    if tx.send(item).await.is_err() {
                        return;
                    }
                    if is_err {
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            };
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
