//! The stream orchestrator: drives the signal parser over a cancellable
//! inference source, applies checkpoint admission policy, executes
//! backtracks, enforces the backtrack budget, and commits the final
//! transcript.

use std::collections::HashMap;

use inkstream_providers::Inference;
use inkstream_types::event::{Backtrack, Event};
use inkstream_types::settings::Settings;
use inkstream_types::{NonEmptyString, Role, Turn};

use crate::callbacks::Callbacks;
use crate::checkpoint::CheckpointRecord;
use crate::parser::SignalParser;
use crate::prompt::build_system_prompt;

const BUDGET_EXHAUSTED_SENTINEL: &str = " [backtrack budget exhausted] ";

const CONTINUATION_PROMPT: &str = "Continue your response directly from where you left off. \
Do not repeat, summarize, or acknowledge this instruction. Pick up mid-sentence if needed.";

/// Per-`run()` mutable state. Owned exclusively by one `run()` invocation;
/// checkpoint records never escape it.
struct RunContext {
    accumulated: String,
    checkpoints: HashMap<NonEmptyString, CheckpointRecord>,
    chars_since_signal: usize,
    hints: Vec<String>,
    backtracks_used: u32,
    mode: String,
    temperature_override: Option<f64>,
}

impl RunContext {
    fn new(settings: &Settings) -> Self {
        Self {
            accumulated: String::new(),
            checkpoints: HashMap::new(),
            // The first checkpoint of a run is always admissible.
            chars_since_signal: settings.min_tokens_between_signals(),
            hints: Vec::new(),
            backtracks_used: 0,
            mode: settings.default_mode().to_string(),
            temperature_override: None,
        }
    }
}

enum EventOutcome {
    Continue,
    Restart,
}

/// Orchestrates inference with backtrack interception across one
/// conversation's worth of `run()` calls.
pub struct StreamOrchestrator<I: Inference> {
    inference: I,
    settings: Settings,
    conversation: Vec<Turn>,
}

impl<I: Inference> StreamOrchestrator<I> {
    #[must_use]
    pub fn new(inference: I, settings: Settings) -> Self {
        Self {
            inference,
            settings,
            conversation: Vec::new(),
        }
    }

    #[must_use]
    pub fn conversation(&self) -> &[Turn] {
        &self.conversation
    }

    /// Process one user message end to end: one or more attempts, ending in
    /// exactly one `on_done` or one `on_error`.
    pub async fn run(&mut self, user_message: impl Into<String>, callbacks: &mut dyn Callbacks) {
        self.conversation.push(Turn::user(user_message.into()));
        let conversation_base = self.conversation.clone();
        let mut ctx = RunContext::new(&self.settings);

        // Constructed before the first await point so that dropping this
        // future mid-inference (external cancellation) also rolls back the
        // tentative user turn via `Drop`, not just a normal error/success
        // return from `inference_loop`.
        let mut guard = PendingUserTurnGuard::new(&mut self.conversation);

        let outcome = inference_loop(
            &self.inference,
            &self.settings,
            &conversation_base,
            &mut ctx,
            callbacks,
        )
        .await;

        if let Some(mut parser) = outcome {
            for event in parser.flush() {
                if let Event::Text(text) = event {
                    ctx.accumulated.push_str(&text);
                    callbacks.on_text(text).await;
                }
            }
            guard.conversation.push(Turn::assistant(ctx.accumulated.clone()));
            guard.commit();
            callbacks.on_done(ctx.accumulated).await;
        }
        // On the error path, `inference_loop` has already invoked `on_error`;
        // dropping the guard here removes the tentative user turn.
    }
}

/// Removes the tentatively appended user turn on any non-success exit,
/// including the caller dropping the enclosing future before it resolves.
struct PendingUserTurnGuard<'a> {
    conversation: &'a mut Vec<Turn>,
    committed: bool,
}

impl<'a> PendingUserTurnGuard<'a> {
    fn new(conversation: &'a mut Vec<Turn>) -> Self {
        Self {
            conversation,
            committed: false,
        }
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for PendingUserTurnGuard<'_> {
    fn drop(&mut self) {
        if !self.committed && matches!(self.conversation.last(), Some(t) if t.role == Role::User) {
            self.conversation.pop();
        }
    }
}

/// Run inference with backtrack retries. `None` means an upstream error
/// already reported through `on_error`; `Some` carries the parser from the
/// attempt that completed normally, ready for `flush()`.
async fn inference_loop<I: Inference>(
    inference: &I,
    settings: &Settings,
    conversation_base: &[Turn],
    ctx: &mut RunContext,
    callbacks: &mut dyn Callbacks,
) -> Option<SignalParser> {
    loop {
        let messages = build_messages(conversation_base, &ctx.accumulated);
        let effective_temp = ctx.temperature_override.unwrap_or_else(|| {
            settings
                .modes()
                .get(&ctx.mode)
                .map(|m| m.temperature)
                .expect("ctx.mode always names a validated mode")
        });
        let system = build_system_prompt(
            &ctx.hints,
            settings.max_hint_length(),
            &ctx.mode,
            effective_temp,
            settings.modes(),
        );

        let mut stream = inference.stream(messages, system, &ctx.mode, ctx.temperature_override);
        let mut parser = SignalParser::new();

        loop {
            match stream.next().await {
                None => return Some(parser),
                Some(Ok(delta)) => {
                    let events = parser.feed(&delta);
                    let mut restart = false;
                    for event in events {
                        match process_event(event, inference, settings, ctx, callbacks).await {
                            EventOutcome::Continue => {}
                            EventOutcome::Restart => {
                                restart = true;
                                break;
                            }
                        }
                    }
                    if restart {
                        break;
                    }
                }
                Some(Err(e)) => {
                    callbacks.on_error(format!("Inference error: {e}")).await;
                    return None;
                }
            }
        }
    }
}

async fn process_event<I: Inference>(
    event: Event,
    inference: &I,
    settings: &Settings,
    ctx: &mut RunContext,
    callbacks: &mut dyn Callbacks,
) -> EventOutcome {
    match event {
        Event::Text(text) => {
            ctx.accumulated.push_str(&text);
            ctx.chars_since_signal += text.chars().count();
            callbacks.on_text(text).await;
            EventOutcome::Continue
        }
        Event::Checkpoint { id } => {
            handle_checkpoint(id, settings, ctx);
            EventOutcome::Continue
        }
        Event::Backtrack(bt) => handle_backtrack(bt, inference, settings, ctx, callbacks).await,
    }
}

fn handle_checkpoint(id: NonEmptyString, settings: &Settings, ctx: &mut RunContext) {
    if ctx.chars_since_signal < settings.min_tokens_between_signals() {
        tracing::debug!(checkpoint = %id, "checkpoint ignored: too soon since last signal");
        return;
    }
    let position = ctx.accumulated.chars().count();
    ctx.checkpoints.insert(
        id.clone(),
        CheckpointRecord {
            position,
            accumulated_text: ctx.accumulated.clone(),
        },
    );
    ctx.chars_since_signal = 0;
    tracing::debug!(checkpoint = %id, position, "checkpoint admitted");
}

async fn handle_backtrack<I: Inference>(
    bt: Backtrack,
    inference: &I,
    settings: &Settings,
    ctx: &mut RunContext,
    callbacks: &mut dyn Callbacks,
) -> EventOutcome {
    if ctx.backtracks_used >= settings.max_backtracks() {
        tracing::debug!("backtrack budget exhausted");
        ctx.accumulated.push_str(BUDGET_EXHAUSTED_SENTINEL);
        callbacks.on_text(BUDGET_EXHAUSTED_SENTINEL.to_string()).await;
        return EventOutcome::Continue;
    }

    let Some(record) = ctx.checkpoints.get(&bt.checkpoint_id).cloned() else {
        tracing::debug!(checkpoint_id = %bt.checkpoint_id, "backtrack ignored: unknown checkpoint");
        return EventOutcome::Continue;
    };

    let mut bt = bt;
    if let Some(mode) = &bt.mode {
        if !settings.modes().contains(mode) {
            tracing::debug!(mode = %mode, "unknown mode in backtrack, discarding field");
            bt.mode = None;
        }
    }
    if let Some(temp) = bt.temperature {
        if !(0.0..=1.0).contains(&temp) {
            tracing::debug!(temperature = temp, "temperature out of range, discarding field");
            bt.temperature = None;
        }
    }

    tracing::debug!(
        checkpoint_id = %bt.checkpoint_id,
        reason = %bt.reason,
        mode = ?bt.mode,
        temperature = ?bt.temperature,
        "executing backtrack"
    );

    inference.cancel();

    ctx.accumulated = record.accumulated_text.clone();
    ctx.checkpoints.retain(|_, r| r.position <= record.position);
    ctx.hints.push(bt.reason.to_string());
    if let Some(mode) = bt.mode.clone() {
        ctx.mode = mode;
    }
    if let Some(temp) = bt.temperature {
        ctx.temperature_override = Some(temp);
    }
    ctx.backtracks_used += 1;
    ctx.chars_since_signal = settings.min_tokens_between_signals();

    let rewound = ctx.accumulated.clone();
    callbacks.on_backtrack(bt, rewound).await;
    EventOutcome::Restart
}

/// Synthesize the retry tail: the API has no universal assistant-prefill, so
/// preserved text becomes a prior assistant turn followed by a continuation
/// prompt. Omitted entirely on the first attempt (`accumulated` is empty).
fn build_messages(conversation_base: &[Turn], accumulated: &str) -> Vec<Turn> {
    let mut messages = conversation_base.to_vec();
    if !accumulated.trim().is_empty() {
        messages.push(Turn::assistant(accumulated.to_string()));
        messages.push(Turn::user(CONTINUATION_PROMPT));
    }
    messages
}
