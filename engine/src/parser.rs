//! Streaming signal parser: separates plain text from protocol tags.
//!
//! A byte-at-a-time (here, char-at-a-time — Rust's `String` already
//! guarantees chunk boundaries fall on codepoint edges) state machine with
//! strict tag validation, so `<<` occurring in code or prose never produces
//! a false positive. All state lives in the struct's fields, so splitting a
//! tag across arbitrarily many `feed()` calls is handled for free.

use inkstream_types::event::{Backtrack, Event};
use inkstream_types::NonEmptyString;

/// Tags the parser recognizes. The body between `<<` and `>>` must begin
/// with one of these, or the whole thing degrades to literal text.
const TAG_PREFIXES: [&str; 2] = ["checkpoint:", "backtrack:"];

/// Upper bound, in bytes, on the body between `<<` and `>>`. One byte past
/// this and the signal is abandoned and reified as text.
const MAX_SIGNAL_LENGTH: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    MaybeOpen,
    TagCheck,
    InSignal,
}

/// Single-use per inference attempt. Create a fresh parser for every retry.
#[derive(Debug, Default)]
pub struct SignalParser {
    state: StateSlot,
    buffer: String,
    text_buffer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StateSlot(State);

impl Default for StateSlot {
    fn default() -> Self {
        Self(State::Text)
    }
}

impl SignalParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of streamed text, returning the events it commits.
    pub fn feed(&mut self, chunk: &str) -> Vec<Event> {
        let mut result = Vec::new();
        for c in chunk.chars() {
            self.step(c, &mut result);
        }
        if self.state.0 == State::Text && !self.text_buffer.is_empty() {
            result.push(Event::Text(std::mem::take(&mut self.text_buffer)));
        }
        result
    }

    /// Finalize the stream: any pending buffer is reified as literal text,
    /// never as a partial signal. Resets to a fresh state.
    pub fn flush(&mut self) -> Vec<Event> {
        let mut pending = std::mem::take(&mut self.text_buffer);
        match self.state.0 {
            State::MaybeOpen => pending.push('<'),
            State::TagCheck | State::InSignal => {
                pending.push_str("<<");
                pending.push_str(&self.buffer);
            }
            State::Text => {}
        }
        self.buffer.clear();
        self.state.0 = State::Text;

        if pending.is_empty() {
            Vec::new()
        } else {
            vec![Event::Text(pending)]
        }
    }

    fn step(&mut self, c: char, result: &mut Vec<Event>) {
        match self.state.0 {
            State::Text => self.step_text(c),
            State::MaybeOpen => self.step_maybe_open(c),
            State::TagCheck => self.step_tag_check(c),
            State::InSignal => self.step_in_signal(c, result),
        }
    }

    fn step_text(&mut self, c: char) {
        if c == '<' {
            self.state.0 = State::MaybeOpen;
        } else {
            self.text_buffer.push(c);
        }
    }

    fn step_maybe_open(&mut self, c: char) {
        if c == '<' {
            self.state.0 = State::TagCheck;
            self.buffer.clear();
        } else {
            self.text_buffer.push('<');
            self.text_buffer.push(c);
            self.state.0 = State::Text;
        }
    }

    fn step_tag_check(&mut self, c: char) {
        self.buffer.push(c);
        if could_be_tag_prefix(&self.buffer) {
            if is_complete_tag_prefix(&self.buffer) {
                self.state.0 = State::InSignal;
            }
        } else {
            self.reify_buffer_as_text();
        }
    }

    /// The limit bounds everything between `<<` and `>>` (prefix included,
    /// terminator excluded), so it can only be checked once `>>` has
    /// actually landed -- checking mid-accumulation would count the
    /// in-progress `>` characters against the budget and reject a
    /// maximal-length tag one character early. Growth past
    /// `MAX_SIGNAL_LENGTH + 2` without ever seeing `>>` aborts regardless,
    /// so a signal that never terminates can't buffer unboundedly.
    fn step_in_signal(&mut self, c: char, result: &mut Vec<Event>) {
        self.buffer.push(c);
        if self.buffer.ends_with(">>") {
            let body_len = self.buffer.len() - 2;
            if body_len > MAX_SIGNAL_LENGTH {
                self.reify_buffer_as_text();
            } else {
                self.complete_signal(result);
            }
        } else if self.buffer.len() > MAX_SIGNAL_LENGTH + 2 {
            self.reify_buffer_as_text();
        }
    }

    fn complete_signal(&mut self, result: &mut Vec<Event>) {
        let body = &self.buffer[..self.buffer.len() - 2];
        match parse_signal_body(body) {
            Some(event) => {
                if !self.text_buffer.is_empty() {
                    result.push(Event::Text(std::mem::take(&mut self.text_buffer)));
                }
                result.push(event);
            }
            None => {
                self.text_buffer.push_str("<<");
                self.text_buffer.push_str(&self.buffer);
            }
        }
        self.buffer.clear();
        self.state.0 = State::Text;
    }

    /// Abandon the in-progress tag: reify `<<` + whatever was buffered as
    /// literal text and return to `Text`.
    fn reify_buffer_as_text(&mut self) {
        self.text_buffer.push_str("<<");
        self.text_buffer.push_str(&self.buffer);
        self.buffer.clear();
        self.state.0 = State::Text;
    }
}

fn could_be_tag_prefix(s: &str) -> bool {
    TAG_PREFIXES.iter().any(|p| p.starts_with(s))
}

fn is_complete_tag_prefix(s: &str) -> bool {
    TAG_PREFIXES.contains(&s)
}

fn parse_signal_body(body: &str) -> Option<Event> {
    if let Some(id) = body.strip_prefix("checkpoint:") {
        let id = NonEmptyString::new(id).ok()?;
        return Some(Event::Checkpoint { id });
    }

    if let Some(rest) = body.strip_prefix("backtrack:") {
        if rest.is_empty() {
            return None;
        }
        let parts: Vec<&str> = rest.split('|').collect();
        if parts.len() < 2 {
            return None;
        }
        let checkpoint_id = NonEmptyString::new(parts[0]).ok()?;
        let reason = NonEmptyString::new(parts[1]).ok()?;
        let (rephrase, mode, temperature) = parse_backtrack_extras(&parts[2..]);
        return Some(Event::Backtrack(Backtrack {
            checkpoint_id,
            reason,
            rephrase,
            mode,
            temperature,
        }));
    }

    None
}

fn parse_backtrack_extras(parts: &[&str]) -> (Option<String>, Option<String>, Option<f64>) {
    let mut rephrase = None;
    let mut mode = None;
    let mut temperature = None;
    for part in parts {
        if let Some(v) = part.strip_prefix("rephrase:") {
            rephrase = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("mode:") {
            mode = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("temp:") {
            if let Ok(parsed) = v.parse::<f64>() {
                temperature = Some(parsed);
            }
        }
    }
    (rephrase, mode, temperature)
}
