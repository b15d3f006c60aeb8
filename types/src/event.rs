//! Events produced by the signal parser: plain text, checkpoints, and backtracks.

use crate::NonEmptyString;

/// One token the signal parser emits while separating prose from protocol tags.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A non-empty run of user-visible characters.
    Text(String),
    /// A decision point the model marked, identified by a free-form label.
    Checkpoint { id: NonEmptyString },
    /// A request to discard everything since `checkpoint_id` and retry.
    Backtrack(Backtrack),
}

/// A parsed `<<backtrack:ID|REASON|...>>` tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Backtrack {
    pub checkpoint_id: NonEmptyString,
    pub reason: NonEmptyString,
    pub rephrase: Option<String>,
    pub mode: Option<String>,
    pub temperature: Option<f64>,
}
