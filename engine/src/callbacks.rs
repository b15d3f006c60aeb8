//! The UI callback surface: four hooks the orchestrator invokes while
//! driving a run, and a sync-closure adapter for sinks that never suspend.

use futures_util::future::{BoxFuture, FutureExt};

use inkstream_types::Backtrack;

/// Consumer of a run's progress. Every method may suspend; the orchestrator
/// always awaits the returned future, so an implementation backed by a
/// genuinely async sink (writing to a socket, awaiting a UI redraw) and one
/// backed by a plain synchronous closure look identical to the caller.
pub trait Callbacks: Send {
    /// Append to the current assistant bubble.
    fn on_text(&mut self, text: String) -> BoxFuture<'_, ()>;
    /// Replace the bubble with `rewound_text` and surface `event.reason` as
    /// an ephemeral "rethinking" indicator.
    fn on_backtrack(&mut self, event: Backtrack, rewound_text: String) -> BoxFuture<'_, ()>;
    /// Replace the bubble with an error; the run ends without `on_done`.
    fn on_error(&mut self, message: String) -> BoxFuture<'_, ()>;
    /// The bubble is final; remove any transient indicators.
    fn on_done(&mut self, final_text: String) -> BoxFuture<'_, ()>;
}

/// Adapts four synchronous closures into [`Callbacks`] for sinks that never
/// need to suspend -- the "immediately ready" adapter.
pub struct SyncCallbacks<T, B, E, D> {
    pub on_text: T,
    pub on_backtrack: B,
    pub on_error: E,
    pub on_done: D,
}

impl<T, B, E, D> Callbacks for SyncCallbacks<T, B, E, D>
where
    T: FnMut(String) + Send,
    B: FnMut(Backtrack, String) + Send,
    E: FnMut(String) + Send,
    D: FnMut(String) + Send,
{
    fn on_text(&mut self, text: String) -> BoxFuture<'_, ()> {
        (self.on_text)(text);
        futures_util::future::ready(()).boxed()
    }

    fn on_backtrack(&mut self, event: Backtrack, rewound_text: String) -> BoxFuture<'_, ()> {
        (self.on_backtrack)(event, rewound_text);
        futures_util::future::ready(()).boxed()
    }

    fn on_error(&mut self, message: String) -> BoxFuture<'_, ()> {
        (self.on_error)(message);
        futures_util::future::ready(()).boxed()
    }

    fn on_done(&mut self, final_text: String) -> BoxFuture<'_, ()> {
        (self.on_done)(final_text);
        futures_util::future::ready(()).boxed()
    }
}
