//! Signal parser, prompt builder, checkpoint bookkeeping, and the stream
//! orchestrator that ties them to a cancellable [`inkstream_providers::Inference`].

pub mod callbacks;
pub mod checkpoint;
pub mod orchestrator;
pub mod parser;
pub mod prompt;

pub use callbacks::{Callbacks, SyncCallbacks};
pub use orchestrator::StreamOrchestrator;
pub use parser::SignalParser;
