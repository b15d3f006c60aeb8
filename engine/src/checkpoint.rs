//! A single rewind anchor recorded during one run.

/// Snapshot taken when a checkpoint is admitted.
///
/// Invariant: `accumulated_text.chars().count() == position`. Storing the
/// full snapshot rather than just `position` is O(n^2) worst case over a
/// long response with many checkpoints; acceptable since responses are
/// small and checkpoints are sparse (guidance: 2-4 per response).
#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub position: usize,
    pub accumulated_text: String,
}
