use std::sync::Arc;

/// One unit of work: drive a single target through one tick.
///
/// Created by the tick driver, owned by the queue while pending, by a worker
/// while executing, then dropped. Never reused.
#[derive(Debug)]
pub struct UpdateRequest<T> {
    pub target: Arc<T>,
    pub diff_ms: u32,
    /// Timestamp the request was created, for straggler diagnostics.
    pub enqueued_at_ms: u64,
    /// Barrier round this request belongs to. A completion from an older
    /// round no longer counts against the current round's pending total.
    pub round: u64,
}

impl<T> UpdateRequest<T> {
    pub fn new(target: Arc<T>, diff_ms: u32, enqueued_at_ms: u64, round: u64) -> Self {
        Self {
            target,
            diff_ms,
            enqueued_at_ms,
            round,
        }
    }
}
