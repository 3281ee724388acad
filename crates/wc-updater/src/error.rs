use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UpdaterError {
    /// The queue was deactivated; workers treat this as the exit signal.
    #[error("update queue is closed")]
    QueueClosed,

    /// Enqueue attempted before `activate`.
    #[error("update queue is not active")]
    QueueInactive,

    #[error("update pool is already active")]
    AlreadyActive,

    #[error("update pool needs at least one thread")]
    NoThreads,

    #[error("worker thread failed to spawn: {0}")]
    Spawn(String),
}
