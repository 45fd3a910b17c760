pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors surfaced by generator construction and ID issuance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The worker ID does not fit into the 10-bit field.
    #[error("invalid worker id {0}: must be in 0..={max}", max = crate::MAX_WORKER_ID)]
    InvalidWorkerId(u64),

    /// Another live generator in this process already owns the worker ID.
    #[error("worker id {0} is already registered in this process")]
    DuplicateWorkerId(u64),

    /// The wall clock reads earlier than the last issuance. The generator
    /// does not self-heal; fix the clock and restart.
    #[error("clock rolled back: last id issued at {last} ms, clock now reads {now} ms")]
    ClockRolledBack { last: u64, now: u64 },
}
