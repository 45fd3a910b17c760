use crate::EPOCH_MILLIS;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the millisecond timestamps embedded into IDs.
///
/// Implementations return milliseconds elapsed since the service epoch
/// (2015-01-01T00:00:00Z). Production code uses [`WallClock`]; tests inject
/// frozen or stepped clocks to exercise rollback and exhaustion paths.
pub trait TimeSource: Send + Sync {
    /// Milliseconds elapsed since the service epoch.
    fn current_millis(&self) -> u64;
}

/// The production time source, backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn current_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .saturating_sub(EPOCH_MILLIS)
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Box<T> {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}
