use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Epoch origin of the timestamp field: 2015-01-01T00:00:00Z, expressed as
/// milliseconds since the Unix epoch.
pub const EPOCH_MILLIS: u64 = 1_420_070_400 * 1000;

/// Width of the worker ID field.
pub const WORKER_ID_BITS: u32 = 10;

/// Width of the intra-millisecond sequence field.
pub const SEQUENCE_BITS: u32 = 12;

/// Largest representable worker ID (1023).
pub const MAX_WORKER_ID: u64 = (1 << WORKER_ID_BITS) - 1;

/// Largest sequence value within one millisecond (4095).
pub const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

pub(crate) const TIMESTAMP_SHIFT: u32 = WORKER_ID_BITS + SEQUENCE_BITS;

/// Decoded fields of an ID, as returned by [`dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    pub time: SystemTime,
    pub worker_id: u64,
    pub sequence: u64,
}

pub(crate) fn compose(timestamp: u64, worker_id: u64, sequence: u64) -> u64 {
    (timestamp << TIMESTAMP_SHIFT) | (worker_id << SEQUENCE_BITS) | sequence
}

/// Returns the instant at which `id` was generated, truncated to the
/// millisecond.
pub fn to_time(id: u64) -> SystemTime {
    let ms = EPOCH_MILLIS + (id >> TIMESTAMP_SHIFT);
    UNIX_EPOCH + Duration::from_millis(ms)
}

/// Returns the minimum ID that can be generated at instant `t`.
///
/// Instants before the service epoch saturate to zero.
pub fn to_id(t: SystemTime) -> u64 {
    let unix_ms = t
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    unix_ms.saturating_sub(EPOCH_MILLIS) << TIMESTAMP_SHIFT
}

/// Splits `id` into its timestamp, worker ID and sequence fields.
pub fn dump(id: u64) -> IdParts {
    IdParts {
        time: to_time(id),
        worker_id: (id >> SEQUENCE_BITS) & MAX_WORKER_ID,
        sequence: id & MAX_SEQUENCE,
    }
}
