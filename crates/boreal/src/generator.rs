use crate::id::compose;
use crate::{Error, Result, TimeSource, WallClock, MAX_SEQUENCE, MAX_WORKER_ID};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

// Worker IDs live in this pool for as long as their generator does. The
// check only catches misconfiguration inside one process; distinct worker
// IDs across instances remain an operational requirement.
static REGISTERED_WORKER_IDS: Mutex<Vec<u64>> = Mutex::new(Vec::new());

/// Pause between clock samples while waiting out an exhausted millisecond.
const EXHAUSTED_TICK_PAUSE: Duration = Duration::from_nanos(50);

#[derive(Debug)]
struct State {
    last_timestamp: u64,
    sequence: u64,
}

/// Issues strictly increasing 64-bit IDs for one worker.
///
/// A generator owns a worker ID for the lifetime of the process (the
/// registration is released on drop) and serializes issuance behind a
/// mutex. At most 4096 IDs fit into one millisecond; when the sequence
/// wraps, `next_id` spins in short sleeps until the clock ticks over, so
/// the throughput ceiling of 4,096,000 IDs per second is enforced without
/// queueing.
///
/// # Example
///
/// ```
/// let generator = boreal::Generator::new(1).unwrap();
/// let a = generator.next_id().unwrap();
/// let b = generator.next_id().unwrap();
/// assert!(b > a);
/// assert_eq!(boreal::dump(a).worker_id, 1);
/// ```
#[derive(Debug)]
pub struct Generator<T = WallClock> {
    worker_id: u64,
    state: Mutex<State>,
    time: T,
}

impl Generator<WallClock> {
    /// Creates a generator driven by the system wall clock.
    ///
    /// Fails with [`Error::InvalidWorkerId`] if `worker_id` exceeds
    /// [`MAX_WORKER_ID`], and with [`Error::DuplicateWorkerId`] if another
    /// live generator in this process already owns it.
    pub fn new(worker_id: u64) -> Result<Self> {
        Self::with_time_source(worker_id, WallClock)
    }
}

impl<T: TimeSource> Generator<T> {
    /// Creates a generator with a caller-supplied [`TimeSource`].
    pub fn with_time_source(worker_id: u64, time: T) -> Result<Self> {
        if worker_id > MAX_WORKER_ID {
            return Err(Error::InvalidWorkerId(worker_id));
        }
        register_worker_id(worker_id)?;

        Ok(Self {
            worker_id,
            state: Mutex::new(State {
                last_timestamp: 0,
                sequence: 0,
            }),
            time,
        })
    }

    /// The worker ID embedded into every ID this generator issues.
    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// Issues the next ID.
    ///
    /// Returns [`Error::ClockRolledBack`] if the clock reads earlier than
    /// the previous issuance; the caller must not retry.
    pub fn next_id(&self) -> Result<u64> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut ts = self.time.current_millis();
        if ts < state.last_timestamp {
            return Err(Error::ClockRolledBack {
                last: state.last_timestamp,
                now: ts,
            });
        }

        if ts == state.last_timestamp {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // 4096 IDs already issued this millisecond.
                ts = self.wait_until_next_tick(ts);
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = ts;

        Ok(compose(ts, self.worker_id, state.sequence))
    }

    fn wait_until_next_tick(&self, ts: u64) -> u64 {
        let mut next = self.time.current_millis();
        while next <= ts {
            thread::sleep(EXHAUSTED_TICK_PAUSE);
            next = self.time.current_millis();
        }
        next
    }
}

impl<T> Drop for Generator<T> {
    fn drop(&mut self) {
        let mut pool = REGISTERED_WORKER_IDS
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = pool.iter().position(|id| *id == self.worker_id) {
            pool.swap_remove(pos);
        }
    }
}

fn register_worker_id(worker_id: u64) -> Result<()> {
    let mut pool = REGISTERED_WORKER_IDS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if pool.contains(&worker_id) {
        return Err(Error::DuplicateWorkerId(worker_id));
    }
    pool.push(worker_id);
    Ok(())
}
