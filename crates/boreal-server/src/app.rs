//! Shared server state: the generator, the idle-timeout setting and the
//! statistics counters.

use boreal::{Generator, TimeSource, WallClock};
use serde::Serialize;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Idle timeout applied when the configuration does not override it.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// State shared by every front-end. Cloning is cheap; all clones observe
/// the same generator and counters.
#[derive(Clone)]
pub struct App {
    inner: Arc<Inner>,
}

struct Inner {
    generator: Generator<Box<dyn TimeSource>>,
    started_at: Instant,
    // Read on every request, written by SetIdleTimeout-style callers.
    idle_timeout_millis: AtomicU64,
    curr_connections: AtomicU64,
    total_connections: AtomicU64,
    cmd_get: AtomicU64,
    get_hits: AtomicU64,
    get_misses: AtomicU64,
}

impl App {
    /// Creates the shared state for one server process.
    ///
    /// Fails if `worker_id` is out of range or already owned by a live
    /// generator in this process.
    pub fn new(worker_id: u64, idle_timeout: Duration) -> boreal::Result<Self> {
        Self::with_time_source(worker_id, idle_timeout, WallClock)
    }

    /// Same as [`App::new`] with a caller-supplied clock. Tests rewind or
    /// freeze the injected clock to drive the generator failure paths.
    pub fn with_time_source(
        worker_id: u64,
        idle_timeout: Duration,
        time: impl TimeSource + 'static,
    ) -> boreal::Result<Self> {
        let time: Box<dyn TimeSource> = Box::new(time);
        let generator = Generator::with_time_source(worker_id, time)?;
        Ok(Self {
            inner: Arc::new(Inner {
                generator,
                started_at: Instant::now(),
                idle_timeout_millis: AtomicU64::new(idle_timeout.as_millis() as u64),
                curr_connections: AtomicU64::new(0),
                total_connections: AtomicU64::new(0),
                cmd_get: AtomicU64::new(0),
                get_hits: AtomicU64::new(0),
                get_misses: AtomicU64::new(0),
            }),
        })
    }

    pub fn worker_id(&self) -> u64 {
        self.inner.generator.worker_id()
    }

    /// Idle timeout for protocol connections; zero disables deadlines.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.idle_timeout_millis.load(Ordering::Relaxed))
    }

    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.inner
            .idle_timeout_millis
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Issues one ID, accounting the outcome as a hit or a miss.
    pub fn next_id(&self) -> boreal::Result<u64> {
        match self.inner.generator.next_id() {
            Ok(id) => {
                self.inner.get_hits.fetch_add(1, Ordering::Relaxed);
                debug!(id, "generated id");
                Ok(id)
            }
            Err(err) => {
                self.inner.get_misses.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Counts one GET-family command, regardless of how many keys or IDs
    /// it carries.
    pub fn record_get_command(&self) {
        self.inner.cmd_get.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_opened(&self) {
        self.inner.total_connections.fetch_add(1, Ordering::Relaxed);
        self.inner.curr_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.inner.curr_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of the counters and process-level data. Each field
    /// is loaded atomically; the fields are not mutually coherent under
    /// concurrent traffic, but every one of them is monotonic.
    pub fn stats(&self) -> Stats {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Stats {
            pid: process::id(),
            uptime: self.inner.started_at.elapsed().as_secs(),
            time,
            version: crate::VERSION.to_owned(),
            curr_connections: self.inner.curr_connections.load(Ordering::Relaxed),
            total_connections: self.inner.total_connections.load(Ordering::Relaxed),
            cmd_get: self.inner.cmd_get.load(Ordering::Relaxed),
            get_hits: self.inner.get_hits.load(Ordering::Relaxed),
            get_misses: self.inner.get_misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the server statistics.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub pid: u32,
    pub uptime: u64,
    pub time: u64,
    pub version: String,
    pub curr_connections: u64,
    pub total_connections: u64,
    pub cmd_get: u64,
    pub get_hits: u64,
    pub get_misses: u64,
}

impl Stats {
    /// Metric name/value pairs in the order both memcached STATS
    /// responses emit them.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("pid", self.pid.to_string()),
            ("uptime", self.uptime.to_string()),
            ("time", self.time.to_string()),
            ("version", self.version.clone()),
            ("curr_connections", self.curr_connections.to_string()),
            ("total_connections", self.total_connections.to_string()),
            ("cmd_get", self.cmd_get.to_string()),
            ("get_hits", self.get_hits.to_string()),
            ("get_misses", self.get_misses.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as TestCounter;

    static NEXT_WORKER_ID: TestCounter = TestCounter::new(700);

    fn test_app() -> App {
        let worker_id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        App::new(worker_id, DEFAULT_IDLE_TIMEOUT).unwrap()
    }

    #[test]
    fn hits_and_misses_follow_generation() {
        let app = test_app();
        app.record_get_command();
        app.next_id().unwrap();

        let stats = app.stats();
        assert_eq!(stats.cmd_get, 1);
        assert_eq!(stats.get_hits, 1);
        assert_eq!(stats.get_misses, 0);
        assert_eq!(stats.pid, process::id());
        assert!(!stats.version.is_empty());
    }

    #[test]
    fn connection_accounting_balances() {
        let app = test_app();
        app.connection_opened();
        app.connection_opened();
        app.connection_closed();

        let stats = app.stats();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.curr_connections, 1);

        app.connection_closed();
        assert_eq!(app.stats().curr_connections, 0);
    }

    #[test]
    fn stats_pairs_preserve_wire_order() {
        let app = test_app();
        let names: Vec<&str> = app.stats().pairs().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            [
                "pid",
                "uptime",
                "time",
                "version",
                "curr_connections",
                "total_connections",
                "cmd_get",
                "get_hits",
                "get_misses"
            ]
        );
    }

    #[test]
    fn idle_timeout_is_updatable() {
        let app = test_app();
        assert_eq!(app.idle_timeout(), DEFAULT_IDLE_TIMEOUT);
        app.set_idle_timeout(Duration::ZERO);
        assert!(app.idle_timeout().is_zero());
    }
}
