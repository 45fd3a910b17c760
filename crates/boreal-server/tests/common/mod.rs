#![allow(dead_code)]

use boreal::TimeSource;
use boreal_server::app::App;
use boreal_server::conn::Listener;
use boreal_server::memcached;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// Worker IDs are registered process-wide, so every test takes a fresh one.
static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(100);

pub fn next_worker_id() -> u64 {
    NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed)
}

pub fn test_app() -> App {
    test_app_with_idle(Duration::from_secs(600))
}

pub fn test_app_with_idle(idle_timeout: Duration) -> App {
    App::new(next_worker_id(), idle_timeout).unwrap()
}

pub fn test_app_with_clock(clock: ManualClock) -> App {
    App::with_time_source(next_worker_id(), Duration::from_secs(600), clock).unwrap()
}

/// Clock whose reading is set explicitly by the test.
#[derive(Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn at(millis: u64) -> Self {
        Self(Arc::new(AtomicU64::new(millis)))
    }

    pub fn set(&self, millis: u64) {
        self.0.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn current_millis(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Starts the memcached front-end on an ephemeral TCP port.
pub async fn start_memcached(app: App) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = CancellationToken::new();
    tokio::spawn(memcached::serve(Listener::Tcp(listener), app, token.clone()));
    (addr, token)
}

/// Polls `probe` until it returns true or the deadline passes.
pub async fn wait_until<F>(mut probe: F, deadline: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    probe()
}
