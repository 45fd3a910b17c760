//! Client for the boreal ID service, speaking the memcached text protocol.
//!
//! A [`Client`] holds an ordered list of server endpoints. Each call walks
//! the endpoints in order, trying every endpoint twice before moving on;
//! the first successful exchange wins. Sockets are opened lazily and kept
//! for reuse, and any I/O or protocol failure drops the socket so the next
//! attempt reconnects from scratch. When every endpoint has failed, the
//! returned error names each failure.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Default per-call timeout, covering connect and round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const ATTEMPTS_PER_ENDPOINT: usize = 2;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors surfaced by [`Client`] calls.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected response: {0}")]
    Protocol(String),

    /// Every configured endpoint failed; one entry per endpoint.
    #[error("no servers available: {}", summarize_failures(.0))]
    AllEndpointsFailed(Vec<EndpointFailure>),
}

/// The final failure observed for one endpoint.
#[derive(Debug)]
pub struct EndpointFailure {
    pub addr: String,
    pub error: String,
}

fn summarize_failures(failures: &[EndpointFailure]) -> String {
    if failures.is_empty() {
        return "no endpoints configured".to_owned();
    }
    failures
        .iter()
        .map(|f| format!("{}: {}", f.addr, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// ID-fetching client with reconnect, retry and multi-endpoint failover.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> boreal_client::Result<()> {
/// let client = boreal_client::Client::new(["10.0.0.1:11212", "10.0.0.2:11212"]);
/// let id = client.fetch().await?;
/// let batch = client.fetch_multi(32).await?;
/// # let _ = (id, batch);
/// # Ok(())
/// # }
/// ```
pub struct Client {
    endpoints: Vec<Endpoint>,
    timeout: Duration,
}

impl Client {
    /// Creates a client over `addrs`, tried in the given order.
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: addrs.into_iter().map(|a| Endpoint::new(a.into())).collect(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replaces the per-call timeout (default 5 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetches a single ID.
    pub async fn fetch(&self) -> Result<u64> {
        let ids = self.fetch_keys(&["id".to_owned()]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| Error::Protocol("response contained no value".to_owned()))
    }

    /// Fetches `n` IDs in one round trip.
    pub async fn fetch_multi(&self, n: usize) -> Result<Vec<u64>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = (0..n).map(|i| i.to_string()).collect();
        self.fetch_keys(&keys).await
    }

    async fn fetch_keys(&self, keys: &[String]) -> Result<Vec<u64>> {
        let mut failures = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let mut last_error = None;
            for attempt in 0..ATTEMPTS_PER_ENDPOINT {
                match endpoint.fetch(keys, self.timeout).await {
                    Ok(ids) => return Ok(ids),
                    Err(err) => {
                        debug!(addr = %endpoint.addr, attempt, error = %err, "fetch attempt failed");
                        last_error = Some(err);
                    }
                }
            }
            if let Some(err) = last_error {
                failures.push(EndpointFailure {
                    addr: endpoint.addr.clone(),
                    error: err.to_string(),
                });
            }
        }
        Err(Error::AllEndpointsFailed(failures))
    }
}

struct Endpoint {
    addr: String,
    conn: Mutex<Option<Connection>>,
}

impl Endpoint {
    fn new(addr: String) -> Self {
        Self {
            addr,
            conn: Mutex::new(None),
        }
    }

    async fn fetch(&self, keys: &[String], timeout: Duration) -> Result<Vec<u64>> {
        match tokio::time::timeout(timeout, self.try_fetch(keys)).await {
            Ok(res) => res,
            Err(_) => {
                // The aborted exchange leaves the stream unusable.
                *self.conn.lock().await = None;
                Err(Error::Timeout(timeout))
            }
        }
    }

    async fn try_fetch(&self, keys: &[String]) -> Result<Vec<u64>> {
        let mut guard = self.conn.lock().await;
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => Connection::open(&self.addr).await?,
        };
        match conn.round_trip(keys).await {
            Ok(ids) => {
                *guard = Some(conn);
                Ok(ids)
            }
            // Dropping the connection here forces the next attempt to
            // reconnect rather than reuse a stream in an unknown state.
            Err(err) => Err(err),
        }
    }
}

struct Connection {
    stream: BufStream<TcpStream>,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream: BufStream::new(stream),
        })
    }

    async fn round_trip(&mut self, keys: &[String]) -> Result<Vec<u64>> {
        let mut request = String::with_capacity(8 + keys.len() * 8);
        request.push_str("GETS");
        for key in keys {
            request.push(' ');
            request.push_str(key);
        }
        request.push_str("\r\n");
        self.stream.write_all(request.as_bytes()).await?;
        self.stream.flush().await?;

        let mut ids = Vec::with_capacity(keys.len());
        for _ in keys {
            ids.push(self.read_value().await?);
        }
        let footer = self.read_line().await?;
        if footer != "END" {
            return Err(Error::Protocol(format!("expected END, got {footer:?}")));
        }
        Ok(ids)
    }

    /// Reads one `VALUE <key> <flags> <len>` header and the value line
    /// that follows it.
    async fn read_value(&mut self) -> Result<u64> {
        let header = self.read_line().await?;
        let fields: Vec<&str> = header.split_whitespace().collect();
        if fields.len() != 4 || fields[0] != "VALUE" {
            return Err(Error::Protocol(format!("expected VALUE, got {header:?}")));
        }
        let value = self.read_line().await?;
        value
            .parse()
            .map_err(|_| Error::Protocol(format!("value is not an id: {value:?}")))
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(Error::Protocol("connection closed mid-response".to_owned()));
        }
        while matches!(buf.last(), Some(b'\r' | b'\n')) {
            buf.pop();
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
