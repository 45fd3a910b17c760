//! The memcached-compatible front-end.
//!
//! One listener carries both protocols: each connection is classified by
//! peeking at its first byte (`0x80` is the binary magic, everything else
//! is the text protocol) and then handled by the matching request loop.
//! Protocol errors answer in-band and keep the connection alive; I/O
//! errors, idle timeouts and shutdown close it.

mod binary;
mod text;

use crate::app::App;
use crate::conn::{Counted, Listener};
use std::future::Future;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accepts connections until shutdown, spawning one handler task per
/// connection.
pub async fn serve(listener: Listener, app: App, shutdown: CancellationToken) -> anyhow::Result<()> {
    match listener {
        Listener::Tcp(listener) => serve_tcp(listener, app, shutdown).await,
        #[cfg(unix)]
        Listener::Unix(listener) => serve_unix(listener, app, shutdown).await,
    }
}

async fn serve_tcp(
    listener: TcpListener,
    app: App,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, worker_id = app.worker_id(), "listening");
    loop {
        let (stream, peer) = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "error on accept");
                    continue;
                }
            },
        };
        debug!(%peer, "connected");
        spawn_handler(Counted::new(stream, app.clone()), app.clone(), shutdown.clone());
    }
}

#[cfg(unix)]
async fn serve_unix(
    listener: tokio::net::UnixListener,
    app: App,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(addr = ?listener.local_addr()?, worker_id = app.worker_id(), "listening");
    loop {
        let (stream, _) = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "error on accept");
                    continue;
                }
            },
        };
        debug!("connected via unix socket");
        spawn_handler(Counted::new(stream, app.clone()), app.clone(), shutdown.clone());
    }
}

fn spawn_handler<S>(stream: Counted<S>, app: App, shutdown: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, app, shutdown).await {
            debug!(error = %err, "connection closed");
        }
    });
}

async fn handle_connection<S>(
    stream: Counted<S>,
    app: App,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    // Classify the protocol from the first byte without consuming it.
    let first = match with_deadline(&app, &shutdown, peek_first_byte(&mut reader)).await? {
        Some(byte) => byte,
        // Closed before sending anything.
        None => return Ok(()),
    };

    if first == binary::MAGIC_REQUEST {
        binary::serve_connection(&app, &mut reader, &mut writer, &shutdown).await
    } else {
        text::serve_connection(&app, &mut reader, &mut writer, &shutdown).await
    }
}

async fn peek_first_byte<R>(reader: &mut BufReader<R>) -> io::Result<Option<u8>>
where
    R: AsyncRead + Unpin,
{
    let buf = reader.fill_buf().await?;
    Ok(buf.first().copied())
}

/// Runs one request-read under the connection deadline. The idle timeout
/// (when enabled) restarts for every request; shutdown aborts the wait.
async fn with_deadline<F, T>(app: &App, shutdown: &CancellationToken, op: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    let idle = app.idle_timeout();
    tokio::select! {
        () = shutdown.cancelled() => Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "server shutting down",
        )),
        res = async {
            if idle.is_zero() {
                op.await
            } else {
                match tokio::time::timeout(idle, op).await {
                    Ok(res) => res,
                    Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout expired")),
                }
            }
        } => res,
    }
}
