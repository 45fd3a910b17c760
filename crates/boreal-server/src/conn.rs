//! Connection accounting and the listening-socket wrapper shared by the
//! front-ends.

use crate::app::App;
use std::io::{self, IoSlice};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpListener;

/// Listening socket for the memcached front-end: a TCP port or a Unix
/// domain socket (the socket path wins when both are configured).
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

/// Bumps `total_connections` and `curr_connections` when created and
/// releases the live count exactly once when dropped, no matter how the
/// connection ends.
pub(crate) struct ConnectionGuard {
    app: App,
}

impl ConnectionGuard {
    pub(crate) fn new(app: App) -> Self {
        app.connection_opened();
        Self { app }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.app.connection_closed();
    }
}

/// Stream wrapper tying a [`ConnectionGuard`] to the socket lifetime.
pub(crate) struct Counted<S> {
    inner: S,
    _guard: ConnectionGuard,
}

impl<S> Counted<S> {
    pub(crate) fn new(inner: S, app: App) -> Self {
        Self {
            inner,
            _guard: ConnectionGuard::new(app),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Counted<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Counted<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
