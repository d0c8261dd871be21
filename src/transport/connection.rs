//! Connected byte stream to the daemon.
//!
//! - TCP: `tokio::net::TcpStream`
//! - Unix: `tokio::net::UnixStream`
//!
//! A [`Connection`] carries exactly one command/response exchange and is
//! then closed. Closing is idempotent: the second `close()` returns the
//! outcome of the first.
//!
//! # Example
//!
//! ```ignore
//! use clamd_client::transport::{connect, Address};
//!
//! let addr = Address::parse("tcp://127.0.0.1:3310")?;
//! let mut conn = connect(&addr, None).await?;
//! conn.write_all(b"nPING\n").await?;
//! conn.close().await?;
//! ```

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use super::Address;
use crate::error::{ClamdError, Result};

/// Underlying socket for one of the two transport kinds.
enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

/// Outcome of the first `close()` call.
#[derive(Debug, Clone)]
enum CloseState {
    Open,
    Closed,
    Failed { kind: io::ErrorKind, message: String },
}

/// An open connection to the daemon.
pub struct Connection {
    stream: Option<Stream>,
    address: Address,
    state: CloseState,
}

/// Open a connection to `address`.
///
/// Errors from the OS (refused, unreachable, timed out) are returned
/// as-is; nothing is retried here.
pub async fn connect(address: &Address, timeout: Option<Duration>) -> Result<Connection> {
    let fut = open_stream(address);

    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            ClamdError::Transport(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", address, limit),
            ))
        })??,
        None => fut.await?,
    };

    tracing::trace!("Connected to {}", address);

    Ok(Connection {
        stream: Some(stream),
        address: address.clone(),
        state: CloseState::Open,
    })
}

async fn open_stream(address: &Address) -> Result<Stream> {
    match address {
        Address::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            Ok(Stream::Tcp(stream))
        }
        #[cfg(unix)]
        Address::Unix { path } => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Stream::Unix(stream))
        }
        #[cfg(not(unix))]
        Address::Unix { path } => Err(ClamdError::Address(format!(
            "Unix sockets are not supported on this platform: {}",
            path.display()
        ))),
    }
}

impl Connection {
    /// Address this connection was opened to.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Check if `close()` has been called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        !matches!(self.state, CloseState::Open)
    }

    /// Write the whole buffer.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data).await?;
        Ok(())
    }

    /// Shut down and release the socket.
    ///
    /// Only the first call touches the socket; later calls return the
    /// stored outcome.
    pub async fn close(&mut self) -> Result<()> {
        match &self.state {
            CloseState::Open => {}
            CloseState::Closed => return Ok(()),
            CloseState::Failed { kind, message } => {
                return Err(ClamdError::Transport(io::Error::new(*kind, message.clone())));
            }
        }

        let result = match self.stream.take() {
            Some(mut stream) => match stream.shutdown().await {
                // Peer already went away: nothing left to shut down.
                Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
                other => other,
            },
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                self.state = CloseState::Closed;
                tracing::trace!("Closed connection to {}", self.address);
                Ok(())
            }
            Err(e) => {
                self.state = CloseState::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                };
                Err(ClamdError::Transport(e))
            }
        }
    }

    fn stream_mut(&mut self) -> io::Result<&mut Stream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("state", &self.state)
            .finish()
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Stream::Tcp(s) => s.is_write_vectored(),
            #[cfg(unix)]
            Stream::Unix(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().stream_mut() {
            Ok(stream) => Pin::new(stream).poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().stream_mut() {
            Ok(stream) => Pin::new(stream).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().stream_mut() {
            Ok(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_write_vectored())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream_mut() {
            Ok(stream) => Pin::new(stream).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream_mut() {
            Ok(stream) => Pin::new(stream).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}
