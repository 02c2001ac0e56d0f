//! Tokio driver for TLS sessions
//!
//! The engine session talks to one end of a [`MemoryBio`] pair. The driver
//! owns the other end and shuttles bytes between it and the async transport:
//! records the session wrote are drained to the transport, and bytes read
//! from the transport are fed to the session.

use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use tessera_engine::{Bio, ConnectionInfo, Error, MemoryBio, Result};

use crate::connection::TlsConnection;
use crate::settings::TlsSettings;

const CHUNK: usize = 16 * 1024;

/// A TLS connection over a tokio transport.
pub struct AsyncTlsStream<T> {
    transport: T,
    connection: TlsConnection,
    wire: Bio,
    outgoing: BytesMut,
    shutdown_sent: bool,
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncTlsStream<T> {
    /// Run the handshake described by `settings` over `transport`.
    pub async fn handshake(settings: &TlsSettings, transport: T) -> Result<Self> {
        let (engine_end, wire) = MemoryBio::pair();
        let mut connection = TlsConnection::new(settings, engine_end)?;
        connection.start_handshake()?;

        let mut stream = Self {
            transport,
            connection,
            wire: wire.into(),
            outgoing: BytesMut::with_capacity(CHUNK),
            shutdown_sent: false,
        };
        poll_fn(|cx| stream.poll_handshake(cx)).await?;
        stream.connection.finish_handshake()?;
        Ok(stream)
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.connection.connection_info()
    }

    pub fn connection(&self) -> &TlsConnection {
        &self.connection
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Close the session and return the transport.
    pub fn into_inner(mut self) -> T {
        self.connection.close();
        self.transport
    }

    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        loop {
            let done = match self.connection.process_handshake() {
                Ok(done) => done,
                Err(e) => {
                    // Give the alert a chance to reach the peer.
                    let _ = self.poll_drain(cx);
                    return Poll::Ready(Err(e));
                }
            };
            ready!(self.poll_drain(cx))?;
            if done {
                return Poll::Ready(Ok(()));
            }
            ready!(self.poll_fill(cx))?;
        }
    }

    /// Move everything the session wrote onto the transport.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut chunk = [0u8; CHUNK];
        loop {
            match self.wire.read(&mut chunk) {
                Ok(0) | Err(Error::WouldBlock) => break,
                Ok(n) => self.outgoing.extend_from_slice(&chunk[..n]),
                Err(e) => return Poll::Ready(Err(e.into())),
            }
        }

        while !self.outgoing.is_empty() {
            let n = ready!(Pin::new(&mut self.transport).poll_write(cx, &self.outgoing))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            tracing::trace!("sent {} record bytes", n);
            self.outgoing.advance(n);
        }
        Pin::new(&mut self.transport).poll_flush(cx)
    }

    /// Feed the session one read's worth of transport bytes.
    fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut chunk = [0u8; CHUNK];
        let mut buf = ReadBuf::new(&mut chunk);
        ready!(Pin::new(&mut self.transport).poll_read(cx, &mut buf))?;

        if buf.filled().is_empty() {
            tracing::debug!("transport reached end of stream");
            self.wire.close()?;
        } else {
            tracing::trace!("received {} record bytes", buf.filled().len());
            self.wire.write_all(buf.filled())?;
        }
        Poll::Ready(Ok(()))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncRead for AsyncTlsStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            let (n, want_more) = this.connection.read(buf.initialize_unfilled())?;
            if !want_more {
                buf.advance(n);
                // Answers to post-handshake messages go out on a best-effort basis.
                if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
                    return Poll::Ready(Err(e));
                }
                return Poll::Ready(Ok(()));
            }
            ready!(this.poll_drain(cx))?;
            ready!(this.poll_fill(cx))?;
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncWrite for AsyncTlsStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        let (n, _) = this.connection.write(buf)?;
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_drain(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.shutdown_sent {
            // Anything still queued goes out through the drain below.
            this.connection.shutdown()?;
            this.shutdown_sent = true;
        }
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.transport).poll_shutdown(cx)
    }
}

impl<T> std::fmt::Debug for AsyncTlsStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTlsStream")
            .field("connection", &self.connection)
            .field("queued", &self.outgoing.len())
            .finish_non_exhaustive()
    }
}
