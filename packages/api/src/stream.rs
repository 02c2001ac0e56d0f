//! Blocking TLS over any `Read + Write` transport

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use tessera_engine::{ConnectionInfo, Error, Result, StreamBio};

use crate::connection::TlsConnection;
use crate::settings::TlsSettings;

/// A TLS connection over a blocking stream.
///
/// The transport is shared with the engine's BIO, so [`TlsStream::into_inner`]
/// can hand it back after the session closes. The transport must block:
/// a non-blocking one makes [`TlsStream::handshake`] spin.
pub struct TlsStream<S> {
    connection: TlsConnection,
    transport: Arc<Mutex<S>>,
}

impl<S: Read + Write + Send + 'static> TlsStream<S> {
    /// Run the handshake described by `settings` to completion.
    pub fn handshake(settings: &TlsSettings, stream: S) -> Result<Self> {
        let transport = Arc::new(Mutex::new(stream));
        let mut connection =
            TlsConnection::new(settings, StreamBio::shared(Arc::clone(&transport)))?;
        connection.start_handshake()?;
        while !connection.process_handshake()? {
            tracing::trace!("handshake step limit reached, continuing");
        }
        connection.finish_handshake()?;
        Ok(Self {
            connection,
            transport,
        })
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.connection.connection_info()
    }

    pub fn connection(&self) -> &TlsConnection {
        &self.connection
    }

    /// Send close_notify.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.connection.shutdown()? {
            return Err(Error::WouldBlock);
        }
        Ok(())
    }

    /// Close the session and return the transport.
    pub fn into_inner(self) -> Option<S> {
        let Self {
            mut connection,
            transport,
        } = self;
        connection.close();
        drop(connection);
        Arc::try_unwrap(transport)
            .ok()
            .and_then(|transport| transport.into_inner().ok())
    }
}

impl<S> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.connection.session().read(buf)?)
    }
}

impl<S> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.connection.session().write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.connection.session().flush()?)
    }
}

impl<S> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
