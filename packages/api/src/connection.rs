//! Handshake orchestration over an arbitrary BIO
//!
//! [`TlsConnection`] is the suspend-and-retry contract callers build on:
//! every call returns as soon as the transport cannot make progress, with a
//! flag telling the caller to come back once it can.

use tessera_engine::{
    Bio, ConnectionInfo, Error, HandshakeStatus, Result, Role, SslContext, SslSession,
};

use crate::settings::TlsSettings;

/// One TLS connection configured from [`TlsSettings`].
pub struct TlsConnection {
    role: Role,
    // Keeps the verify callback and store alive for the session.
    context: SslContext,
    session: SslSession,
    info: Option<ConnectionInfo>,
}

impl TlsConnection {
    /// Create a connection that moves records through `bio`.
    pub fn new(settings: &TlsSettings, bio: impl Into<Bio>) -> Result<Self> {
        let context = settings.build_context()?;
        let session = SslSession::new(&context)?;
        session.set_bio(bio)?;

        if let Some(identity) = settings.local_identity() {
            session.set_certificate(&identity.certificate)?;
            for certificate in &identity.chain {
                session.add_chain_certificate(certificate)?;
            }
            session.set_private_key(&identity.key)?;
        }
        if let (Role::Client, Some(host)) = (settings.role(), settings.target_host()) {
            session.set_server_name(host)?;
        }

        Ok(Self {
            role: settings.role(),
            context,
            session,
            info: None,
        })
    }

    pub fn start_handshake(&mut self) -> Result<()> {
        tracing::debug!("starting {} handshake", self.role);
        self.session.start_handshake(self.role)
    }

    /// Take one handshake step.
    ///
    /// Returns `false` while the handshake is pending; call again once the
    /// transport can move more bytes.
    pub fn process_handshake(&mut self) -> Result<bool> {
        match self.session.process_handshake()? {
            HandshakeStatus::Complete => Ok(true),
            HandshakeStatus::WantRead | HandshakeStatus::WantWrite => Ok(false),
        }
    }

    /// Collect the negotiated parameters once the handshake completed.
    pub fn finish_handshake(&mut self) -> Result<&ConnectionInfo> {
        let info = self.session.finish_handshake()?;
        tracing::debug!(
            "{} connection established: {} {} (peer verified: {})",
            info.role,
            info.protocol_version,
            info.cipher_suite,
            info.peer_verified
        );
        Ok(self.info.insert(info))
    }

    /// Read plaintext. The flag is `true` when no data was available yet.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(usize, bool)> {
        match self.session.read(buf) {
            Ok(n) => Ok((n, false)),
            Err(Error::WouldBlock) => Ok((0, true)),
            Err(e) => Err(e),
        }
    }

    /// Write plaintext. The flag is `true` when records are still queued.
    pub fn write(&mut self, buf: &[u8]) -> Result<(usize, bool)> {
        let n = match self.session.write(buf) {
            Ok(n) => n,
            Err(Error::WouldBlock) => return Ok((0, true)),
            Err(e) => return Err(e),
        };
        match self.session.flush() {
            Ok(()) => Ok((n, false)),
            Err(Error::WouldBlock) => Ok((n, true)),
            Err(e) => Err(e),
        }
    }

    /// Queue close_notify and try to send it. The flag is `true` while the
    /// alert is still queued; call [`flush`](Self::flush) once the transport
    /// can take more bytes.
    pub fn shutdown(&mut self) -> Result<bool> {
        match self.session.shutdown() {
            Ok(()) => Ok(false),
            Err(Error::WouldBlock) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Push queued records to the transport. The flag is `true` while some remain.
    pub fn flush(&mut self) -> Result<bool> {
        match self.session.flush() {
            Ok(()) => Ok(false),
            Err(Error::WouldBlock) => Ok(true),
            Err(e) => Err(e),
        }
    }

    pub fn close(&mut self) {
        self.session.close();
        self.context.close();
    }

    /// Whether the peer presented a chain that was accepted.
    pub fn is_authenticated(&self) -> bool {
        self.info.as_ref().is_some_and(|info| info.peer_verified)
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.info.as_ref()
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    pub fn session(&self) -> &SslSession {
        &self.session
    }
}

impl std::fmt::Debug for TlsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnection")
            .field("role", &self.role)
            .field("state", &self.session.state())
            .field("info", &self.info)
            .finish()
    }
}
