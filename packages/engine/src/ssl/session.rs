//! TLS sessions driven over a BIO
//!
//! A session owns one rustls connection and pumps records between it and its
//! [`Bio`]. Every step is non-blocking with respect to the BIO: when the
//! transport cannot make progress the step returns
//! [`HandshakeStatus::WantRead`]/[`HandshakeStatus::WantWrite`] (or
//! [`Error::WouldBlock`] for application data) and is retried later.
//!
//! Fatal failures fault the session: the BIO is dropped and every later call
//! returns the same error.

use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};

use super::context::{SslContext, VerifyMode};
use super::info::{ConnectionInfo, HandshakeStatus, Role, SessionState};
use super::verifier::{lock_report, PeerVerifier, SharedReport};
use super::{CipherSuite, ProtocolVersion};
use crate::bio::{Bio, IoAdapter};
use crate::config::EngineConfig;
use crate::crypto;
use crate::error::{Error, NativeStatus, Result};
use crate::handle::Handle;
use crate::verify::{Purpose, StoreContext, VerifyParam};
use crate::x509::{Certificate, CertificateChain, PrivateKey};

struct SessionData {
    context: SslContext,
    bio: Option<Bio>,
    certificate: Option<Certificate>,
    chain: Vec<Certificate>,
    private_key: Option<PrivateKey>,
    server_name: Option<String>,
    min_version: Option<ProtocolVersion>,
    max_version: Option<ProtocolVersion>,
    role: Option<Role>,
    state: SessionState,
    connection: Option<Connection>,
    report: SharedReport,
}

/// One end of a TLS connection.
pub struct SslSession {
    handle: Handle<Mutex<SessionData>>,
}

impl SslSession {
    pub fn new(context: &SslContext) -> Result<Self> {
        if !context.is_valid() {
            return Err(Error::InvalidHandle("ssl context"));
        }
        Ok(Self {
            handle: Handle::new(
                "ssl session",
                Mutex::new(SessionData {
                    context: context.clone(),
                    bio: None,
                    certificate: None,
                    chain: Vec::new(),
                    private_key: None,
                    server_name: None,
                    min_version: None,
                    max_version: None,
                    role: None,
                    state: SessionState::New,
                    connection: None,
                    report: SharedReport::default(),
                }),
            ),
        })
    }

    /// Run `op` on the session data, faulting the session on fatal errors.
    fn with<R>(&self, op: impl FnOnce(&mut SessionData) -> Result<R>) -> Result<R> {
        let data = self.handle.get()?;
        let mut guard = lock(&data);
        let result = op(&mut guard);
        if let Err(error) = &result {
            if error.is_fatal() {
                guard.transition(SessionState::Faulted);
                drop(guard);
                self.handle.fault(error.clone());
            }
        }
        result
    }

    /// Replace the transport. The previous BIO, if any, is dropped.
    pub fn set_bio(&self, bio: impl Into<Bio>) -> Result<()> {
        let bio = bio.into();
        self.with(|data| {
            tracing::trace!("ssl session using {:?}", bio.kind());
            data.bio = Some(bio);
            Ok(())
        })
    }

    pub fn set_certificate(&self, certificate: &Certificate) -> Result<()> {
        self.with(|data| {
            data.require_new("set a certificate")?;
            data.certificate = Some(certificate.clone());
            Ok(())
        })
    }

    pub fn set_private_key(&self, key: &PrivateKey) -> Result<()> {
        self.with(|data| {
            data.require_new("set a private key")?;
            data.private_key = Some(key.clone());
            Ok(())
        })
    }

    /// Append an intermediate sent after the leaf certificate.
    pub fn add_chain_certificate(&self, certificate: &Certificate) -> Result<()> {
        self.with(|data| {
            data.require_new("add a chain certificate")?;
            data.chain.push(certificate.clone());
            Ok(())
        })
    }

    /// SNI value and expected host for client sessions.
    pub fn set_server_name(&self, name: &str) -> Result<()> {
        self.with(|data| {
            data.require_new("set the server name")?;
            data.server_name = (!name.is_empty()).then(|| name.to_string());
            Ok(())
        })
    }

    /// Server name sent by the client (server) or configured (client).
    pub fn server_name(&self) -> Result<Option<String>> {
        self.with(|data| Ok(data.server_name()))
    }

    pub fn set_min_version(&self, version: ProtocolVersion) -> Result<()> {
        self.with(|data| {
            data.require_new("change protocol versions")?;
            data.min_version = Some(version);
            Ok(())
        })
    }

    pub fn set_max_version(&self, version: ProtocolVersion) -> Result<()> {
        self.with(|data| {
            data.require_new("change protocol versions")?;
            data.max_version = Some(version);
            Ok(())
        })
    }

    /// Build the connection for `role` from the context and session settings.
    ///
    /// Fails with `NativeFailure { status: ProtocolVersion }` when the
    /// configured range contains no version the engine implements.
    pub fn start_handshake(&self, role: Role) -> Result<()> {
        self.with(|data| {
            data.require_new("start a handshake")?;
            let connection = data.build_connection(role)?;
            data.connection = Some(connection);
            data.role = Some(role);
            data.transition(match role {
                Role::Client => SessionState::ClientConnecting,
                Role::Server => SessionState::ServerAccepting,
            });
            Ok(())
        })
    }

    /// Start a client handshake and take the first step.
    pub fn connect(&self) -> Result<HandshakeStatus> {
        self.start_handshake(Role::Client)?;
        self.process_handshake()
    }

    /// Start a server handshake and take the first step.
    pub fn accept(&self) -> Result<HandshakeStatus> {
        self.start_handshake(Role::Server)?;
        self.process_handshake()
    }

    /// Take one handshake step: flush queued records, read what the
    /// transport has, and process it.
    pub fn process_handshake(&self) -> Result<HandshakeStatus> {
        self.with(SessionData::process_handshake)
    }

    /// Drive the handshake to completion over a blocking transport.
    ///
    /// Returns [`Error::WouldBlock`] if the transport cannot make progress.
    pub fn handshake(&self) -> Result<()> {
        match self.process_handshake()? {
            HandshakeStatus::Complete => Ok(()),
            HandshakeStatus::WantRead | HandshakeStatus::WantWrite => Err(Error::WouldBlock),
        }
    }

    /// Negotiated parameters; only valid once established.
    pub fn finish_handshake(&self) -> Result<ConnectionInfo> {
        self.with(|data| {
            data.require_established()?;
            let (accepted, has_context) = {
                let report = lock_report(&data.report);
                (report.accepted, report.context.is_some())
            };
            Ok(ConnectionInfo {
                role: data.role()?,
                protocol_version: data.version()?,
                cipher_suite: data.cipher()?,
                server_name: data.server_name(),
                peer_certificate: data.peer_chain()?.leaf().cloned(),
                peer_chain: data.peer_chain()?,
                peer_verified: has_context && accepted,
            })
        })
    }

    /// Read decrypted application data. `Ok(0)` means the peer closed.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.with(|data| data.read(buf))
    }

    /// Encrypt `buf` and push the records to the transport.
    ///
    /// Records the transport cannot take yet stay queued; see [`Self::flush`].
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.with(|data| data.write(buf))
    }

    /// Push queued records to the transport.
    pub fn flush(&self) -> Result<()> {
        self.with(|data| {
            let (connection, bio) = data.io()?;
            if flush_records(connection, &mut IoAdapter(bio))? {
                Ok(())
            } else {
                Err(Error::WouldBlock)
            }
        })
    }

    /// Send close_notify. The session stays open for reading.
    pub fn shutdown(&self) -> Result<()> {
        self.with(|data| {
            data.require_established()?;
            let (connection, bio) = data.io()?;
            connection.send_close_notify();
            tracing::debug!("sent close_notify");
            if flush_records(connection, &mut IoAdapter(bio))? {
                Ok(())
            } else {
                Err(Error::WouldBlock)
            }
        })
    }

    /// Close the BIO and release the session. Idempotent.
    ///
    /// Closing the BIO only closes a stream the BIO owns.
    pub fn close(&self) {
        if let Ok(data) = self.handle.get() {
            let mut guard = lock(&data);
            if let Some(mut bio) = guard.bio.take() {
                if let Err(e) = bio.close() {
                    tracing::debug!("closing session bio failed: {}", e);
                }
            }
            guard.connection = None;
            guard.transition(SessionState::Closed);
        }
        self.handle.release();
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn state(&self) -> SessionState {
        match self.handle.get() {
            Ok(data) => lock(&data).state,
            Err(_) if self.handle.fault_state().is_some() => SessionState::Faulted,
            Err(_) => SessionState::Closed,
        }
    }

    pub fn role(&self) -> Result<Role> {
        self.with(|data| data.role())
    }

    pub fn is_server(&self) -> Result<bool> {
        Ok(self.role()? == Role::Server)
    }

    pub fn version(&self) -> Result<ProtocolVersion> {
        self.with(|data| data.version())
    }

    pub fn cipher(&self) -> Result<CipherSuite> {
        self.with(|data| data.cipher())
    }

    /// Suites this session offers or accepts.
    pub fn ciphers(&self) -> Result<Vec<CipherSuite>> {
        self.with(|data| {
            Ok(data
                .context
                .ciphers()?
                .into_iter()
                .map(CipherSuite)
                .collect())
        })
    }

    pub fn peer_certificate(&self) -> Result<Option<Certificate>> {
        self.with(|data| Ok(data.peer_chain()?.leaf().cloned()))
    }

    /// Certificates the peer presented, leaf first.
    pub fn peer_chain(&self) -> Result<CertificateChain> {
        self.with(|data| data.peer_chain())
    }

    /// The verification run during the handshake, once the peer chain arrived.
    pub fn verify_context(&self) -> Result<Option<StoreContext>> {
        self.with(|data| Ok(lock_report(&data.report).context.clone()))
    }
}

impl std::fmt::Debug for SslSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SslSession")
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for SslSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl SessionData {
    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        let who = self.role.map_or("session".to_string(), |role| role.to_string());
        tracing::debug!("{} {:?} -> {:?}", who, self.state, next);
        self.context
            .debug_line(&format!("{} {:?} -> {:?}", who, self.state, next));
        self.state = next;
    }

    fn require_new(&self, what: &str) -> Result<()> {
        if self.state == SessionState::New {
            Ok(())
        } else {
            Err(Error::state(format!(
                "cannot {what} once the handshake has started"
            )))
        }
    }

    fn require_established(&self) -> Result<()> {
        if self.state == SessionState::Established {
            Ok(())
        } else {
            Err(Error::state(format!(
                "session is {:?}, not established",
                self.state
            )))
        }
    }

    fn role(&self) -> Result<Role> {
        self.role
            .ok_or_else(|| Error::state("handshake has not been started"))
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .ok_or_else(|| Error::state("handshake has not been started"))
    }

    fn io(&mut self) -> Result<(&mut Connection, &mut Bio)> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::state("handshake has not been started"))?;
        let bio = self
            .bio
            .as_mut()
            .ok_or_else(|| Error::state("no BIO attached to the session"))?;
        Ok((connection, bio))
    }

    fn server_name(&self) -> Option<String> {
        match &self.connection {
            Some(Connection::Server(server)) => server.server_name().map(str::to_string),
            _ => self.server_name.clone(),
        }
    }

    fn version(&self) -> Result<ProtocolVersion> {
        self.connection()?
            .protocol_version()
            .map(ProtocolVersion::from_rustls)
            .ok_or_else(|| Error::state("no protocol version negotiated yet"))
    }

    fn cipher(&self) -> Result<CipherSuite> {
        self.connection()?
            .negotiated_cipher_suite()
            .map(|suite| CipherSuite::from_rustls(suite.suite()))
            .ok_or_else(|| Error::state("no cipher suite negotiated yet"))
    }

    fn peer_chain(&self) -> Result<CertificateChain> {
        let Some(presented) = self.connection()?.peer_certificates() else {
            return Ok(CertificateChain::new());
        };
        presented
            .iter()
            .map(|der| Certificate::from_der(der.as_ref().to_vec()))
            .collect::<Result<Vec<_>>>()
            .map(CertificateChain::from_certificates)
    }

    fn local_chain(&self) -> Result<Option<Vec<CertificateDer<'static>>>> {
        let Some(leaf) = &self.certificate else {
            return Ok(None);
        };
        std::iter::once(leaf)
            .chain(&self.chain)
            .map(Certificate::to_rustls)
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    fn build_connection(&self, role: Role) -> Result<Connection> {
        let (min, max, ciphers, callback, mode, base_param, store) = self.context.read(|ctx| {
            Ok((
                self.min_version.or(ctx.min_version),
                self.max_version.or(ctx.max_version),
                ctx.ciphers.clone(),
                ctx.verify_callback.clone(),
                ctx.verify_mode,
                ctx.verify_param.clone(),
                ctx.store.clone(),
            ))
        })?;

        let versions = ProtocolVersion::negotiable(min, max);
        if versions.is_empty() {
            return Err(Error::NativeFailure {
                status: NativeStatus::ProtocolVersion,
                message: format!(
                    "no supported protocol version between {} and {}",
                    min.unwrap_or(ProtocolVersion::TLS10),
                    max.unwrap_or(ProtocolVersion::TLS13)
                ),
                verify: None,
            });
        }
        let provider = Arc::new(crypto::provider(ciphers.as_deref()));

        // Clients check servers for the ssl_server purpose and the reverse.
        let (preset, purpose) = match role {
            Role::Client => (VerifyParam::ssl_server()?, Purpose::SslServer),
            Role::Server => (VerifyParam::ssl_client()?, Purpose::SslClient),
        };
        let param = match base_param {
            Some(param) => {
                let param = param.copy()?;
                if param.purpose()?.is_none() {
                    param.set_purpose(purpose)?;
                }
                param
            }
            None => preset.copy()?,
        };
        if role == Role::Client {
            if let Some(host) = &self.server_name {
                param.set_host(host)?;
            }
        }

        let verifier = Arc::new(PeerVerifier::new(
            store,
            param,
            callback,
            mode,
            Arc::clone(&self.report),
            Arc::clone(&provider),
        ));
        let local_chain = self.local_chain()?;

        match role {
            Role::Client => {
                let builder = ClientConfig::builder_with_provider(provider)
                    .with_protocol_versions(&versions)
                    .map_err(|e| Error::native(&e))?
                    .dangerous()
                    .with_custom_certificate_verifier(verifier);
                let config = match (local_chain, &self.private_key) {
                    (Some(chain), Some(key)) => builder
                        .with_client_auth_cert(chain, key.to_rustls()?)
                        .map_err(|e| Error::native(&e))?,
                    _ => builder.with_no_client_auth(),
                };
                let name = match &self.server_name {
                    Some(host) => ServerName::try_from(host.clone()).map_err(|e| {
                        Error::InvalidArgument(format!("server name {host:?}: {e}"))
                    })?,
                    None => ServerName::IpAddress(IpAddr::V4(Ipv4Addr::UNSPECIFIED).into()),
                };
                ClientConnection::new(Arc::new(config), name)
                    .map(Connection::Client)
                    .map_err(|e| Error::native(&e))
            }
            Role::Server => {
                let (Some(chain), Some(key), Some(leaf)) =
                    (local_chain, &self.private_key, &self.certificate)
                else {
                    return Err(Error::state(
                        "a server session needs a certificate and a private key",
                    ));
                };
                if let Ok(false) = key.matches_certificate(leaf) {
                    return Err(Error::InvalidArgument(
                        "private key does not match the certificate".to_string(),
                    ));
                }
                let builder = ServerConfig::builder_with_provider(provider)
                    .with_protocol_versions(&versions)
                    .map_err(|e| Error::native(&e))?;
                let builder = if mode == VerifyMode::None {
                    builder.with_no_client_auth()
                } else {
                    builder.with_client_cert_verifier(verifier)
                };
                let config = builder
                    .with_single_cert(chain, key.to_rustls()?)
                    .map_err(|e| Error::native(&e))?;
                ServerConnection::new(Arc::new(config))
                    .map(Connection::Server)
                    .map_err(|e| Error::native(&e))
            }
        }
    }

    fn process_handshake(&mut self) -> Result<HandshakeStatus> {
        match self.state {
            SessionState::Established => return Ok(HandshakeStatus::Complete),
            SessionState::New => return Err(Error::state("handshake has not been started")),
            SessionState::Closed | SessionState::Faulted => {
                return Err(Error::state("session is closed"))
            }
            _ => {}
        }

        let status = match self.pump_handshake() {
            Ok(status) => status,
            Err(error) => return Err(self.handshake_failure(error)),
        };
        self.transition(SessionState::Negotiating);
        if status == HandshakeStatus::Complete {
            self.transition(SessionState::Established);
            tracing::info!(
                "{} handshake complete: {} {}",
                self.role.map_or("session".to_string(), |role| role.to_string()),
                self.version()?,
                self.cipher()?
            );
        }
        Ok(status)
    }

    fn pump_handshake(&mut self) -> Result<HandshakeStatus> {
        let max_steps = EngineConfig::global().max_handshake_steps.max(1);
        let (connection, bio) = self.io()?;
        let mut io = IoAdapter(bio);

        for _ in 0..max_steps {
            if !connection.is_handshaking() {
                // Final flight and session tickets; the peer may already be gone.
                match flush_records(connection, &mut io) {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!("post-handshake records left queued"),
                    Err(e) => tracing::debug!("post-handshake records not sent: {}", e),
                }
                return Ok(HandshakeStatus::Complete);
            }
            if !flush_records(connection, &mut io)? {
                return Ok(HandshakeStatus::WantWrite);
            }
            if !connection.wants_read() {
                break;
            }
            match connection.read_tls(&mut io) {
                Ok(0) => {
                    return Err(Error::NativeFailure {
                        status: NativeStatus::UnexpectedEof,
                        message: "transport closed during the handshake".to_string(),
                        verify: None,
                    })
                }
                Ok(n) => tracing::trace!("read {} handshake bytes", n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(HandshakeStatus::WantRead),
                Err(e) => return Err(e.into()),
            }
            if let Err(e) = connection.process_new_packets() {
                if let Err(flush) = flush_records(connection, &mut io) {
                    tracing::trace!("could not send the alert: {}", flush);
                }
                return Err(Error::native(&e));
            }
        }
        Ok(HandshakeStatus::WantRead)
    }

    /// Attach verification details or a callback panic to a handshake error.
    fn handshake_failure(&self, error: Error) -> Error {
        let mut report = lock_report(&self.report);
        if let Some(panic) = report.panic.take() {
            return panic;
        }
        match error {
            Error::NativeFailure {
                status: NativeStatus::BadCertificate,
                message,
                verify: None,
            } => Error::NativeFailure {
                status: NativeStatus::BadCertificate,
                message,
                verify: report.failure.clone(),
            },
            other => other,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.require_established()?;
        let (connection, bio) = self.io()?;
        let mut io = IoAdapter(bio);
        loop {
            match connection.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    tracing::debug!("peer closed the transport without close_notify");
                    return Ok(0);
                }
                Err(e) => return Err(e.into()),
            }
            match connection.read_tls(&mut io)? {
                0 => tracing::trace!("transport reached end of stream"),
                n => tracing::trace!("read {} record bytes", n),
            }
            if let Err(e) = connection.process_new_packets() {
                if let Err(flush) = flush_records(connection, &mut io) {
                    tracing::trace!("could not send the alert: {}", flush);
                }
                return Err(Error::native(&e));
            }
            // Post-handshake messages may need an answer.
            flush_records(connection, &mut io)?;
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.require_established()?;
        let (connection, bio) = self.io()?;
        let n = connection.writer().write(buf)?;
        flush_records(connection, &mut IoAdapter(bio))?;
        Ok(n)
    }
}

/// Write queued records. Returns `false` if the transport would block.
fn flush_records(connection: &mut Connection, io: &mut IoAdapter<'_>) -> Result<bool> {
    while connection.wants_write() {
        match connection.write_tls(io) {
            Ok(0) => return Ok(false),
            Ok(n) => tracing::trace!("wrote {} record bytes", n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e.into()),
        }
    }
    match io.0.flush() {
        Ok(()) => Ok(true),
        Err(Error::WouldBlock) => Ok(false),
        Err(e) => Err(e),
    }
}

fn lock(data: &Mutex<SessionData>) -> MutexGuard<'_, SessionData> {
    match data.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
