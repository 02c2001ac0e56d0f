use super::cipher::CipherSuite;
use super::version::ProtocolVersion;
use crate::x509::{Certificate, CertificateChain};

/// Which end of the connection a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// Result of one handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStatus {
    Complete,
    /// More bytes must arrive from the peer before the next step.
    WantRead,
    /// The transport did not accept everything; retry once it drains.
    WantWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    New,
    ClientConnecting,
    ServerAccepting,
    Negotiating,
    Established,
    Faulted,
    Closed,
}

/// Negotiated parameters of an established session.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub role: Role,
    pub protocol_version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub server_name: Option<String>,
    pub peer_certificate: Option<Certificate>,
    pub peer_chain: CertificateChain,
    /// The peer chain was verified, or a verify callback accepted it.
    pub peer_verified: bool,
}
