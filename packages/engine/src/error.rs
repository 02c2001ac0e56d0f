//! Engine error types

use std::fmt;
use std::sync::Arc;

use crate::verify::VerifyErrorCode;
use crate::x509::Certificate;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failure reported by the TLS state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeStatus {
    /// No protocol version acceptable to both sides.
    ProtocolVersion,
    /// Parameters could not be negotiated (cipher suites, groups, extensions).
    HandshakeFailure,
    /// The peer certificate was rejected.
    BadCertificate,
    /// A record or handshake message failed to authenticate.
    DecryptError,
    /// The transport ended in the middle of the handshake.
    UnexpectedEof,
    /// The peer sent a fatal alert with this description code.
    AlertReceived(u8),
    /// The peer violated the protocol.
    PeerMisbehaved,
    /// Local configuration was rejected by the engine.
    Configuration,
    Other,
}

impl NativeStatus {
    /// Classify an error raised by rustls.
    pub fn from_rustls(error: &rustls::Error) -> Self {
        use rustls::{AlertDescription, Error as E, PeerIncompatible};

        match error {
            E::AlertReceived(AlertDescription::ProtocolVersion) => Self::ProtocolVersion,
            E::AlertReceived(AlertDescription::HandshakeFailure) => Self::HandshakeFailure,
            E::AlertReceived(AlertDescription::BadCertificate)
            | E::AlertReceived(AlertDescription::UnknownCA)
            | E::AlertReceived(AlertDescription::CertificateExpired)
            | E::AlertReceived(AlertDescription::CertificateRevoked)
            | E::AlertReceived(AlertDescription::CertificateUnknown) => Self::BadCertificate,
            E::AlertReceived(description) => Self::AlertReceived(u8::from(*description)),
            E::PeerIncompatible(PeerIncompatible::NoCipherSuitesInCommon) => {
                Self::HandshakeFailure
            }
            E::PeerIncompatible(PeerIncompatible::NoKxGroupsInCommon)
            | E::PeerIncompatible(PeerIncompatible::NoSignatureSchemesInCommon) => {
                Self::HandshakeFailure
            }
            E::PeerIncompatible(_) => Self::ProtocolVersion,
            E::InvalidCertificate(_) | E::NoCertificatesPresented => Self::BadCertificate,
            E::DecryptError => Self::DecryptError,
            E::PeerMisbehaved(_) | E::InappropriateMessage { .. }
            | E::InappropriateHandshakeMessage { .. } | E::InvalidMessage(_) => {
                Self::PeerMisbehaved
            }
            E::General(_) => Self::Configuration,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolVersion => f.write_str("protocol version"),
            Self::HandshakeFailure => f.write_str("handshake failure"),
            Self::BadCertificate => f.write_str("bad certificate"),
            Self::DecryptError => f.write_str("decrypt error"),
            Self::UnexpectedEof => f.write_str("unexpected end of stream"),
            Self::AlertReceived(code) => write!(f, "alert {code} received"),
            Self::PeerMisbehaved => f.write_str("peer misbehaved"),
            Self::Configuration => f.write_str("configuration rejected"),
            Self::Other => f.write_str("engine error"),
        }
    }
}

/// Details of a failed chain verification.
#[derive(Clone)]
pub struct VerifyFailure {
    pub code: VerifyErrorCode,
    /// Position in the chain of the failing certificate (0 = leaf).
    pub depth: usize,
    pub certificate: Option<Certificate>,
}

impl fmt::Debug for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyFailure")
            .field("code", &self.code)
            .field("depth", &self.depth)
            .field(
                "certificate",
                &self
                    .certificate
                    .as_ref()
                    .and_then(|cert| cert.subject_name_string().ok()),
            )
            .finish()
    }
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (error {}) at depth {}",
            self.code.message(),
            self.code.code(),
            self.depth
        )
    }
}

/// Engine error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("operation on a released {0} handle")]
    InvalidHandle(&'static str),
    #[error("failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("operation would block")]
    WouldBlock,
    #[error("certificate verification failed: {0}")]
    VerificationFailed(VerifyFailure),
    #[error("TLS engine failure ({status}): {message}{}", verify_suffix(.verify))]
    NativeFailure {
        status: NativeStatus,
        message: String,
        verify: Option<VerifyFailure>,
    },
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("index {index} out of range ({count} entries)")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("callback panicked: {0}")]
    CallbackPanic(String),
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl Error {
    pub(crate) fn parse(what: &'static str, reason: impl fmt::Display) -> Self {
        Self::Parse {
            what,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub(crate) fn native(error: &rustls::Error) -> Self {
        Self::NativeFailure {
            status: NativeStatus::from_rustls(error),
            message: error.to_string(),
            verify: None,
        }
    }

    /// Whether the operation can be retried once the transport makes progress.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }

    /// Whether the error leaves a session permanently unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NativeFailure { .. }
                | Self::VerificationFailed(_)
                | Self::CallbackPanic(_)
                | Self::Io(_)
        )
    }

    /// Native status for engine failures.
    pub fn native_status(&self) -> Option<NativeStatus> {
        match self {
            Self::NativeFailure { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Verification details, whether raised directly or carried by a handshake failure.
    pub fn verify_failure(&self) -> Option<&VerifyFailure> {
        match self {
            Self::VerificationFailed(failure) => Some(failure),
            Self::NativeFailure { verify, .. } => verify.as_ref(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::WouldBlock {
            Self::WouldBlock
        } else if let Some(inner) = error.get_ref().and_then(|e| e.downcast_ref::<Error>()) {
            // Engine errors that crossed an io::Read/io::Write boundary.
            inner.clone()
        } else {
            Self::Io(Arc::new(error))
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::WouldBlock => std::io::ErrorKind::WouldBlock.into(),
            Error::Io(inner) => std::io::Error::new(inner.kind(), inner.to_string()),
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

fn verify_suffix(verify: &Option<VerifyFailure>) -> String {
    verify
        .as_ref()
        .map(|failure| format!("; {failure}"))
        .unwrap_or_default()
}

/// Render a panic payload caught at a callback boundary.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
