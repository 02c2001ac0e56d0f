//! Tessera public API
//!
//! Drives [`tessera_engine`] sessions over real transports: [`TlsSettings`]
//! describes one side of a connection, [`TlsConnection`] runs the
//! suspend-and-retry handshake over any BIO, and [`TlsStream`] /
//! [`AsyncTlsStream`] wrap blocking and tokio transports.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod async_io;
pub mod connection;
pub mod settings;
pub mod stream;

pub use async_io::AsyncTlsStream;
pub use connection::TlsConnection;
pub use settings::{
    CertificateValidator, ClientCertificates, Identity, TlsSettings, TrustSource, Validation,
};
pub use stream::TlsStream;

// Engine types that appear in this crate's signatures
pub use tessera_engine::{
    Certificate, CertificateChain, CipherSuite, ConnectionInfo, Error, NativeStatus, PrivateKey,
    ProtocolVersion, Result, Role, VerifyErrorCode, VerifyFailure,
};

/// Direct access to the engine for lower-level control.
pub use tessera_engine as engine;
