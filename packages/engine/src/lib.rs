//! # Tessera engine
//!
//! TLS handshake engine with pluggable X.509 chain verification.
//!
//! - **BIO transports**: in-memory pairs, wrapped streams and callback-driven
//!   I/O ([`bio`])
//! - **X.509 model** over DER/PEM certificates, names, keys, CRLs and PKCS#12
//!   containers ([`x509`])
//! - **Trust stores** with file, hashed-directory and callback lookups
//!   ([`store`])
//! - **Chain verification** with OpenSSL-compatible error codes, purposes and
//!   host checks ([`verify`])
//! - **TLS sessions** on rustls, driven one step at a time over a BIO
//!   ([`ssl`])
//!
//! Every resource type wraps a [`handle::Handle`]: `close()` is idempotent and
//! a closed object reports [`Error::InvalidHandle`] instead of panicking.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod bio;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handle;
pub mod registry;
pub mod ssl;
pub mod store;
pub mod verify;
pub mod x509;

pub use bio::{Bio, BioCallbacks, CallbackBio, CallbackIo, MemoryBio, StreamBio};
pub use config::{EngineConfig, NameHashAlgorithm};
pub use error::{Error, NativeStatus, Result, VerifyFailure};
pub use ssl::{
    CipherSuite, ConnectionInfo, HandshakeStatus, ProtocolVersion, Role, SessionState,
    SslContext, SslSession, VerifyMode,
};
pub use store::{CertificateStore, FileType, Lookup, LookupCallback, LookupMethod};
pub use verify::{
    StoreContext, VerifyCallback, VerifyErrorCode, VerifyFlags, VerifyParam,
};
pub use x509::{
    Certificate, CertificateChain, Crl, DistinguishedName, PrivateKey, Pkcs12, X509Format,
};
