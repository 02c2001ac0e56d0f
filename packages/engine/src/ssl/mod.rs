//! TLS contexts and sessions

mod cipher;
mod context;
mod info;
mod session;
mod verifier;
mod version;

pub use cipher::CipherSuite;
pub use context::{SslContext, VerifyMode};
pub use info::{ConnectionInfo, HandshakeStatus, Role, SessionState};
pub use session::SslSession;
pub use version::ProtocolVersion;
