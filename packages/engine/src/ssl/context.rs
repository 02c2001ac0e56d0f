//! Shared TLS configuration

use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::cipher::CipherSuite;
use super::version::ProtocolVersion;
use crate::bio::Bio;
use crate::crypto;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::store::CertificateStore;
use crate::verify::{VerifyCallback, VerifyParam};

/// Peer certificate policy, numbered like OpenSSL's `SSL_VERIFY_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VerifyMode {
    /// Clients still verify and record the result but never abort the
    /// handshake on it; servers do not request a client certificate.
    None,
    /// Abort on a failed verification; servers request but do not require
    /// a client certificate.
    #[default]
    Peer,
    /// Like `Peer`, and servers refuse clients without a certificate.
    PeerRequireCertificate,
}

impl VerifyMode {
    pub fn code(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Peer => 1,
            Self::PeerRequireCertificate => 3,
        }
    }
}

pub(crate) struct ContextData {
    pub store: CertificateStore,
    pub min_version: Option<ProtocolVersion>,
    pub max_version: Option<ProtocolVersion>,
    pub ciphers: Option<Vec<u16>>,
    pub verify_callback: Option<VerifyCallback>,
    pub verify_mode: VerifyMode,
    pub verify_param: Option<VerifyParam>,
    pub debug_bio: Option<Arc<Mutex<Bio>>>,
}

/// Configuration shared by every session created from it.
///
/// Clones share the same configuration. Changes affect sessions that start
/// their handshake afterwards.
#[derive(Clone)]
pub struct SslContext {
    handle: Handle<RwLock<ContextData>>,
}

impl SslContext {
    pub fn new() -> Self {
        Self {
            handle: Handle::new(
                "ssl context",
                RwLock::new(ContextData {
                    store: CertificateStore::new(),
                    min_version: None,
                    max_version: None,
                    ciphers: None,
                    verify_callback: None,
                    verify_mode: VerifyMode::default(),
                    verify_param: None,
                    debug_bio: None,
                }),
            ),
        }
    }

    pub(crate) fn read<R>(&self, op: impl FnOnce(&ContextData) -> Result<R>) -> Result<R> {
        self.handle.with(|data| op(&read_data(data)))
    }

    fn write<R>(&self, op: impl FnOnce(&mut ContextData) -> Result<R>) -> Result<R> {
        self.handle.with(|data| op(&mut write_data(data)))
    }

    /// The trust store used to verify peers. Shared, not copied.
    pub fn certificate_store(&self) -> Result<CertificateStore> {
        self.read(|data| Ok(data.store.clone()))
    }

    pub fn set_min_version(&self, version: ProtocolVersion) -> Result<()> {
        self.write(|data| {
            data.min_version = Some(version);
            Ok(())
        })
    }

    pub fn set_max_version(&self, version: ProtocolVersion) -> Result<()> {
        self.write(|data| {
            data.max_version = Some(version);
            Ok(())
        })
    }

    pub fn min_version(&self) -> Result<Option<ProtocolVersion>> {
        self.read(|data| Ok(data.min_version))
    }

    pub fn max_version(&self) -> Result<Option<ProtocolVersion>> {
        self.read(|data| Ok(data.max_version))
    }

    pub fn is_cipher_supported(code: u16) -> bool {
        CipherSuite(code).is_supported()
    }

    /// Restrict negotiation to `codes`, keeping their order.
    ///
    /// Unsupported codes are an error unless `allow_unsupported` is set, in
    /// which case they are dropped. Returns how many suites were kept.
    pub fn set_ciphers(&self, codes: &[u16], allow_unsupported: bool) -> Result<usize> {
        let (supported, unsupported): (Vec<u16>, Vec<u16>) =
            codes.iter().partition(|code| Self::is_cipher_supported(**code));
        if !unsupported.is_empty() {
            if !allow_unsupported {
                return Err(Error::NotSupported(format!(
                    "cipher suites {}",
                    unsupported
                        .iter()
                        .map(|code| format!("{code:#06x}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
            tracing::debug!("dropping {} unsupported cipher suites", unsupported.len());
        }
        if supported.is_empty() {
            return Err(Error::InvalidArgument(
                "no supported cipher suite in the list".to_string(),
            ));
        }
        let kept = supported.len();
        self.write(|data| {
            data.ciphers = Some(supported);
            Ok(kept)
        })
    }

    /// Configured cipher suites, or every supported suite when unrestricted.
    pub fn ciphers(&self) -> Result<Vec<u16>> {
        self.read(|data| {
            Ok(data
                .ciphers
                .clone()
                .unwrap_or_else(crypto::supported_cipher_suites))
        })
    }

    pub fn set_verify_callback(&self, callback: Option<VerifyCallback>) -> Result<()> {
        self.write(|data| {
            data.verify_callback = callback;
            Ok(())
        })
    }

    pub fn set_verify_mode(&self, mode: VerifyMode) -> Result<()> {
        self.write(|data| {
            data.verify_mode = mode;
            Ok(())
        })
    }

    pub fn verify_mode(&self) -> Result<VerifyMode> {
        self.read(|data| Ok(data.verify_mode))
    }

    /// Base parameters for peer verification. A private copy is kept.
    pub fn set_verify_param(&self, param: &VerifyParam) -> Result<()> {
        let copy = param.copy()?;
        self.write(|data| {
            data.verify_param = Some(copy);
            Ok(())
        })
    }

    /// Receive a line for every session state transition.
    pub fn set_debug_bio(&self, bio: Option<Bio>) -> Result<()> {
        self.write(|data| {
            data.debug_bio = bio.map(|bio| Arc::new(Mutex::new(bio)));
            Ok(())
        })
    }

    pub(crate) fn debug_line(&self, line: &str) {
        let Ok(Some(bio)) = self.read(|data| Ok(data.debug_bio.clone())) else {
            return;
        };
        let mut bio = match bio.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut text = String::with_capacity(line.len() + 1);
        text.push_str(line);
        text.push('\n');
        if let Err(e) = bio.write_all(text.as_bytes()) {
            tracing::trace!("debug bio write failed: {}", e);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn close(&self) {
        self.handle.release();
    }
}

impl Default for SslContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SslContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("SslContext");
        let _ = self.read(|data| {
            out.field("min_version", &data.min_version)
                .field("max_version", &data.max_version)
                .field("verify_mode", &data.verify_mode)
                .field("has_verify_callback", &data.verify_callback.is_some());
            Ok(())
        });
        out.finish()
    }
}

fn read_data(data: &RwLock<ContextData>) -> RwLockReadGuard<'_, ContextData> {
    match data.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_data(data: &RwLock<ContextData>) -> RwLockWriteGuard<'_, ContextData> {
    match data.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
