//! Connection settings and the fluent builder that produces them
//!
//! [`TlsSettings`] is a plain value: build it once and hand it to any number
//! of connections. Each connection turns it into a fresh engine context.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tessera_engine::{
    Certificate, CertificateChain, FileType, LookupMethod, Pkcs12, PrivateKey, ProtocolVersion,
    Result, Role, SslContext, StoreContext, VerifyErrorCode, VerifyMode,
};

/// Where peer certificates are anchored.
#[derive(Clone, Default)]
pub enum TrustSource {
    /// The configured system directory plus the platform's native roots.
    #[default]
    System,
    /// A `{hash:08x}.N` directory searched on demand.
    HashedDirectory(PathBuf),
    /// An explicit set of trust anchors.
    Certificates(Vec<Certificate>),
    /// Nothing is trusted; only a validator can accept a chain.
    Empty,
}

/// Whether a server asks connecting clients for a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientCertificates {
    #[default]
    Ignore,
    /// Request one and verify it when presented.
    Request,
    /// Fail the handshake when none is presented.
    Require,
}

impl ClientCertificates {
    fn verify_mode(self) -> VerifyMode {
        match self {
            Self::Ignore => VerifyMode::None,
            Self::Request => VerifyMode::Peer,
            Self::Require => VerifyMode::PeerRequireCertificate,
        }
    }
}

/// Certificate, issuing chain and private key presented to the peer.
#[derive(Clone)]
pub struct Identity {
    pub certificate: Certificate,
    pub chain: Vec<Certificate>,
    pub key: PrivateKey,
}

impl Identity {
    pub fn new(certificate: Certificate, chain: Vec<Certificate>, key: PrivateKey) -> Self {
        Self {
            certificate,
            chain,
            key,
        }
    }

    /// Load a PEM certificate bundle (leaf first) and a PEM private key.
    pub fn from_pem(certificates: &[u8], key: &[u8]) -> Result<Self> {
        let mut certificates = Certificate::load_all_pem(certificates)?.into_iter();
        let certificate = certificates.next().ok_or_else(|| {
            tessera_engine::Error::InvalidArgument("no certificate in PEM data".to_string())
        })?;
        Ok(Self::new(
            certificate,
            certificates.collect(),
            PrivateKey::from_pem(key)?,
        ))
    }

    /// Unpack a PKCS#12 archive whose first certificate matches its key.
    pub fn from_pkcs12(archive: &[u8], password: &str) -> Result<Self> {
        let pkcs12 = Pkcs12::new();
        pkcs12.import(archive, password)?;
        let key = pkcs12.get_private_key()?;

        let mut certificate = None;
        let mut chain = Vec::new();
        for index in 0..pkcs12.count()? {
            let candidate = pkcs12.get_certificate(index)?;
            if certificate.is_none() && key.matches_certificate(&candidate)? {
                certificate = Some(candidate);
            } else {
                chain.push(candidate);
            }
        }
        pkcs12.close();

        let certificate = certificate.ok_or_else(|| {
            tessera_engine::Error::InvalidArgument(
                "no certificate in the archive matches its private key".to_string(),
            )
        })?;
        Ok(Self::new(certificate, chain, key))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("certificate", &self.certificate.subject_name_string().ok())
            .field("chain", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Application check run on every verified peer chain.
///
/// Returning `true` accepts the chain, even one the store could not verify.
pub type CertificateValidator = Arc<dyn Fn(&Validation<'_>) -> bool + Send + Sync>;

/// What a [`CertificateValidator`] sees.
pub struct Validation<'a> {
    context: &'a StoreContext,
    target_host: Option<&'a str>,
    role: Role,
}

impl<'a> Validation<'a> {
    /// Whether the store verified the chain on its own.
    pub fn preverified(&self) -> bool {
        matches!(self.context.verify_result(), Ok(1))
    }

    /// Why the store rejected the chain, if it did.
    pub fn error(&self) -> Option<VerifyErrorCode> {
        self.context.error().ok().filter(|code| !code.is_ok())
    }

    /// The chain as built by the store, leaf first.
    pub fn chain(&self) -> CertificateChain {
        self.context.chain().unwrap_or_default()
    }

    pub fn target_host(&self) -> Option<&'a str> {
        self.target_host
    }

    /// The local role; a server validates client certificates.
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn context(&self) -> &'a StoreContext {
        self.context
    }
}

/// Settings for one side of a TLS connection.
#[derive(Clone, Default)]
pub struct TlsSettings {
    server: bool,
    target_host: Option<String>,
    min_version: Option<ProtocolVersion>,
    max_version: Option<ProtocolVersion>,
    ciphers: Option<Vec<u16>>,
    trust: TrustSource,
    identity: Option<Identity>,
    client_certificates: ClientCertificates,
    validator: Option<CertificateValidator>,
}

impl TlsSettings {
    /// Client settings verifying the server against `host`.
    #[must_use]
    pub fn client(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            target_host: (!host.is_empty()).then_some(host),
            ..Self::default()
        }
    }

    /// Server settings presenting `identity`.
    #[must_use]
    pub fn server(identity: Identity) -> Self {
        Self {
            server: true,
            identity: Some(identity),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn min_version(mut self, version: ProtocolVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    #[must_use]
    pub fn max_version(mut self, version: ProtocolVersion) -> Self {
        self.max_version = Some(version);
        self
    }

    /// Restrict the cipher suites to these IANA codes.
    #[must_use]
    pub fn ciphers(mut self, codes: &[u16]) -> Self {
        self.ciphers = Some(codes.to_vec());
        self
    }

    #[must_use]
    pub fn trust(mut self, source: TrustSource) -> Self {
        self.trust = source;
        self
    }

    /// Trust exactly these anchors.
    #[must_use]
    pub fn trust_certificates(self, anchors: impl IntoIterator<Item = Certificate>) -> Self {
        self.trust(TrustSource::Certificates(anchors.into_iter().collect()))
    }

    /// Certificate presented to the peer; for a client, used when the server asks.
    #[must_use]
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    #[must_use]
    pub fn client_certificates(mut self, mode: ClientCertificates) -> Self {
        self.client_certificates = mode;
        self
    }

    #[must_use]
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Validation<'_>) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn is_server(&self) -> bool {
        self.server
    }

    pub fn role(&self) -> Role {
        if self.server {
            Role::Server
        } else {
            Role::Client
        }
    }

    pub fn target_host(&self) -> Option<&str> {
        self.target_host.as_deref()
    }

    pub fn local_identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Build a fresh engine context from these settings.
    pub fn build_context(&self) -> Result<SslContext> {
        let context = SslContext::new();
        if let Some(version) = self.min_version {
            context.set_min_version(version)?;
        }
        if let Some(version) = self.max_version {
            context.set_max_version(version)?;
        }
        if let Some(codes) = &self.ciphers {
            context.set_ciphers(codes, false)?;
        }

        let store = context.certificate_store()?;
        match &self.trust {
            TrustSource::System => {
                let loaded = store.set_default_paths()?;
                tracing::debug!("loaded {} system trust anchors", loaded);
            }
            TrustSource::HashedDirectory(dir) => {
                store
                    .add_lookup(LookupMethod::hash_dir())?
                    .add_directory(dir, FileType::Default)?;
            }
            TrustSource::Certificates(anchors) => {
                for anchor in anchors {
                    store.add_certificate(anchor)?;
                }
            }
            TrustSource::Empty => {}
        }

        if self.server {
            context.set_verify_mode(self.client_certificates.verify_mode())?;
        }

        if let Some(validator) = &self.validator {
            let validator = Arc::clone(validator);
            let target_host = self.target_host.clone();
            let role = self.role();
            context.set_verify_callback(Some(Arc::new(move |store_context: &StoreContext| {
                validator(&Validation {
                    context: store_context,
                    target_host: target_host.as_deref(),
                    role,
                })
            })))?;
        }
        Ok(context)
    }
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("role", &self.role())
            .field("target_host", &self.target_host)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("ciphers", &self.ciphers)
            .field("identity", &self.identity)
            .field("client_certificates", &self.client_certificates)
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_the_context() {
        let settings = TlsSettings::client("example.com")
            .trust(TrustSource::Empty)
            .min_version(ProtocolVersion::TLS12)
            .max_version(ProtocolVersion::TLS12)
            .ciphers(&[0xc02f]);

        let context = settings.build_context().unwrap();
        assert_eq!(context.min_version().unwrap(), Some(ProtocolVersion::TLS12));
        assert_eq!(context.max_version().unwrap(), Some(ProtocolVersion::TLS12));
        assert_eq!(context.ciphers().unwrap(), vec![0xc02f]);
        assert_eq!(context.verify_mode().unwrap(), VerifyMode::Peer);
        assert_eq!(settings.target_host(), Some("example.com"));
        assert_eq!(settings.role(), Role::Client);
    }

    #[test]
    fn unknown_cipher_codes_are_rejected() {
        let settings = TlsSettings::client("example.com")
            .trust(TrustSource::Empty)
            .ciphers(&[0xfefe]);
        assert!(matches!(
            settings.build_context(),
            Err(tessera_engine::Error::NotSupported(_))
        ));
    }

    #[test]
    fn empty_host_means_no_target() {
        assert_eq!(TlsSettings::client("").target_host(), None);
    }
}
