//! Private keys

use std::fmt;

use rustls::pki_types::{PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::Certificate;
use crate::crypto;
use crate::error::{Error, Result};
use crate::handle::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEncoding {
    Pkcs8,
    Pkcs1,
    Sec1,
}

/// Key bytes that are wiped when the last reference goes away.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SecureKeyMaterial {
    data: Vec<u8>,
    #[zeroize(skip)]
    encoding: KeyEncoding,
}

#[derive(Clone)]
pub struct PrivateKey {
    handle: Handle<SecureKeyMaterial>,
}

impl PrivateKey {
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        Ok(Self::new(der.to_vec(), KeyEncoding::Pkcs8))
    }

    /// First private key block of a PEM document (PKCS#8, PKCS#1 or SEC1).
    pub fn from_pem(data: &[u8]) -> Result<Self> {
        let mut reader = data;
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|e| Error::parse("PEM private key", e))?
            .ok_or_else(|| Error::parse("PEM private key", "no private key block"))?;
        Ok(Self::from_rustls(key))
    }

    pub(crate) fn from_rustls(key: PrivateKeyDer<'_>) -> Self {
        match key {
            PrivateKeyDer::Pkcs1(key) => Self::new(key.secret_pkcs1_der().to_vec(), KeyEncoding::Pkcs1),
            PrivateKeyDer::Sec1(key) => Self::new(key.secret_sec1_der().to_vec(), KeyEncoding::Sec1),
            other => Self::new(other.secret_der().to_vec(), KeyEncoding::Pkcs8),
        }
    }

    fn new(data: Vec<u8>, encoding: KeyEncoding) -> Self {
        Self {
            handle: Handle::new("private key", SecureKeyMaterial { data, encoding }),
        }
    }

    pub fn encoding(&self) -> Result<KeyEncoding> {
        self.handle.with(|key| Ok(key.encoding))
    }

    pub(crate) fn to_rustls(&self) -> Result<PrivateKeyDer<'static>> {
        self.handle.with(|key| {
            let bytes = key.data.clone();
            Ok(match key.encoding {
                KeyEncoding::Pkcs8 => PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(bytes)),
                KeyEncoding::Pkcs1 => PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(bytes)),
                KeyEncoding::Sec1 => PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(bytes)),
            })
        })
    }

    /// PKCS#8 bytes, as stored in PKCS#12 containers.
    pub(crate) fn pkcs8_der(&self) -> Result<Vec<u8>> {
        self.handle.with(|key| match key.encoding {
            KeyEncoding::Pkcs8 => Ok(key.data.clone()),
            other => Err(Error::NotSupported(format!(
                "{other:?} keys cannot be exported as PKCS#8"
            ))),
        })
    }

    /// Whether this key pairs with the certificate's public key.
    pub fn matches_certificate(&self, certificate: &Certificate) -> Result<bool> {
        let public_key = certificate.public_key_data()?;
        crypto::key_matches_public_key(self.to_rustls()?, &public_key)
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn close(&self) {
        self.handle.release();
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("encoding", &self.encoding().ok())
            .finish_non_exhaustive()
    }
}
