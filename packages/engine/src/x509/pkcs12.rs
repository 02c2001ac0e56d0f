//! PKCS#12 containers

use std::sync::RwLock;

use p12::PFX;

use super::{Certificate, PrivateKey, X509Format};
use crate::error::{Error, Result};
use crate::handle::Handle;

#[derive(Default)]
struct Contents {
    certificates: Vec<Certificate>,
    private_key: Option<PrivateKey>,
}

/// Certificates and an optional private key imported from a PKCS#12 blob.
#[derive(Clone)]
pub struct Pkcs12 {
    handle: Handle<RwLock<Contents>>,
}

impl Pkcs12 {
    pub fn new() -> Self {
        Self {
            handle: Handle::new("pkcs12", RwLock::new(Contents::default())),
        }
    }

    /// Decode `blob` and append its certificates and key.
    ///
    /// A malformed container is a parse error; a container whose integrity
    /// check fails under `password` is a decryption error.
    pub fn import(&self, blob: &[u8], password: &str) -> Result<()> {
        let pfx = PFX::parse(blob).map_err(|e| Error::parse("PKCS#12 container", format!("{e:?}")))?;
        if !pfx.verify_mac(password) {
            return Err(Error::Decryption(
                "PKCS#12 integrity check failed; wrong password?".to_string(),
            ));
        }
        let cert_bags = pfx
            .cert_x509_bags(password)
            .map_err(|e| Error::Decryption(format!("certificate bags: {e:?}")))?;
        let key_bags = pfx
            .key_bags(password)
            .map_err(|e| Error::Decryption(format!("key bags: {e:?}")))?;

        let certificates = cert_bags
            .iter()
            .map(|der| Certificate::load_from_data(der, X509Format::Der))
            .collect::<Result<Vec<_>>>()?;
        let private_key = key_bags
            .first()
            .map(|der| PrivateKey::from_pkcs8_der(der))
            .transpose()?;

        tracing::debug!(
            "imported PKCS#12 with {} certificates and {} keys",
            certificates.len(),
            key_bags.len()
        );
        self.handle.with(|contents| {
            let mut contents = contents
                .write()
                .map_err(|_| Error::state("pkcs12 lock poisoned"))?;
            contents.certificates.extend(certificates);
            if private_key.is_some() {
                contents.private_key = private_key;
            }
            Ok(())
        })
    }

    /// Build a password-protected container holding `certificate` and `key`.
    pub fn export(
        certificate: &Certificate,
        key: &PrivateKey,
        password: &str,
        friendly_name: &str,
    ) -> Result<Vec<u8>> {
        let cert_der = certificate.raw_data(X509Format::Der)?;
        let key_der = key.pkcs8_der()?;
        PFX::new(&cert_der, &key_der, None, password, friendly_name)
            .map(|pfx| pfx.to_der())
            .ok_or_else(|| Error::parse("PKCS#12 container", "encoding failed"))
    }

    pub fn count(&self) -> Result<usize> {
        self.read(|contents| Ok(contents.certificates.len()))
    }

    pub fn get_certificate(&self, index: usize) -> Result<Certificate> {
        self.read(|contents| {
            contents
                .certificates
                .get(index)
                .cloned()
                .ok_or(Error::IndexOutOfRange {
                    index,
                    count: contents.certificates.len(),
                })
        })
    }

    pub fn add_certificate(&self, certificate: &Certificate) -> Result<()> {
        self.handle.with(|contents| {
            contents
                .write()
                .map_err(|_| Error::state("pkcs12 lock poisoned"))?
                .certificates
                .push(certificate.clone());
            Ok(())
        })
    }

    pub fn has_private_key(&self) -> Result<bool> {
        self.read(|contents| Ok(contents.private_key.is_some()))
    }

    pub fn get_private_key(&self) -> Result<PrivateKey> {
        self.read(|contents| {
            contents
                .private_key
                .clone()
                .ok_or_else(|| Error::state("PKCS#12 container has no private key"))
        })
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn close(&self) {
        self.handle.release();
    }

    fn read<R>(&self, op: impl FnOnce(&Contents) -> Result<R>) -> Result<R> {
        self.handle.with(|contents| {
            let contents = contents
                .read()
                .map_err(|_| Error::state("pkcs12 lock poisoned"))?;
            op(&contents)
        })
    }
}

impl Default for Pkcs12 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_container_is_a_parse_error() {
        let pkcs12 = Pkcs12::new();
        assert!(matches!(
            pkcs12.import(b"\x30\x03\x02\x01", "secret"),
            Err(Error::Parse { .. })
        ));
        assert_eq!(pkcs12.count().unwrap(), 0);
    }

    #[test]
    fn empty_container_has_no_key() {
        let pkcs12 = Pkcs12::new();
        assert!(!pkcs12.has_private_key().unwrap());
        assert!(matches!(pkcs12.get_private_key(), Err(Error::InvalidState(_))));
        assert!(matches!(
            pkcs12.get_certificate(0),
            Err(Error::IndexOutOfRange { index: 0, count: 0 })
        ));
        pkcs12.close();
        assert!(matches!(pkcs12.count(), Err(Error::InvalidHandle("pkcs12"))));
    }
}
