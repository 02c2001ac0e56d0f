//! X.509 object model: certificates, names, keys, CRLs and PKCS#12 containers

mod certificate;
mod chain;
mod crl;
mod key;
mod name;
mod pkcs12;

pub use certificate::{key_usage, Certificate, ExtendedKeyUsages, SerialStyle};
pub use chain::CertificateChain;
pub use crl::{Crl, RevokedEntry};
pub use key::{KeyEncoding, PrivateKey};
pub use name::{DistinguishedName, NameEntryType};
pub use pkcs12::Pkcs12;

pub(crate) use certificate::CertData;

/// Encoding of certificate and CRL data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum X509Format {
    Der,
    Pem,
}
