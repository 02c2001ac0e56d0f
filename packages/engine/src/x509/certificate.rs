//! X.509 certificates

use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use der::{Decode, Encode};
use rustls::pki_types::CertificateDer;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

use super::name::{canonical_der, DistinguishedName};
use super::X509Format;
use crate::crypto;
use crate::error::{Error, Result};
use crate::handle::Handle;

/// Byte order used when exposing serial numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialStyle {
    /// Big-endian magnitude without sign padding.
    Canonical,
    /// Two's-complement content octets, least significant byte first.
    Legacy,
}

/// Extended key usages relevant to TLS purpose checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendedKeyUsages {
    pub any: bool,
    pub server_auth: bool,
    pub client_auth: bool,
    pub email_protection: bool,
    pub code_signing: bool,
    pub time_stamping: bool,
    pub ocsp_signing: bool,
}

/// Key usage bits as numbered in RFC 5280 (bit 0 = digitalSignature).
pub mod key_usage {
    pub const DIGITAL_SIGNATURE: u16 = 1 << 0;
    pub const NON_REPUDIATION: u16 = 1 << 1;
    pub const KEY_ENCIPHERMENT: u16 = 1 << 2;
    pub const DATA_ENCIPHERMENT: u16 = 1 << 3;
    pub const KEY_AGREEMENT: u16 = 1 << 4;
    pub const KEY_CERT_SIGN: u16 = 1 << 5;
    pub const CRL_SIGN: u16 = 1 << 6;
}

pub(crate) struct CertData {
    pub(crate) der: Vec<u8>,
    pub(crate) subject: Range<usize>,
    pub(crate) issuer: Range<usize>,
    pub(crate) subject_canonical: Vec<u8>,
    pub(crate) issuer_canonical: Vec<u8>,
    pub(crate) fingerprint: [u8; 20],
    pub(crate) not_before: i64,
    pub(crate) not_after: i64,
    pub(crate) serial: Vec<u8>,
    pub(crate) version: u32,
    pub(crate) signature_algorithm: String,
    pub(crate) public_key_algorithm: String,
    pub(crate) public_key_parameters: Option<Vec<u8>>,
    pub(crate) public_key: Vec<u8>,
    pub(crate) spki: Vec<u8>,
    pub(crate) common_names: Vec<String>,
    pub(crate) dns_names: Vec<String>,
    pub(crate) ip_addresses: Vec<IpAddr>,
    pub(crate) basic_constraints: Option<(bool, Option<u32>)>,
    pub(crate) key_usage: Option<u16>,
    pub(crate) ext_key_usage: Option<ExtendedKeyUsages>,
}

fn offset_in(outer: &[u8], inner: &[u8]) -> Range<usize> {
    let start = inner.as_ptr() as usize - outer.as_ptr() as usize;
    start..start + inner.len()
}

impl CertData {
    fn parse(der: Vec<u8>) -> Result<Self> {
        let mut data = Self::parse_fields(&der)?;
        data.der = der;
        Ok(data)
    }

    fn parse_fields(der: &[u8]) -> Result<Self> {
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|e| Error::parse("certificate", e))?;

        let subject = offset_in(der, cert.subject().as_raw());
        let issuer = offset_in(der, cert.issuer().as_raw());
        let spki_raw = cert.public_key().raw;
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_raw)
            .map_err(|e| Error::parse("subject public key info", e))?;
        let public_key_parameters = match &spki.algorithm.parameters {
            Some(params) => Some(
                params
                    .to_der()
                    .map_err(|e| Error::parse("public key parameters", e))?,
            ),
            None => None,
        };

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                    GeneralName::IPAddress(bytes) => match bytes.len() {
                        4 => {
                            let octets: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
                            ip_addresses.push(IpAddr::from(octets));
                        }
                        16 => {
                            let mut octets = [0u8; 16];
                            octets.copy_from_slice(bytes);
                            ip_addresses.push(IpAddr::from(octets));
                        }
                        other => tracing::debug!("ignoring {}-byte IP address SAN", other),
                    },
                    _ => {}
                }
            }
        }

        let common_names = cert
            .subject()
            .iter_common_name()
            .filter_map(|cn| cn.as_str().ok().map(str::to_string))
            .collect();

        let basic_constraints = cert
            .basic_constraints()
            .ok()
            .flatten()
            .map(|ext| (ext.value.ca, ext.value.path_len_constraint));
        let key_usage = cert.key_usage().ok().flatten().map(|ext| ext.value.flags);
        let ext_key_usage = cert.extended_key_usage().ok().flatten().map(|ext| {
            let eku = ext.value;
            ExtendedKeyUsages {
                any: eku.any,
                server_auth: eku.server_auth,
                client_auth: eku.client_auth,
                email_protection: eku.email_protection,
                code_signing: eku.code_signing,
                time_stamping: eku.time_stamping,
                ocsp_signing: eku.ocsp_signing,
            }
        });

        Ok(Self {
            subject_canonical: canonical_der(cert.subject().as_raw())?,
            issuer_canonical: canonical_der(cert.issuer().as_raw())?,
            fingerprint: crypto::sha1(der),
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            serial: cert.raw_serial().to_vec(),
            version: cert.version().0 + 1,
            signature_algorithm: cert.signature_algorithm.algorithm.to_id_string(),
            public_key_algorithm: spki.algorithm.oid.to_string(),
            public_key_parameters,
            public_key: spki.subject_public_key.raw_bytes().to_vec(),
            spki: spki_raw.to_vec(),
            common_names,
            dns_names,
            ip_addresses,
            basic_constraints,
            key_usage,
            ext_key_usage,
            subject,
            issuer,
            der: Vec::new(),
        })
    }

    pub(crate) fn is_self_issued(&self) -> bool {
        self.subject_canonical == self.issuer_canonical
    }

    pub(crate) fn is_ca(&self) -> bool {
        matches!(self.basic_constraints, Some((true, _)))
    }
}

fn to_system_time(timestamp: i64) -> SystemTime {
    if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_secs(timestamp.unsigned_abs())
    }
}

/// A parsed X.509 certificate.
///
/// Cloning is cheap and yields an independent handle on the same parsed data.
#[derive(Clone)]
pub struct Certificate {
    handle: Handle<CertData>,
}

impl Certificate {
    pub fn load_from_data(data: &[u8], format: X509Format) -> Result<Self> {
        let der = match format {
            X509Format::Der => data.to_vec(),
            X509Format::Pem => {
                let mut reader = data;
                let first = rustls_pemfile::certs(&mut reader).next();
                match first {
                    Some(Ok(cert)) => cert.to_vec(),
                    Some(Err(e)) => return Err(Error::parse("PEM certificate", e)),
                    None => return Err(Error::parse("PEM certificate", "no CERTIFICATE block")),
                }
            }
        };
        Self::from_der(der)
    }

    /// Every certificate in a PEM bundle, in file order.
    pub fn load_all_pem(data: &[u8]) -> Result<Vec<Self>> {
        let mut reader = data;
        rustls_pemfile::certs(&mut reader)
            .map(|cert| {
                let cert = cert.map_err(|e| Error::parse("PEM certificate", e))?;
                Self::from_der(cert.to_vec())
            })
            .collect()
    }

    pub(crate) fn from_der(der: Vec<u8>) -> Result<Self> {
        Ok(Self {
            handle: Handle::new("certificate", CertData::parse(der)?),
        })
    }

    pub(crate) fn data(&self) -> Result<Arc<CertData>> {
        self.handle.get()
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn close(&self) {
        self.handle.release();
    }

    pub fn raw_data(&self, format: X509Format) -> Result<Vec<u8>> {
        self.handle.with(|cert| {
            Ok(match format {
                X509Format::Der => cert.der.clone(),
                X509Format::Pem => pem::encode(&pem::Pem::new("CERTIFICATE", cert.der.clone()))
                    .into_bytes(),
            })
        })
    }

    pub(crate) fn to_rustls(&self) -> Result<CertificateDer<'static>> {
        self.handle.with(|cert| Ok(CertificateDer::from(cert.der.clone())))
    }

    pub fn subject_name(&self) -> Result<DistinguishedName> {
        let cert = self.data()?;
        let range = cert.subject.clone();
        DistinguishedName::embedded(cert, range)
    }

    pub fn issuer_name(&self) -> Result<DistinguishedName> {
        let cert = self.data()?;
        let range = cert.issuer.clone();
        DistinguishedName::embedded(cert, range)
    }

    pub fn subject_name_string(&self) -> Result<String> {
        self.subject_name()?.to_oneline()
    }

    pub fn issuer_name_string(&self) -> Result<String> {
        self.issuer_name()?.to_oneline()
    }

    /// Subject hash used for hashed-directory file names.
    pub fn subject_name_hash(&self) -> Result<u32> {
        self.handle
            .with(|cert| Ok(super::name::hash_canonical(&cert.subject_canonical)))
    }

    /// SHA-1 digest of the DER encoding.
    pub fn cert_hash(&self) -> Result<[u8; 20]> {
        self.handle.with(|cert| Ok(cert.fingerprint))
    }

    /// `AA:BB:...` rendering of [`Certificate::cert_hash`].
    pub fn fingerprint_string(&self) -> Result<String> {
        let hash = self.cert_hash()?;
        Ok(hash
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join(":"))
    }

    pub fn not_before(&self) -> Result<SystemTime> {
        self.handle.with(|cert| Ok(to_system_time(cert.not_before)))
    }

    pub fn not_after(&self) -> Result<SystemTime> {
        self.handle.with(|cert| Ok(to_system_time(cert.not_after)))
    }

    pub fn serial_number(&self, style: SerialStyle) -> Result<Vec<u8>> {
        self.handle.with(|cert| {
            Ok(match style {
                SerialStyle::Canonical => {
                    let start = cert
                        .serial
                        .iter()
                        .position(|&b| b != 0)
                        .unwrap_or(cert.serial.len().saturating_sub(1));
                    cert.serial[start..].to_vec()
                }
                SerialStyle::Legacy => cert.serial.iter().rev().copied().collect(),
            })
        })
    }

    /// One-based X.509 version (3 for v3 certificates).
    pub fn version(&self) -> Result<u32> {
        self.handle.with(|cert| Ok(cert.version))
    }

    /// Dotted OID of the signature algorithm.
    pub fn signature_algorithm(&self) -> Result<String> {
        self.handle.with(|cert| Ok(cert.signature_algorithm.clone()))
    }

    /// Subject public key bits (the contents of the BIT STRING).
    pub fn public_key_data(&self) -> Result<Vec<u8>> {
        self.handle.with(|cert| Ok(cert.public_key.clone()))
    }

    /// Public key algorithm OID and key bits.
    pub fn public_key_asn1(&self) -> Result<(String, Vec<u8>)> {
        self.handle
            .with(|cert| Ok((cert.public_key_algorithm.clone(), cert.public_key.clone())))
    }

    /// DER encoding of the public key algorithm parameters, if any.
    pub fn public_key_parameters(&self) -> Result<Option<Vec<u8>>> {
        self.handle.with(|cert| Ok(cert.public_key_parameters.clone()))
    }

    /// Full DER SubjectPublicKeyInfo.
    pub fn subject_public_key_info(&self) -> Result<Vec<u8>> {
        self.handle.with(|cert| Ok(cert.spki.clone()))
    }

    pub fn subject_alt_dns_names(&self) -> Result<Vec<String>> {
        self.handle.with(|cert| Ok(cert.dns_names.clone()))
    }

    pub fn subject_alt_ips(&self) -> Result<Vec<IpAddr>> {
        self.handle.with(|cert| Ok(cert.ip_addresses.clone()))
    }

    pub fn is_ca(&self) -> Result<bool> {
        self.handle.with(|cert| Ok(cert.is_ca()))
    }

    /// Subject and issuer names are canonically equal.
    pub fn is_self_issued(&self) -> Result<bool> {
        self.handle.with(|cert| Ok(cert.is_self_issued()))
    }

    /// Self-issued and signed by its own key.
    pub fn is_self_signed(&self) -> Result<bool> {
        let cert = self.data()?;
        Ok(cert.is_self_issued() && crypto::verify_certificate_signature(&cert.der, &cert.der)?)
    }

    /// Whether `issuer`'s key produced this certificate's signature.
    pub fn is_signed_by(&self, issuer: &Certificate) -> Result<bool> {
        let cert = self.data()?;
        let issuer = issuer.data()?;
        crypto::verify_certificate_signature(&cert.der, &issuer.der)
    }

    /// Same encoded certificate.
    pub fn same_as(&self, other: &Certificate) -> Result<bool> {
        Ok(Self::compare(self, other)? == Ordering::Equal)
    }

    /// Total order over certificates: fingerprint first, then encoding.
    pub fn compare(a: &Certificate, b: &Certificate) -> Result<Ordering> {
        let a = a.data()?;
        let b = b.data()?;
        Ok(a.fingerprint
            .cmp(&b.fingerprint)
            .then_with(|| a.der.cmp(&b.der)))
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subject_name_string() {
            Ok(subject) => f.debug_struct("Certificate").field("subject", &subject).finish(),
            Err(_) => f.write_str("Certificate(<released>)"),
        }
    }
}
