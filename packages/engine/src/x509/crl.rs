//! Certificate revocation lists

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::revocation_list::CertificateRevocationList;

use super::name::{canonical_der, DistinguishedName};
use super::{Certificate, SerialStyle, X509Format};
use crate::error::{Error, Result};
use crate::handle::Handle;

/// One entry of a revocation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    /// Big-endian serial number without sign padding.
    pub serial: Vec<u8>,
    pub revocation_date: SystemTime,
}

pub(crate) struct CrlData {
    der: Vec<u8>,
    issuer: Range<usize>,
    pub(crate) issuer_canonical: Vec<u8>,
    version: u32,
    last_update: i64,
    next_update: Option<i64>,
    revoked: Vec<RevokedEntry>,
}

fn timestamp(seconds: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds.max(0).unsigned_abs())
}

impl CrlData {
    fn parse(der: Vec<u8>) -> Result<Self> {
        let mut data = Self::parse_fields(&der)?;
        data.der = der;
        Ok(data)
    }

    fn parse_fields(der: &[u8]) -> Result<Self> {
        let (_, crl) = CertificateRevocationList::from_der(der)
            .map_err(|e| Error::parse("CRL", e))?;

        let issuer_raw = crl.issuer().as_raw();
        let start = issuer_raw.as_ptr() as usize - der.as_ptr() as usize;

        let revoked = crl
            .iter_revoked_certificates()
            .map(|entry| RevokedEntry {
                serial: entry.user_certificate.to_bytes_be(),
                revocation_date: timestamp(entry.revocation_date.timestamp()),
            })
            .collect::<Vec<_>>();

        tracing::debug!("parsed CRL with {} revoked certificates", revoked.len());
        Ok(Self {
            der: Vec::new(),
            issuer: start..start + issuer_raw.len(),
            issuer_canonical: canonical_der(issuer_raw)?,
            version: crl.version().map_or(1, |v| v.0 + 1),
            last_update: crl.last_update().timestamp(),
            next_update: crl.next_update().map(|t| t.timestamp()),
            revoked,
        })
    }

    pub(crate) fn is_revoked(&self, serial: &[u8]) -> bool {
        self.revoked.iter().any(|entry| entry.serial == serial)
    }
}

/// A parsed X.509 CRL.
#[derive(Clone)]
pub struct Crl {
    handle: Handle<CrlData>,
}

impl Crl {
    pub fn load_from_data(data: &[u8], format: X509Format) -> Result<Self> {
        let der = match format {
            X509Format::Der => data.to_vec(),
            X509Format::Pem => {
                let block = pem::parse(data).map_err(|e| Error::parse("PEM CRL", e))?;
                if block.tag() != "X509 CRL" {
                    return Err(Error::parse(
                        "PEM CRL",
                        format!("unexpected {} block", block.tag()),
                    ));
                }
                block.into_contents()
            }
        };
        Ok(Self {
            handle: Handle::new("crl", CrlData::parse(der)?),
        })
    }

    pub(crate) fn data(&self) -> Result<Arc<CrlData>> {
        self.handle.get()
    }

    pub fn revoked_count(&self) -> Result<usize> {
        self.handle.with(|crl| Ok(crl.revoked.len()))
    }

    pub fn revoked(&self, index: usize) -> Result<RevokedEntry> {
        self.handle.with(|crl| {
            crl.revoked
                .get(index)
                .cloned()
                .ok_or(Error::IndexOutOfRange {
                    index,
                    count: crl.revoked.len(),
                })
        })
    }

    /// Entry for a big-endian serial number; leading zero octets are ignored.
    pub fn get_by_serial(&self, serial: &[u8]) -> Result<Option<RevokedEntry>> {
        let start = serial.iter().position(|&b| b != 0).unwrap_or(serial.len());
        let serial = &serial[start..];
        self.handle.with(|crl| {
            Ok(crl
                .revoked
                .iter()
                .find(|entry| {
                    let offset = entry.serial.iter().position(|&b| b != 0).unwrap_or(entry.serial.len());
                    &entry.serial[offset..] == serial
                })
                .cloned())
        })
    }

    pub fn get_by_cert(&self, certificate: &Certificate) -> Result<Option<RevokedEntry>> {
        self.get_by_serial(&certificate.serial_number(SerialStyle::Canonical)?)
    }

    pub fn last_update(&self) -> Result<SystemTime> {
        self.handle.with(|crl| Ok(timestamp(crl.last_update)))
    }

    pub fn next_update(&self) -> Result<Option<SystemTime>> {
        self.handle.with(|crl| Ok(crl.next_update.map(timestamp)))
    }

    /// One-based CRL version.
    pub fn version(&self) -> Result<u32> {
        self.handle.with(|crl| Ok(crl.version))
    }

    pub fn issuer_name(&self) -> Result<DistinguishedName> {
        self.handle
            .with(|crl| DistinguishedName::from_der(&crl.der[crl.issuer.clone()]))
    }

    /// Whether the CRL is signed by `issuer`.
    pub fn is_signed_by(&self, issuer: &Certificate) -> Result<bool> {
        let crl = self.data()?;
        let issuer = issuer.data()?;
        let (_, list) = CertificateRevocationList::from_der(&crl.der)
            .map_err(|e| Error::parse("CRL", e))?;
        let (_, cert) = X509Certificate::from_der(&issuer.der)
            .map_err(|e| Error::parse("certificate", e))?;
        Ok(list.verify_signature(cert.public_key()).is_ok())
    }

    pub fn raw_data(&self) -> Result<Vec<u8>> {
        self.handle.with(|crl| Ok(crl.der.clone()))
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn close(&self) {
        self.handle.release();
    }
}
