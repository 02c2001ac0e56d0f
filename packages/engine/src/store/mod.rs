//! Trust store and certificate lookups
//!
//! A [`CertificateStore`] holds trust anchors, revocation lists and an ordered
//! list of [`Lookup`]s. It may be configured freely until the first
//! verification seals it; later mutations fail with `InvalidState`.

pub mod hashdir;
mod lookup;

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use hashdir::HashDirLookup;
pub use lookup::{
    CallbackLookup, CollectionLookup, FileLookup, Lookup, LookupCallback, LookupMethod,
    LookupSource,
};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::x509::{Certificate, Crl, DistinguishedName, X509Format};

/// Encoding of certificate files read by lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
    Pem,
    Der,
    /// PEM when the file contains an armor line, DER otherwise.
    #[default]
    Default,
}

pub(crate) fn read_certificate_file(path: &Path, file_type: FileType) -> Result<Vec<Certificate>> {
    let data = fs::read(path)?;
    let pem = match file_type {
        FileType::Pem => true,
        FileType::Der => false,
        FileType::Default => data.windows(11).any(|w| w == b"-----BEGIN ".as_slice()),
    };
    if pem {
        let certificates = Certificate::load_all_pem(&data)?;
        if certificates.is_empty() {
            return Err(Error::parse("certificate file", "no CERTIFICATE block"));
        }
        Ok(certificates)
    } else {
        Ok(vec![Certificate::load_from_data(&data, X509Format::Der)?])
    }
}

struct StoreInner {
    anchors: RwLock<Vec<Certificate>>,
    crls: RwLock<Vec<Crl>>,
    lookups: RwLock<Vec<Lookup>>,
    sealed: AtomicBool,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!("store lock poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!("store lock poisoned, recovering");
        poisoned.into_inner()
    })
}

impl StoreInner {
    fn ensure_mutable(&self) -> Result<()> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(Error::state(
                "certificate store is in use by a verification and can no longer change",
            ));
        }
        Ok(())
    }
}

/// Issuer candidates found in the trust store plus any callback panic
/// swallowed while searching.
pub(crate) struct TrustedIssuers {
    pub(crate) certificates: Vec<Certificate>,
    pub(crate) panic: Option<Error>,
}

/// Trust anchors, revocation lists and lookups consulted during verification.
///
/// Clones share the same store.
#[derive(Clone)]
pub struct CertificateStore {
    handle: Handle<StoreInner>,
}

impl CertificateStore {
    pub fn new() -> Self {
        Self {
            handle: Handle::new(
                "certificate store",
                StoreInner {
                    anchors: RwLock::new(Vec::new()),
                    crls: RwLock::new(Vec::new()),
                    lookups: RwLock::new(Vec::new()),
                    sealed: AtomicBool::new(false),
                },
            ),
        }
    }

    /// Trust every certificate in `file` and/or search the hashed directory `dir`.
    pub fn load_locations(&self, file: Option<&Path>, dir: Option<&Path>) -> Result<()> {
        if file.is_none() && dir.is_none() {
            return Err(Error::InvalidArgument(
                "load_locations needs a file or a directory".to_string(),
            ));
        }
        if let Some(file) = file {
            for certificate in read_certificate_file(file, FileType::Pem)? {
                self.add_certificate(&certificate)?;
            }
        }
        if let Some(dir) = dir {
            let lookup = self.add_lookup(LookupMethod::hash_dir())?;
            lookup.add_directory(dir, FileType::Pem)?;
        }
        Ok(())
    }

    /// Add a trust anchor. Returns `false` when the same certificate is
    /// already trusted.
    pub fn add_certificate(&self, certificate: &Certificate) -> Result<bool> {
        let fingerprint = certificate.cert_hash()?;
        self.handle.with(|store| {
            store.ensure_mutable()?;
            let mut anchors = write(&store.anchors);
            for anchor in anchors.iter() {
                if anchor.cert_hash()? == fingerprint {
                    return Ok(false);
                }
            }
            anchors.push(certificate.clone());
            Ok(true)
        })
    }

    pub fn add_crl(&self, crl: &Crl) -> Result<()> {
        crl.data()?;
        self.handle.with(|store| {
            store.ensure_mutable()?;
            write(&store.crls).push(crl.clone());
            Ok(())
        })
    }

    /// Number of trust anchors.
    pub fn count(&self) -> Result<usize> {
        self.handle.with(|store| Ok(read(&store.anchors).len()))
    }

    pub fn crl_count(&self) -> Result<usize> {
        self.handle.with(|store| Ok(read(&store.crls).len()))
    }

    /// Create a lookup owned by this store, consulted in insertion order.
    pub fn add_lookup(&self, method: LookupMethod) -> Result<Lookup> {
        self.handle.with(|store| {
            store.ensure_mutable()?;
            let lookup = Lookup::new(method)?;
            tracing::debug!("added {:?} to certificate store", lookup);
            write(&store.lookups).push(lookup.clone());
            Ok(lookup)
        })
    }

    pub fn lookups(&self) -> Result<Vec<Lookup>> {
        self.handle.with(|store| Ok(read(&store.lookups).clone()))
    }

    /// Platform defaults from the process configuration.
    pub fn set_default_paths(&self) -> Result<usize> {
        self.set_default_paths_with(EngineConfig::global())
    }

    /// Register `config.system_store_location` as a hashed directory and,
    /// when enabled, trust the platform root certificates. Returns the
    /// number of platform roots added.
    pub fn set_default_paths_with(&self, config: &EngineConfig) -> Result<usize> {
        let lookup = self.add_lookup(LookupMethod::HashDir(config.name_hash))?;
        lookup.add_directory(&config.system_store_location, FileType::Pem)?;
        if !config.load_native_roots {
            return Ok(0);
        }

        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            tracing::warn!("platform root store: {}", error);
        }
        let mut added = 0;
        for der in native.certs {
            match Certificate::load_from_data(der.as_ref(), X509Format::Der) {
                Ok(certificate) => {
                    if self.add_certificate(&certificate)? {
                        added += 1;
                    }
                }
                Err(e) => tracing::debug!("skipping platform root: {}", e),
            }
        }
        tracing::info!("loaded {} platform root certificates", added);
        Ok(added)
    }

    /// First trusted certificate with this subject, from the anchors then
    /// each lookup in order.
    pub fn lookup_by_subject(&self, name: &DistinguishedName) -> Result<Option<Certificate>> {
        let found = self.trusted_issuers(name, true)?;
        if let Some(panic) = found.panic {
            return Err(panic);
        }
        Ok(found.certificates.into_iter().next())
    }

    /// Trusted certificate with this SHA-1 fingerprint, from the anchors
    /// then each lookup in order.
    pub fn lookup_by_fingerprint(&self, fingerprint: &[u8]) -> Result<Option<Certificate>> {
        let store = self.handle.get()?;
        for anchor in read(&store.anchors).iter() {
            if anchor.cert_hash()?.as_slice() == fingerprint {
                return Ok(Some(anchor.clone()));
            }
        }
        let lookups = read(&store.lookups).clone();
        for lookup in lookups {
            match lookup.by_fingerprint(fingerprint) {
                Ok(Some(certificate)) => return Ok(Some(certificate)),
                Ok(None) => {}
                Err(e @ Error::CallbackPanic(_)) => return Err(e),
                Err(e) => tracing::warn!("{:?} failed: {}", lookup, e),
            }
        }
        Ok(None)
    }

    /// Anchors and lookup results whose subject canonically equals `name`.
    ///
    /// With `first_only` the search stops at the first source that yields a
    /// match. A panicking lookup callback ends the search and is reported in
    /// `panic` rather than as an error.
    pub(crate) fn trusted_issuers(
        &self,
        name: &DistinguishedName,
        first_only: bool,
    ) -> Result<TrustedIssuers> {
        let store = self.handle.get()?;
        let canonical = name.raw_data(true)?;
        let mut found = TrustedIssuers {
            certificates: Vec::new(),
            panic: None,
        };
        for anchor in read(&store.anchors).iter() {
            if lookup::subject_matches(anchor, &canonical)? {
                found.certificates.push(anchor.clone());
                if first_only {
                    return Ok(found);
                }
            }
        }

        let lookups = read(&store.lookups).clone();
        for lookup in lookups {
            let candidates = if first_only {
                lookup.by_subject(name).map(|found| found.into_iter().collect())
            } else {
                lookup.all_by_subject(name)
            };
            match candidates {
                Ok(candidates) => {
                    for certificate in candidates {
                        let fingerprint = certificate.cert_hash()?;
                        let mut duplicate = false;
                        for known in &found.certificates {
                            duplicate |= known.cert_hash()? == fingerprint;
                        }
                        if !duplicate {
                            found.certificates.push(certificate);
                        }
                    }
                    if first_only && !found.certificates.is_empty() {
                        return Ok(found);
                    }
                }
                Err(Error::CallbackPanic(message)) => {
                    found.panic = Some(Error::CallbackPanic(message));
                    return Ok(found);
                }
                Err(e) => tracing::warn!("{:?} failed: {}", lookup, e),
            }
        }
        Ok(found)
    }

    /// Whether `certificate` itself is trusted.
    pub(crate) fn is_trusted(&self, certificate: &Certificate) -> Result<TrustedIssuers> {
        let fingerprint = certificate.cert_hash()?;
        let mut found = self.trusted_issuers(&certificate.subject_name()?, false)?;
        let mut matches = Vec::new();
        for candidate in found.certificates.drain(..) {
            if candidate.cert_hash()? == fingerprint {
                matches.push(candidate);
            }
        }
        found.certificates = matches;
        Ok(found)
    }

    pub(crate) fn crls_for(&self, issuer_canonical: &[u8]) -> Result<Vec<Crl>> {
        let store = self.handle.get()?;
        let crls = read(&store.crls);
        let mut matching = Vec::new();
        for crl in crls.iter() {
            if crl.data()?.issuer_canonical == issuer_canonical {
                matching.push(crl.clone());
            }
        }
        Ok(matching)
    }

    pub fn anchors(&self) -> Result<Vec<Certificate>> {
        self.handle.with(|store| Ok(read(&store.anchors).clone()))
    }

    pub fn crls(&self) -> Result<Vec<Crl>> {
        self.handle.with(|store| Ok(read(&store.crls).clone()))
    }

    /// Freeze the store; called on first use by a verification.
    pub fn seal(&self) -> Result<()> {
        self.handle.with(|store| {
            if !store.sealed.swap(true, Ordering::AcqRel) {
                tracing::debug!("certificate store sealed");
            }
            Ok(())
        })
    }

    pub fn is_sealed(&self) -> Result<bool> {
        self.handle.with(|store| Ok(store.sealed.load(Ordering::Acquire)))
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// Shut down and release the lookups, then release this handle.
    pub fn close(&self) {
        if let Ok(store) = self.handle.get() {
            for lookup in write(&store.lookups).drain(..) {
                lookup.close();
            }
        }
        self.handle.release();
    }
}

impl Default for CertificateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateStore")
            .field("anchors", &self.count().ok())
            .field("sealed", &self.is_sealed().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_locations_needs_a_source() {
        let store = CertificateStore::new();
        assert!(matches!(
            store.load_locations(None, None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn sealed_store_rejects_mutation() {
        let store = CertificateStore::new();
        store.add_lookup(LookupMethod::File).unwrap();
        store.seal().unwrap();
        assert!(store.is_sealed().unwrap());
        assert!(matches!(
            store.add_lookup(LookupMethod::File),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(store.lookups().unwrap().len(), 1);
    }

    #[test]
    fn close_shuts_down_lookups() {
        let store = CertificateStore::new();
        store.add_lookup(LookupMethod::collection(Vec::new())).unwrap();
        let shared = store.clone();
        store.close();
        store.close();
        assert!(!store.is_valid());
        assert!(matches!(store.count(), Err(Error::InvalidHandle(_))));
        assert!(shared.lookups().unwrap().is_empty());
    }

    #[test]
    fn wrong_lookup_kind_is_not_supported() {
        let lookup = Lookup::new(LookupMethod::File).unwrap();
        assert!(matches!(
            lookup.add_directory("/nonexistent", FileType::Pem),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn default_file_type_sniffs_armor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.pem");
        fs::write(&path, b"-----BEGIN NOTHING-----\n-----END NOTHING-----\n").unwrap();
        assert!(matches!(
            read_certificate_file(&path, FileType::Default),
            Err(Error::Parse { .. })
        ));
    }
}
