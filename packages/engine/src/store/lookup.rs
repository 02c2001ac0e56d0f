//! Certificate lookup methods consulted during chain building

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

use super::hashdir::HashDirLookup;
use super::FileType;
use crate::config::NameHashAlgorithm;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::registry::{self, guarded, Token};
use crate::x509::{Certificate, DistinguishedName};

/// Operations shared by every lookup kind.
pub trait LookupSource: Send + Sync {
    /// A trusted certificate whose subject canonically equals `name`.
    fn by_subject(&self, name: &DistinguishedName) -> Result<Option<Certificate>>;

    /// A trusted certificate with this SHA-1 fingerprint.
    fn by_fingerprint(&self, fingerprint: &[u8]) -> Result<Option<Certificate>>;

    /// Every trusted certificate whose subject matches `name`.
    fn all_by_subject(&self, name: &DistinguishedName) -> Result<Vec<Certificate>> {
        Ok(self.by_subject(name)?.into_iter().collect())
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Application-provided certificate source.
pub trait LookupCallback: Send + Sync {
    fn by_subject(&self, name: &DistinguishedName) -> Result<Option<Certificate>>;

    fn by_fingerprint(&self, _fingerprint: &[u8]) -> Result<Option<Certificate>> {
        Ok(None)
    }
}

pub(crate) fn subject_matches(certificate: &Certificate, canonical: &[u8]) -> Result<bool> {
    Ok(certificate.data()?.subject_canonical == canonical)
}

fn fingerprint_matches(certificate: &Certificate, fingerprint: &[u8]) -> Result<bool> {
    Ok(certificate.cert_hash()?.as_slice() == fingerprint)
}

/// Certificates loaded explicitly from files.
#[derive(Default)]
pub struct FileLookup {
    certificates: RwLock<Vec<Certificate>>,
}

impl FileLookup {
    pub fn load_file(&self, path: &Path, file_type: FileType) -> Result<usize> {
        let loaded = super::read_certificate_file(path, file_type)?;
        let count = loaded.len();
        self.certificates
            .write()
            .map_err(|_| Error::state("file lookup lock poisoned"))?
            .extend(loaded);
        tracing::debug!("loaded {} certificates from {}", count, path.display());
        Ok(count)
    }

    fn find(&self, mut predicate: impl FnMut(&Certificate) -> Result<bool>) -> Result<Option<Certificate>> {
        Ok(self.filter(&mut predicate, true)?.pop())
    }

    fn filter(
        &self,
        mut predicate: impl FnMut(&Certificate) -> Result<bool>,
        first_only: bool,
    ) -> Result<Vec<Certificate>> {
        let certificates = self
            .certificates
            .read()
            .map_err(|_| Error::state("file lookup lock poisoned"))?;
        let mut matched = Vec::new();
        for certificate in certificates.iter() {
            if predicate(certificate)? {
                matched.push(certificate.clone());
                if first_only {
                    break;
                }
            }
        }
        Ok(matched)
    }
}

impl LookupSource for FileLookup {
    fn by_subject(&self, name: &DistinguishedName) -> Result<Option<Certificate>> {
        let canonical = name.raw_data(true)?;
        self.find(|certificate| subject_matches(certificate, &canonical))
    }

    fn by_fingerprint(&self, fingerprint: &[u8]) -> Result<Option<Certificate>> {
        self.find(|certificate| fingerprint_matches(certificate, fingerprint))
    }

    fn all_by_subject(&self, name: &DistinguishedName) -> Result<Vec<Certificate>> {
        let canonical = name.raw_data(true)?;
        self.filter(|certificate| subject_matches(certificate, &canonical), false)
    }
}

/// Lookup backed by an application callback held in the callback registry.
pub struct CallbackLookup {
    token: Token,
}

impl CallbackLookup {
    fn new(callback: Arc<dyn LookupCallback>) -> Self {
        Self {
            token: registry::lookup_callbacks().register(callback),
        }
    }

    fn callback(&self) -> Result<Arc<dyn LookupCallback>> {
        registry::lookup_callbacks()
            .resolve(self.token)
            .ok_or(Error::InvalidHandle("lookup callback"))
    }
}

impl LookupSource for CallbackLookup {
    fn by_subject(&self, name: &DistinguishedName) -> Result<Option<Certificate>> {
        let callback = self.callback()?;
        guarded("lookup by subject", || callback.by_subject(name))?
    }

    fn by_fingerprint(&self, fingerprint: &[u8]) -> Result<Option<Certificate>> {
        let callback = self.callback()?;
        guarded("lookup by fingerprint", || callback.by_fingerprint(fingerprint))?
    }

    fn shutdown(&self) -> Result<()> {
        registry::lookup_callbacks().unregister(self.token);
        Ok(())
    }
}

impl Drop for CallbackLookup {
    fn drop(&mut self) {
        registry::lookup_callbacks().unregister(self.token);
    }
}

/// Fixed certificate set indexed by subject hash on first use.
pub struct CollectionLookup {
    certificates: Vec<Certificate>,
    by_hash: OnceLock<HashMap<u32, Vec<usize>>>,
}

impl CollectionLookup {
    pub fn new(certificates: impl IntoIterator<Item = Certificate>) -> Self {
        Self {
            certificates: certificates.into_iter().collect(),
            by_hash: OnceLock::new(),
        }
    }

    fn index(&self) -> &HashMap<u32, Vec<usize>> {
        self.by_hash.get_or_init(|| {
            let mut index: HashMap<u32, Vec<usize>> = HashMap::new();
            for (position, certificate) in self.certificates.iter().enumerate() {
                match certificate.subject_name_hash() {
                    Ok(hash) => index.entry(hash).or_default().push(position),
                    Err(e) => tracing::warn!("skipping unusable collection certificate: {}", e),
                }
            }
            index
        })
    }
}

impl LookupCallback for CollectionLookup {
    fn by_subject(&self, name: &DistinguishedName) -> Result<Option<Certificate>> {
        let canonical = name.raw_data(true)?;
        let Some(positions) = self.index().get(&name.hash()?) else {
            return Ok(None);
        };
        for &position in positions {
            let certificate = &self.certificates[position];
            if subject_matches(certificate, &canonical)? {
                return Ok(Some(certificate.clone()));
            }
        }
        Ok(None)
    }

    fn by_fingerprint(&self, fingerprint: &[u8]) -> Result<Option<Certificate>> {
        for certificate in &self.certificates {
            if fingerprint_matches(certificate, fingerprint)? {
                return Ok(Some(certificate.clone()));
            }
        }
        Ok(None)
    }
}

/// How a lookup finds certificates.
#[derive(Clone)]
pub enum LookupMethod {
    /// Certificates loaded with [`Lookup::load_file`].
    File,
    /// `{hash:08x}.N` files in directories added with [`Lookup::add_directory`].
    HashDir(NameHashAlgorithm),
    /// An application callback.
    Callback(Arc<dyn LookupCallback>),
}

impl LookupMethod {
    pub fn hash_dir() -> Self {
        Self::HashDir(crate::config::EngineConfig::global().name_hash)
    }

    pub fn collection(certificates: impl IntoIterator<Item = Certificate>) -> Self {
        Self::Callback(Arc::new(CollectionLookup::new(certificates)))
    }
}

impl fmt::Debug for LookupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("File"),
            Self::HashDir(algorithm) => f.debug_tuple("HashDir").field(algorithm).finish(),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

pub(crate) enum LookupKind {
    File(FileLookup),
    HashDir(HashDirLookup),
    Callback(CallbackLookup),
}

impl LookupKind {
    fn source(&self) -> &dyn LookupSource {
        match self {
            Self::File(lookup) => lookup,
            Self::HashDir(lookup) => lookup,
            Self::Callback(lookup) => lookup,
        }
    }
}

/// A certificate source owned by a store.
#[derive(Clone)]
pub struct Lookup {
    handle: Handle<LookupKind>,
}

impl Lookup {
    pub fn new(method: LookupMethod) -> Result<Self> {
        let kind = match method {
            LookupMethod::File => LookupKind::File(FileLookup::default()),
            LookupMethod::HashDir(algorithm) => LookupKind::HashDir(HashDirLookup::new(algorithm)),
            LookupMethod::Callback(callback) => LookupKind::Callback(CallbackLookup::new(callback)),
        };
        kind.source().init()?;
        Ok(Self {
            handle: Handle::new("lookup", kind),
        })
    }

    /// Load certificates into a file lookup.
    pub fn load_file(&self, path: impl AsRef<Path>, file_type: FileType) -> Result<usize> {
        self.handle.with(|kind| match kind {
            LookupKind::File(lookup) => lookup.load_file(path.as_ref(), file_type),
            _ => Err(Error::NotSupported(
                "load_file requires a file lookup".to_string(),
            )),
        })
    }

    /// Register a hashed directory with a hashed-directory lookup.
    pub fn add_directory(&self, dir: impl AsRef<Path>, file_type: FileType) -> Result<()> {
        self.handle.with(|kind| match kind {
            LookupKind::HashDir(lookup) => lookup.add_directory(dir.as_ref(), file_type),
            _ => Err(Error::NotSupported(
                "add_directory requires a hashed-directory lookup".to_string(),
            )),
        })
    }

    pub fn by_subject(&self, name: &DistinguishedName) -> Result<Option<Certificate>> {
        self.handle.with(|kind| kind.source().by_subject(name))
    }

    pub fn by_fingerprint(&self, fingerprint: &[u8]) -> Result<Option<Certificate>> {
        self.handle.with(|kind| kind.source().by_fingerprint(fingerprint))
    }

    /// Every match, including hash-collision slots of hashed directories.
    pub fn all_by_subject(&self, name: &DistinguishedName) -> Result<Vec<Certificate>> {
        self.handle.with(|kind| kind.source().all_by_subject(name))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.handle.with(|kind| kind.source().shutdown())
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// Shut the lookup down and release it.
    pub fn close(&self) {
        if let Err(e) = self.shutdown() {
            tracing::debug!("lookup shutdown skipped: {}", e);
        }
        self.handle.release();
    }
}

impl fmt::Debug for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.handle.get().ok().map(|kind| match &*kind {
            LookupKind::File(_) => "file",
            LookupKind::HashDir(_) => "hash_dir",
            LookupKind::Callback(_) => "callback",
        });
        f.debug_struct("Lookup").field("kind", &kind).finish()
    }
}
