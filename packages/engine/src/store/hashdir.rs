//! Hashed certificate directories
//!
//! Each trusted certificate lives in `dir/{hash:08x}.N`, where `hash` is the
//! subject-name hash and `N` counts up from zero across hash collisions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::lookup::{subject_matches, LookupSource};
use super::{read_certificate_file, FileType};
use crate::config::NameHashAlgorithm;
use crate::error::{Error, Result};
use crate::x509::{Certificate, DistinguishedName, X509Format};

fn slot_path(dir: &Path, hash: u32, index: usize) -> PathBuf {
    dir.join(format!("{hash:08x}.{index}"))
}

pub struct HashDirLookup {
    algorithm: NameHashAlgorithm,
    dirs: RwLock<Vec<(PathBuf, FileType)>>,
}

impl HashDirLookup {
    pub fn new(algorithm: NameHashAlgorithm) -> Self {
        Self {
            algorithm,
            dirs: RwLock::new(Vec::new()),
        }
    }

    pub fn algorithm(&self) -> NameHashAlgorithm {
        self.algorithm
    }

    pub fn add_directory(&self, dir: &Path, file_type: FileType) -> Result<()> {
        if !dir.is_dir() {
            tracing::warn!("hashed directory {} does not exist yet", dir.display());
        }
        let mut dirs = self
            .dirs
            .write()
            .map_err(|_| Error::state("hashed directory lock poisoned"))?;
        if !dirs.iter().any(|(known, _)| known == dir) {
            dirs.push((dir.to_path_buf(), file_type));
        }
        Ok(())
    }

    fn directories(&self) -> Result<Vec<(PathBuf, FileType)>> {
        Ok(self
            .dirs
            .read()
            .map_err(|_| Error::state("hashed directory lock poisoned"))?
            .clone())
    }

    /// Walk the `.0`, `.1`, ... slots for `name` until the first gap.
    fn probe(&self, name: &DistinguishedName, first_only: bool) -> Result<Vec<Certificate>> {
        let canonical = name.raw_data(true)?;
        let hash = name.hash_with(self.algorithm)?;
        let mut matched = Vec::new();
        for (dir, file_type) in self.directories()? {
            for index in 0.. {
                let path = slot_path(&dir, hash, index);
                if !path.is_file() {
                    break;
                }
                let certificates = match read_certificate_file(&path, file_type) {
                    Ok(certificates) => certificates,
                    Err(e) => {
                        tracing::warn!("skipping unreadable {}: {}", path.display(), e);
                        continue;
                    }
                };
                for certificate in certificates {
                    if subject_matches(&certificate, &canonical)? {
                        tracing::trace!("found issuer candidate in {}", path.display());
                        matched.push(certificate);
                        if first_only {
                            return Ok(matched);
                        }
                    }
                }
            }
        }
        Ok(matched)
    }
}

impl LookupSource for HashDirLookup {
    fn by_subject(&self, name: &DistinguishedName) -> Result<Option<Certificate>> {
        Ok(self.probe(name, true)?.pop())
    }

    fn all_by_subject(&self, name: &DistinguishedName) -> Result<Vec<Certificate>> {
        self.probe(name, false)
    }

    /// Directory files are keyed by subject, so fingerprints cannot be probed.
    fn by_fingerprint(&self, _fingerprint: &[u8]) -> Result<Option<Certificate>> {
        Ok(None)
    }
}

/// Write `certificate` into the first free `{hash:08x}.N` slot of `dir`.
///
/// The file holds the PEM encoding followed by a `SHA1 Fingerprint=` line.
/// Returns the path written.
pub fn install_certificate(
    dir: impl AsRef<Path>,
    certificate: &Certificate,
    algorithm: NameHashAlgorithm,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let hash = certificate.subject_name()?.hash_with(algorithm)?;
    let mut index = 0;
    let path = loop {
        let candidate = slot_path(dir, hash, index);
        if !candidate.exists() {
            break candidate;
        }
        index += 1;
    };

    let mut contents = certificate.raw_data(X509Format::Pem)?;
    contents.extend_from_slice(b"SHA1 Fingerprint=");
    contents.extend_from_slice(certificate.fingerprint_string()?.as_bytes());
    contents.push(b'\n');
    fs::write(&path, contents)?;

    tracing::debug!(
        "installed {} as {}",
        certificate.subject_name_string()?,
        path.display()
    );
    Ok(path)
}

/// Convert a directory of DER `*.cer` files into a hashed directory.
///
/// Unparseable files are skipped with a warning. Returns the installed paths.
pub fn convert_directory(
    source: impl AsRef<Path>,
    target: impl AsRef<Path>,
    algorithm: NameHashAlgorithm,
) -> Result<Vec<PathBuf>> {
    let mut installed = Vec::new();
    for entry in fs::read_dir(source.as_ref())? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("cer") {
            continue;
        }
        let der = fs::read(&path)?;
        match Certificate::load_from_data(&der, X509Format::Der) {
            Ok(certificate) => installed.push(install_certificate(target.as_ref(), &certificate, algorithm)?),
            Err(e) => tracing::warn!("skipping {}: {}", path.display(), e),
        }
    }
    tracing::info!("converted {} certificates", installed.len());
    Ok(installed)
}
