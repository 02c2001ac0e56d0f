//! Engine configuration

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::Deserialize;

/// Default maximum number of issuers above the leaf during chain building.
pub const DEFAULT_VERIFY_DEPTH: usize = 100;

/// Subject-name hash used to name files in hashed certificate directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameHashAlgorithm {
    /// SHA-1 over the canonical name encoding.
    #[default]
    Current,
    /// MD5 over the DER name encoding.
    Old,
}

/// Process-level engine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hashed directory used by `CertificateStore::set_default_paths`
    pub system_store_location: PathBuf,
    /// Hash algorithm for hashed-directory lookups
    pub name_hash: NameHashAlgorithm,
    /// Verification depth used when a verify param does not set one
    pub default_verify_depth: usize,
    /// Upper bound on pump iterations inside a single handshake step
    pub max_handshake_steps: usize,
    /// Also trust the platform root store in `set_default_paths`
    pub load_native_roots: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_store_location: default_store_location(),
            name_hash: NameHashAlgorithm::Current,
            default_verify_depth: DEFAULT_VERIFY_DEPTH,
            max_handshake_steps: 64,
            load_native_roots: true,
        }
    }
}

fn default_store_location() -> PathBuf {
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config").join("tessera").join("certs"),
        None => env::temp_dir().join("tessera").join("certs"),
    }
}

impl EngineConfig {
    /// Defaults overridden by `TESSERA_CERT_DIR`, `TESSERA_NAME_HASH`
    /// (`current` or `old`) and `TESSERA_VERIFY_DEPTH`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = env::var_os("TESSERA_CERT_DIR") {
            config.system_store_location = PathBuf::from(dir);
        }
        if let Ok(hash) = env::var("TESSERA_NAME_HASH") {
            match hash.to_ascii_lowercase().as_str() {
                "old" => config.name_hash = NameHashAlgorithm::Old,
                "current" | "new" => config.name_hash = NameHashAlgorithm::Current,
                other => tracing::warn!("ignoring unknown TESSERA_NAME_HASH value {:?}", other),
            }
        }
        if let Ok(depth) = env::var("TESSERA_VERIFY_DEPTH") {
            match depth.parse() {
                Ok(depth) => config.default_verify_depth = depth,
                Err(_) => tracing::warn!("ignoring invalid TESSERA_VERIFY_DEPTH value {:?}", depth),
            }
        }
        config
    }

    /// Configuration shared by the whole process, read from the environment once.
    pub fn global() -> &'static EngineConfig {
        static GLOBAL: OnceLock<EngineConfig> = OnceLock::new();
        GLOBAL.get_or_init(Self::from_env)
    }
}
