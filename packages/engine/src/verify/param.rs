//! Verification parameters

use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::SystemTime;

use bitflags::bitflags;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::handle::Handle;

bitflags! {
    /// Verification flags, bit-compatible with OpenSSL's `X509_V_FLAG_*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VerifyFlags: u64 {
        const CB_ISSUER_CHECK = 0x1;
        const USE_CHECK_TIME = 0x2;
        const CRL_CHECK = 0x4;
        const CRL_CHECK_ALL = 0x8;
        const IGNORE_CRITICAL = 0x10;
        const X509_STRICT = 0x20;
        const ALLOW_PROXY_CERTS = 0x40;
        const POLICY_CHECK = 0x80;
        const EXPLICIT_POLICY = 0x100;
        const INHIBIT_ANY = 0x200;
        const INHIBIT_MAP = 0x400;
        const NOTIFY_POLICY = 0x800;
        const EXTENDED_CRL_SUPPORT = 0x1000;
        const USE_DELTAS = 0x2000;
        const CHECK_SS_SIGNATURE = 0x4000;
        const TRUSTED_FIRST = 0x8000;
        const PARTIAL_CHAIN = 0x80000;
        const NO_ALT_CHAINS = 0x100000;
        const NO_CHECK_TIME = 0x200000;
    }
}

bitflags! {
    /// Engine-level switches layered over [`VerifyFlags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MonoVerifyFlags: u32 {
        const CRL_CHECK = 1;
        const CRL_CHECK_ALL = 2;
        const X509_STRICT = 4;
    }
}

/// Intended use of the leaf certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    SslClient = 1,
    SslServer = 2,
    NsSslServer = 3,
    SmimeSign = 4,
    SmimeEncrypt = 5,
    CrlSign = 6,
    Any = 7,
    OcspHelper = 8,
    TimestampSign = 9,
}

impl Purpose {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::SslClient,
            2 => Self::SslServer,
            3 => Self::NsSslServer,
            4 => Self::SmimeSign,
            5 => Self::SmimeEncrypt,
            6 => Self::CrlSign,
            7 => Self::Any,
            8 => Self::OcspHelper,
            9 => Self::TimestampSign,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ParamData {
    pub(crate) name: Option<String>,
    pub(crate) hosts: Vec<String>,
    pub(crate) flags: VerifyFlags,
    pub(crate) mono_flags: MonoVerifyFlags,
    pub(crate) purpose: Option<Purpose>,
    pub(crate) depth: Option<usize>,
    pub(crate) time: Option<SystemTime>,
    pub(crate) peer_name: Option<String>,
}

impl ParamData {
    fn preset(name: &str, purpose: Option<Purpose>) -> Self {
        Self {
            name: Some(name.to_string()),
            flags: VerifyFlags::TRUSTED_FIRST,
            purpose,
            ..Self::default()
        }
    }

    pub(crate) fn effective_depth(&self) -> usize {
        self.depth
            .unwrap_or(EngineConfig::global().default_verify_depth)
    }

    pub(crate) fn check_time(&self) -> Option<SystemTime> {
        if self.flags.contains(VerifyFlags::NO_CHECK_TIME) {
            return None;
        }
        Some(match self.time {
            Some(time) if self.flags.contains(VerifyFlags::USE_CHECK_TIME) => time,
            _ => SystemTime::now(),
        })
    }

    pub(crate) fn crl_check(&self) -> bool {
        self.flags.contains(VerifyFlags::CRL_CHECK)
            || self.mono_flags.contains(MonoVerifyFlags::CRL_CHECK)
            || self.crl_check_all()
    }

    pub(crate) fn crl_check_all(&self) -> bool {
        self.flags.contains(VerifyFlags::CRL_CHECK_ALL)
            || self.mono_flags.contains(MonoVerifyFlags::CRL_CHECK_ALL)
    }

    pub(crate) fn strict(&self) -> bool {
        self.flags.contains(VerifyFlags::X509_STRICT)
            || self.mono_flags.contains(MonoVerifyFlags::X509_STRICT)
    }
}

fn presets() -> &'static [Arc<RwLock<ParamData>>] {
    static PRESETS: OnceLock<Vec<Arc<RwLock<ParamData>>>> = OnceLock::new();
    PRESETS.get_or_init(|| {
        [
            ParamData::preset("default", None),
            ParamData::preset("pkcs7", Some(Purpose::SmimeSign)),
            ParamData::preset("smime_sign", Some(Purpose::SmimeSign)),
            ParamData::preset("ssl_client", Some(Purpose::SslClient)),
            ParamData::preset("ssl_server", Some(Purpose::SslServer)),
        ]
        .into_iter()
        .map(|data| Arc::new(RwLock::new(data)))
        .collect()
    })
}

/// Parameters controlling one chain verification.
///
/// Named presets are shared and read-only; [`VerifyParam::copy`] yields a
/// private, writable copy. Clones share the same parameters.
#[derive(Clone)]
pub struct VerifyParam {
    handle: Handle<RwLock<ParamData>>,
    writable: bool,
}

impl VerifyParam {
    /// Empty writable parameters.
    pub fn new() -> Self {
        Self::from_data(ParamData::default())
    }

    pub(crate) fn from_data(data: ParamData) -> Self {
        Self {
            handle: Handle::new("verify param", RwLock::new(data)),
            writable: true,
        }
    }

    /// Read-only preset by name: `default`, `pkcs7`, `smime_sign`,
    /// `ssl_client` or `ssl_server`.
    pub fn lookup(name: &str) -> Result<Self> {
        for preset in presets() {
            let matches = preset
                .read()
                .map_err(|_| Error::state("verify param lock poisoned"))?
                .name
                .as_deref()
                == Some(name);
            if matches {
                return Ok(Self {
                    handle: Handle::from_arc("verify param", Arc::clone(preset)),
                    writable: false,
                });
            }
        }
        Err(Error::InvalidArgument(format!("no verify param preset named {name:?}")))
    }

    /// Preset for verifying client certificates (used by servers).
    pub fn ssl_client() -> Result<Self> {
        Self::lookup("ssl_client")
    }

    /// Preset for verifying server certificates (used by clients).
    pub fn ssl_server() -> Result<Self> {
        Self::lookup("ssl_server")
    }

    /// Independent writable copy.
    pub fn copy(&self) -> Result<Self> {
        Ok(Self::from_data(self.snapshot()?))
    }

    pub fn can_modify(&self) -> bool {
        self.writable
    }

    pub(crate) fn snapshot(&self) -> Result<ParamData> {
        self.handle.with(|data| {
            Ok(data
                .read()
                .map_err(|_| Error::state("verify param lock poisoned"))?
                .clone())
        })
    }

    fn read<R>(&self, op: impl FnOnce(&ParamData) -> R) -> Result<R> {
        self.handle.with(|data| {
            let data = data
                .read()
                .map_err(|_| Error::state("verify param lock poisoned"))?;
            Ok(op(&data))
        })
    }

    fn modify(&self, op: impl FnOnce(&mut ParamData)) -> Result<()> {
        if !self.writable {
            return Err(Error::state("attempt to modify a read-only verify param"));
        }
        self.update(op)
    }

    /// Write without the read-only check; used for results recorded by verification.
    pub(crate) fn update(&self, op: impl FnOnce(&mut ParamData)) -> Result<()> {
        self.handle.with(|data| {
            let mut data = data
                .write()
                .map_err(|_| Error::state("verify param lock poisoned"))?;
            op(&mut data);
            Ok(())
        })
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.modify(|data| data.name = Some(name))
    }

    /// Replace the expected host names with `host`.
    pub fn set_host(&self, host: &str) -> Result<()> {
        let host = host.to_string();
        self.modify(|data| {
            data.hosts.clear();
            if !host.is_empty() {
                data.hosts.push(host);
            }
        })
    }

    pub fn add_host(&self, host: &str) -> Result<()> {
        if host.is_empty() {
            return Err(Error::InvalidArgument("empty host name".to_string()));
        }
        let host = host.to_string();
        self.modify(|data| data.hosts.push(host))
    }

    /// Set additional flags.
    pub fn set_flags(&self, flags: VerifyFlags) -> Result<()> {
        self.modify(|data| data.flags |= flags)
    }

    pub fn clear_flags(&self, flags: VerifyFlags) -> Result<()> {
        self.modify(|data| data.flags &= !flags)
    }

    pub fn set_mono_flags(&self, flags: MonoVerifyFlags) -> Result<()> {
        self.modify(|data| data.mono_flags = flags)
    }

    pub fn set_purpose(&self, purpose: Purpose) -> Result<()> {
        self.modify(|data| data.purpose = Some(purpose))
    }

    /// Maximum number of issuers allowed above the leaf.
    pub fn set_depth(&self, depth: usize) -> Result<()> {
        self.modify(|data| data.depth = Some(depth))
    }

    /// Verify validity periods against `time` instead of the current time.
    pub fn set_time(&self, time: SystemTime) -> Result<()> {
        self.modify(|data| {
            data.time = Some(time);
            data.flags |= VerifyFlags::USE_CHECK_TIME;
        })
    }

    pub fn name(&self) -> Result<Option<String>> {
        self.read(|data| data.name.clone())
    }

    pub fn flags(&self) -> Result<VerifyFlags> {
        self.read(|data| data.flags)
    }

    pub fn mono_flags(&self) -> Result<MonoVerifyFlags> {
        self.read(|data| data.mono_flags)
    }

    pub fn purpose(&self) -> Result<Option<Purpose>> {
        self.read(|data| data.purpose)
    }

    pub fn depth(&self) -> Result<usize> {
        self.read(ParamData::effective_depth)
    }

    pub fn hosts(&self) -> Result<Vec<String>> {
        self.read(|data| data.hosts.clone())
    }

    pub fn time(&self) -> Result<Option<SystemTime>> {
        self.read(|data| data.time)
    }

    /// Host that matched during the last verification, if any.
    pub fn peer_name(&self) -> Result<Option<String>> {
        self.read(|data| data.peer_name.clone())
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn close(&self) {
        self.handle.release();
    }
}

impl Default for VerifyParam {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VerifyParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyParam")
            .field("data", &self.snapshot().ok())
            .field("writable", &self.writable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_read_only() {
        let param = VerifyParam::ssl_server().unwrap();
        assert!(!param.can_modify());
        assert_eq!(param.purpose().unwrap(), Some(Purpose::SslServer));
        assert!(matches!(param.set_host("example.com"), Err(Error::InvalidState(_))));

        let copy = param.copy().unwrap();
        assert!(copy.can_modify());
        copy.set_host("example.com").unwrap();
        assert_eq!(copy.hosts().unwrap(), ["example.com"]);
        assert!(VerifyParam::ssl_server().unwrap().hosts().unwrap().is_empty());
    }

    #[test]
    fn unknown_preset() {
        assert!(matches!(
            VerifyParam::lookup("nope"),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(
            VerifyParam::lookup("pkcs7").unwrap().purpose().unwrap(),
            Some(Purpose::SmimeSign)
        );
    }

    #[test]
    fn flags_accumulate_and_clear() {
        let param = VerifyParam::new();
        param.set_flags(VerifyFlags::CRL_CHECK).unwrap();
        param.set_flags(VerifyFlags::PARTIAL_CHAIN).unwrap();
        assert_eq!(
            param.flags().unwrap(),
            VerifyFlags::CRL_CHECK | VerifyFlags::PARTIAL_CHAIN
        );
        param.clear_flags(VerifyFlags::CRL_CHECK).unwrap();
        assert_eq!(param.flags().unwrap(), VerifyFlags::PARTIAL_CHAIN);
        assert_eq!(VerifyFlags::NO_CHECK_TIME.bits(), 0x200000);
    }

    #[test]
    fn set_time_enables_check_time() {
        let param = VerifyParam::new();
        let at = SystemTime::UNIX_EPOCH;
        param.set_time(at).unwrap();
        assert!(param.flags().unwrap().contains(VerifyFlags::USE_CHECK_TIME));
        assert_eq!(param.snapshot().unwrap().check_time(), Some(at));
    }

    #[test]
    fn purpose_codes_round_trip() {
        for code in 1..=9 {
            assert_eq!(Purpose::from_code(code).unwrap().code(), code);
        }
        assert!(Purpose::from_code(0).is_none());
    }
}
