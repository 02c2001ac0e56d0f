//! Protocol versions by wire code

use std::fmt;

use rustls::SupportedProtocolVersion;

/// A TLS protocol version, carried as its two-byte wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const TLS10: Self = Self(0x0301);
    pub const TLS11: Self = Self(0x0302);
    pub const TLS12: Self = Self(0x0303);
    pub const TLS13: Self = Self(0x0304);

    /// Versions the engine can negotiate, oldest first.
    pub const SUPPORTED: [Self; 2] = [Self::TLS12, Self::TLS13];

    pub fn code(self) -> u16 {
        self.0
    }

    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self)
    }

    pub(crate) fn to_rustls(self) -> Option<&'static SupportedProtocolVersion> {
        match self {
            Self::TLS12 => Some(&rustls::version::TLS12),
            Self::TLS13 => Some(&rustls::version::TLS13),
            _ => None,
        }
    }

    pub(crate) fn from_rustls(version: rustls::ProtocolVersion) -> Self {
        Self(u16::from(version))
    }

    /// Negotiable versions within `min..=max`.
    pub(crate) fn negotiable(
        min: Option<Self>,
        max: Option<Self>,
    ) -> Vec<&'static SupportedProtocolVersion> {
        let min = min.unwrap_or(Self::TLS10);
        let max = max.unwrap_or(Self::TLS13);
        Self::SUPPORTED
            .iter()
            .filter(|version| **version >= min && **version <= max)
            .filter_map(|version| version.to_rustls())
            .collect()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::TLS10 => f.write_str("TLSv1"),
            Self::TLS11 => f.write_str("TLSv1.1"),
            Self::TLS12 => f.write_str("TLSv1.2"),
            Self::TLS13 => f.write_str("TLSv1.3"),
            Self(code) => write!(f, "unknown protocol {code:#06x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_select_supported_versions() {
        assert_eq!(ProtocolVersion::negotiable(None, None).len(), 2);
        assert_eq!(
            ProtocolVersion::negotiable(Some(ProtocolVersion::TLS12), Some(ProtocolVersion::TLS12))
                .len(),
            1
        );
        assert!(ProtocolVersion::negotiable(None, Some(ProtocolVersion::TLS10)).is_empty());
        assert!(
            ProtocolVersion::negotiable(Some(ProtocolVersion::TLS13), Some(ProtocolVersion::TLS12))
                .is_empty()
        );
    }

    #[test]
    fn codes_round_trip() {
        let version = ProtocolVersion(0x0303);
        assert_eq!(version, ProtocolVersion::TLS12);
        assert_eq!(version.code(), 0x0303);
        assert_eq!(ProtocolVersion::from_rustls(rustls::ProtocolVersion::TLSv1_3), ProtocolVersion::TLS13);
        assert_eq!(ProtocolVersion::TLS11.to_string(), "TLSv1.1");
    }
}
