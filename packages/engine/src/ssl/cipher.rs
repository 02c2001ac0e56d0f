//! Cipher suites by wire code

use std::fmt;

use crate::crypto;

/// A cipher suite, carried as its two-byte IANA code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    pub fn code(self) -> u16 {
        self.0
    }

    pub fn is_supported(self) -> bool {
        crypto::supported_cipher_suites().contains(&self.0)
    }

    /// IANA name, when the code is a registered suite.
    pub fn name(self) -> Option<&'static str> {
        rustls::CipherSuite::from(self.0).as_str()
    }

    pub(crate) fn from_rustls(suite: rustls::CipherSuite) -> Self {
        Self(u16::from(suite))
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{:#06x}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_suites_have_names() {
        let suite = CipherSuite(0x1301);
        assert!(suite.is_supported());
        assert_eq!(suite.name(), Some("TLS13_AES_128_GCM_SHA256"));
        assert_eq!(suite.to_string(), "TLS13_AES_128_GCM_SHA256");
    }

    #[test]
    fn registered_but_unsupported_suites_keep_their_names() {
        let suite = CipherSuite(0xfefe);
        assert_eq!(suite.name(), Some("SSL_RSA_FIPS_WITH_DES_CBC_SHA"));
        assert!(!suite.is_supported());
    }

    #[test]
    fn unregistered_codes_have_no_name() {
        // GREASE value
        let suite = CipherSuite(0x0a0a);
        assert_eq!(suite.name(), None);
        assert_eq!(suite.to_string(), "0x0a0a");
        assert!(!suite.is_supported());
    }
}
