//! Chain verification error codes

use std::fmt;

macro_rules! verify_error_codes {
    ($($name:ident = $code:literal => $message:literal,)*) => {
        /// Outcome of a chain verification, numbered like OpenSSL's `X509_V_ERR_*`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum VerifyErrorCode {
            $($name,)*
        }

        impl VerifyErrorCode {
            pub fn code(self) -> i32 {
                match self {
                    $(Self::$name => $code,)*
                }
            }

            pub fn message(self) -> &'static str {
                match self {
                    $(Self::$name => $message,)*
                }
            }

            pub fn from_code(code: i32) -> Option<Self> {
                match code {
                    $($code => Some(Self::$name),)*
                    _ => None,
                }
            }
        }
    };
}

verify_error_codes! {
    Ok = 0 => "ok",
    Unspecified = 1 => "unspecified certificate verification error",
    UnableToGetIssuerCert = 2 => "unable to get issuer certificate",
    UnableToGetCrl = 3 => "unable to get certificate CRL",
    UnableToDecodeIssuerPublicKey = 6 => "unable to decode issuer public key",
    CertSignatureFailure = 7 => "certificate signature failure",
    CrlSignatureFailure = 8 => "CRL signature failure",
    CertNotYetValid = 9 => "certificate is not yet valid",
    CertHasExpired = 10 => "certificate has expired",
    CrlNotYetValid = 11 => "CRL is not yet valid",
    CrlHasExpired = 12 => "CRL has expired",
    DepthZeroSelfSignedCert = 18 => "self signed certificate",
    SelfSignedCertInChain = 19 => "self signed certificate in certificate chain",
    UnableToGetIssuerCertLocally = 20 => "unable to get local issuer certificate",
    UnableToVerifyLeafSignature = 21 => "unable to verify the first certificate",
    CertChainTooLong = 22 => "certificate chain too long",
    CertRevoked = 23 => "certificate revoked",
    InvalidCa = 24 => "invalid CA certificate",
    PathLengthExceeded = 25 => "path length constraint exceeded",
    InvalidPurpose = 26 => "unsupported certificate purpose",
    CertUntrusted = 27 => "certificate not trusted",
    CertRejected = 28 => "certificate rejected",
    KeyUsageNoCertSign = 32 => "key usage does not include certificate signing",
    ApplicationVerification = 50 => "application verification failure",
    HostnameMismatch = 62 => "Hostname mismatch",
    IpAddressMismatch = 64 => "IP address mismatch",
}

impl VerifyErrorCode {
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for VerifyErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}
