//! Primitives delegated to the cryptographic backends

use md5::{Digest, Md5};
use ring::digest;
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::PrivateKeyDer;
use rustls::SignatureScheme;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{Error, Result};

pub fn sha1(data: &[u8]) -> [u8; 20] {
    let hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, data);
    let mut out = [0u8; 20];
    out.copy_from_slice(hash.as_ref());
    out
}

pub fn md5(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md5::digest(data));
    out
}

/// The ring provider, optionally narrowed to the given cipher suite codes.
pub fn provider(cipher_suites: Option<&[u16]>) -> CryptoProvider {
    let mut provider = rustls::crypto::ring::default_provider();
    if let Some(codes) = cipher_suites {
        provider
            .cipher_suites
            .retain(|suite| codes.contains(&u16::from(suite.suite())));
    }
    provider
}

/// Every cipher suite code the engine can negotiate.
pub fn supported_cipher_suites() -> Vec<u16> {
    rustls::crypto::ring::default_provider()
        .cipher_suites
        .iter()
        .map(|suite| u16::from(suite.suite()))
        .collect()
}

/// Check that `subject` was signed by the key in `issuer`.
pub fn verify_certificate_signature(subject_der: &[u8], issuer_der: &[u8]) -> Result<bool> {
    let (_, subject) = X509Certificate::from_der(subject_der)
        .map_err(|e| Error::parse("certificate", e))?;
    let (_, issuer) =
        X509Certificate::from_der(issuer_der).map_err(|e| Error::parse("certificate", e))?;
    match subject.verify_signature(Some(issuer.public_key())) {
        Ok(()) => Ok(true),
        Err(e) => {
            tracing::debug!("signature check failed: {}", e);
            Ok(false)
        }
    }
}

const PROBE_SCHEMES: [SignatureScheme; 6] = [
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::ED25519,
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PKCS1_SHA256,
    SignatureScheme::RSA_PKCS1_SHA384,
];

fn verification_algorithm(scheme: SignatureScheme) -> Option<&'static dyn VerificationAlgorithm> {
    Some(match scheme {
        SignatureScheme::ECDSA_NISTP256_SHA256 => &signature::ECDSA_P256_SHA256_ASN1,
        SignatureScheme::ECDSA_NISTP384_SHA384 => &signature::ECDSA_P384_SHA384_ASN1,
        SignatureScheme::ED25519 => &signature::ED25519,
        SignatureScheme::RSA_PSS_SHA256 => &signature::RSA_PSS_2048_8192_SHA256,
        SignatureScheme::RSA_PKCS1_SHA256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        SignatureScheme::RSA_PKCS1_SHA384 => &signature::RSA_PKCS1_2048_8192_SHA384,
        _ => return None,
    })
}

/// Sign a probe with `key` and verify it against the raw subject public key.
pub fn key_matches_public_key(key: PrivateKeyDer<'static>, public_key: &[u8]) -> Result<bool> {
    let provider = rustls::crypto::ring::default_provider();
    let signing_key = provider
        .key_provider
        .load_private_key(key)
        .map_err(|e| Error::parse("private key", e))?;
    let Some(signer) = signing_key.choose_scheme(&PROBE_SCHEMES) else {
        return Err(Error::NotSupported(format!(
            "no probe signature scheme for {:?} keys",
            signing_key.algorithm()
        )));
    };
    let probe = b"tessera key/certificate match probe";
    let signature = signer
        .sign(probe)
        .map_err(|e| Error::native(&e))?;
    let Some(algorithm) = verification_algorithm(signer.scheme()) else {
        return Ok(false);
    };
    Ok(UnparsedPublicKey::new(algorithm, public_key)
        .verify(probe, &signature)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_have_expected_prefixes() {
        // Well-known digests of the empty string.
        assert_eq!(hex::encode(&sha1(b"")[..4]), "da39a3ee");
        assert_eq!(hex::encode(&md5(b"")[..4]), "d41d8cd9");
    }

    #[test]
    fn narrowing_keeps_only_requested_suites() {
        let all = supported_cipher_suites();
        let first = all[0];
        let narrowed = provider(Some(&[first]));
        assert_eq!(narrowed.cipher_suites.len(), 1);
        assert_eq!(u16::from(narrowed.cipher_suites[0].suite()), first);
    }
}
