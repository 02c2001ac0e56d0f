//! Bridge from the rustls certificate verifier traits to the chain verifier

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, UNIX_EPOCH};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, OtherError, SignatureScheme};

use super::context::VerifyMode;
use crate::error::{Error, VerifyFailure};
use crate::store::CertificateStore;
use crate::verify::{invoke_verify_callback, StoreContext, VerifyCallback, VerifyErrorCode, VerifyParam};
use crate::x509::{Certificate, CertificateChain};

/// What the last peer verification produced, read back by the session.
#[derive(Default)]
pub(crate) struct VerifyReport {
    pub context: Option<StoreContext>,
    pub accepted: bool,
    pub failure: Option<VerifyFailure>,
    pub panic: Option<Error>,
}

pub(crate) type SharedReport = Arc<Mutex<VerifyReport>>;

pub(crate) fn lock_report(report: &SharedReport) -> MutexGuard<'_, VerifyReport> {
    match report.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Verifies the peer chain against a [`CertificateStore`].
///
/// Used as the server verifier on client sessions and as the client
/// verifier on server sessions. `param` already carries the purpose for the
/// role and the expected host.
pub(crate) struct PeerVerifier {
    store: CertificateStore,
    param: VerifyParam,
    callback: Option<VerifyCallback>,
    mode: VerifyMode,
    report: SharedReport,
    provider: Arc<CryptoProvider>,
}

impl PeerVerifier {
    pub fn new(
        store: CertificateStore,
        param: VerifyParam,
        callback: Option<VerifyCallback>,
        mode: VerifyMode,
        report: SharedReport,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            store,
            param,
            callback,
            mode,
            report,
            provider,
        }
    }

    fn verify_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), rustls::Error> {
        let mut chain = CertificateChain::new();
        for der in std::iter::once(end_entity).chain(intermediates) {
            let certificate = Certificate::from_der(der.as_ref().to_vec()).map_err(|e| {
                tracing::debug!("peer sent an unparsable certificate: {}", e);
                rustls::Error::InvalidCertificate(CertificateError::BadEncoding)
            })?;
            chain.add_certificate(&certificate);
        }

        let context = self.prepare(&chain, now).map_err(general)?;
        let chain_ok = match context.verify() {
            Ok(ok) => ok,
            Err(panic @ Error::CallbackPanic(_)) => {
                lock_report(&self.report).panic = Some(panic);
                return Err(rustls::Error::General(
                    "certificate lookup callback panicked".to_string(),
                ));
            }
            Err(e) => return Err(general(e)),
        };

        let accepted = match &self.callback {
            Some(callback) => match invoke_verify_callback(callback.as_ref(), &context) {
                Ok(accepted) => accepted,
                Err(panic) => {
                    lock_report(&self.report).panic = Some(panic);
                    return Err(rustls::Error::General(
                        "certificate verify callback panicked".to_string(),
                    ));
                }
            },
            None => chain_ok,
        };

        let failure = if accepted { None } else { context.failure() };
        {
            let mut report = lock_report(&self.report);
            report.context = Some(context);
            report.accepted = accepted;
            report.failure = failure.clone();
        }

        match failure {
            None => Ok(()),
            Some(failure) if self.mode == VerifyMode::None => {
                tracing::debug!("ignoring peer verification failure: {}", failure);
                Ok(())
            }
            Some(failure) => {
                tracing::debug!("peer verification failed: {}", failure);
                Err(rustls::Error::InvalidCertificate(certificate_error(failure)))
            }
        }
    }

    fn prepare(&self, chain: &CertificateChain, now: UnixTime) -> Result<StoreContext, Error> {
        let param = self.param.copy()?;
        param.set_time(UNIX_EPOCH + Duration::from_secs(now.as_secs()))?;
        let context = StoreContext::new();
        context.initialize(&self.store, chain)?;
        context.set_verify_param(&param)?;
        Ok(context)
    }
}

fn general(error: Error) -> rustls::Error {
    rustls::Error::General(error.to_string())
}

fn certificate_error(failure: VerifyFailure) -> CertificateError {
    use VerifyErrorCode as V;

    match failure.code {
        V::CertHasExpired => CertificateError::Expired,
        V::CertNotYetValid => CertificateError::NotValidYet,
        V::CertRevoked => CertificateError::Revoked,
        V::CertSignatureFailure => CertificateError::BadSignature,
        V::HostnameMismatch | V::IpAddressMismatch => CertificateError::NotValidForName,
        V::InvalidPurpose => CertificateError::InvalidPurpose,
        V::UnableToGetCrl => CertificateError::UnknownRevocationStatus,
        V::ApplicationVerification => CertificateError::ApplicationVerificationFailure,
        V::UnableToGetIssuerCert
        | V::UnableToGetIssuerCertLocally
        | V::UnableToVerifyLeafSignature
        | V::DepthZeroSelfSignedCert
        | V::SelfSignedCertInChain
        | V::CertUntrusted => CertificateError::UnknownIssuer,
        _ => CertificateError::Other(OtherError(Arc::new(Error::VerificationFailed(failure)))),
    }
}

impl fmt::Debug for PeerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerVerifier")
            .field("mode", &self.mode)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl ServerCertVerifier for PeerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.verify_chain(end_entity, intermediates, now)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl ClientCertVerifier for PeerVerifier {
    fn offer_client_auth(&self) -> bool {
        self.mode != VerifyMode::None
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mode == VerifyMode::PeerRequireCertificate
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        self.verify_chain(end_entity, intermediates, now)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
