//! Chain building and verification

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use super::error::VerifyErrorCode;
use super::hostname;
use super::param::{ParamData, Purpose, VerifyFlags, VerifyParam};
use crate::error::{Error, Result, VerifyFailure};
use crate::handle::Handle;
use crate::store::CertificateStore;
use crate::x509::{
    key_usage, CertData, Certificate, CertificateChain, DistinguishedName, ExtendedKeyUsages,
};

struct Outcome {
    error: VerifyErrorCode,
    depth: usize,
    current: Option<Certificate>,
    issuer: Option<Certificate>,
    chain: CertificateChain,
}

struct ContextState {
    store: Option<CertificateStore>,
    untrusted: CertificateChain,
    param: Option<VerifyParam>,
    outcome: Option<Outcome>,
    exception: Option<Error>,
}

/// State of one chain verification.
///
/// Clones share the same state, including the result once
/// [`StoreContext::verify`] has run.
#[derive(Clone)]
pub struct StoreContext {
    handle: Handle<RwLock<ContextState>>,
}

impl StoreContext {
    pub fn new() -> Self {
        Self {
            handle: Handle::new(
                "store context",
                RwLock::new(ContextState {
                    store: None,
                    untrusted: CertificateChain::new(),
                    param: None,
                    outcome: None,
                    exception: None,
                }),
            ),
        }
    }

    fn read<R>(&self, op: impl FnOnce(&ContextState) -> Result<R>) -> Result<R> {
        self.handle.with(|state| op(&read_state(state)))
    }

    fn write<R>(&self, op: impl FnOnce(&mut ContextState) -> Result<R>) -> Result<R> {
        self.handle.with(|state| op(&mut write_state(state)))
    }

    /// Bind the trust store and the presented chain, leaf first.
    pub fn initialize(&self, store: &CertificateStore, chain: &CertificateChain) -> Result<()> {
        if chain.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot verify an empty certificate chain".to_string(),
            ));
        }
        self.write(|state| {
            state.store = Some(store.clone());
            state.untrusted = chain.clone();
            state.outcome = None;
            state.exception = None;
            Ok(())
        })
    }

    /// Use a private copy of `param` for this verification.
    pub fn set_verify_param(&self, param: &VerifyParam) -> Result<()> {
        let copy = param.copy()?;
        self.write(|state| {
            state.param = Some(copy);
            Ok(())
        })
    }

    /// The context's own parameters; `peer_name` is filled in by verification.
    pub fn verify_param(&self) -> Result<VerifyParam> {
        let existing = self.read(|state| Ok(state.param.clone()))?;
        if let Some(param) = existing {
            return Ok(param);
        }
        let param = VerifyParam::lookup("default")?.copy()?;
        self.write(|state| Ok(state.param.get_or_insert(param).clone()))
    }

    /// Build and check the chain.
    ///
    /// Returns `Ok(false)` for a chain that does not verify; details are
    /// available from [`StoreContext::error`] and friends. A panic raised by
    /// a lookup callback is reported as an error after the result has been
    /// recorded.
    pub fn verify(&self) -> Result<bool> {
        let (store, untrusted) = self.read(|state| {
            let store = state
                .store
                .clone()
                .ok_or_else(|| Error::state("store context is not initialized"))?;
            Ok((store, state.untrusted.clone()))
        })?;
        let param = self.verify_param()?;
        let params = param.snapshot()?;
        store.seal()?;

        let mut verifier = ChainVerifier {
            store: &store,
            params: &params,
            panic: None,
            peer_name: None,
        };
        let outcome = verifier.run(untrusted.as_slice())?;
        let ok = outcome.error.is_ok();
        let peer_name = verifier.peer_name.take();
        let panic = verifier.panic.take();

        if ok {
            tracing::info!(
                "verified chain of {} certificates{}",
                outcome.chain.count(),
                peer_name
                    .as_deref()
                    .map(|host| format!(" for {host}"))
                    .unwrap_or_default()
            );
        } else {
            tracing::debug!(
                "chain verification failed at depth {}: {}",
                outcome.depth,
                outcome.error
            );
        }

        param.update(|data| data.peer_name = peer_name)?;
        self.write(|state| {
            state.outcome = Some(outcome);
            state.exception = panic.clone();
            Ok(())
        })?;
        match panic {
            Some(panic) => Err(panic),
            None => Ok(ok),
        }
    }

    fn outcome<R>(&self, op: impl FnOnce(&Outcome) -> R) -> Result<R> {
        self.read(|state| {
            state
                .outcome
                .as_ref()
                .map(op)
                .ok_or_else(|| Error::state("store context has not been verified"))
        })
    }

    /// `1` when the chain verified, `0` otherwise.
    pub fn verify_result(&self) -> Result<i32> {
        self.outcome(|outcome| i32::from(outcome.error.is_ok()))
    }

    /// Recorded error; `Ok` before verification.
    pub fn error(&self) -> Result<VerifyErrorCode> {
        self.read(|state| {
            Ok(state
                .outcome
                .as_ref()
                .map_or(VerifyErrorCode::Ok, |outcome| outcome.error))
        })
    }

    pub fn error_string(&self) -> Result<String> {
        Ok(self.error()?.message().to_string())
    }

    pub fn error_depth(&self) -> Result<usize> {
        self.read(|state| Ok(state.outcome.as_ref().map_or(0, |outcome| outcome.depth)))
    }

    /// Panic captured from application code during the last verification.
    pub fn exception(&self) -> Option<Error> {
        self.read(|state| Ok(state.exception.clone())).ok().flatten()
    }

    /// The path built by the last verification, leaf first.
    pub fn chain(&self) -> Result<CertificateChain> {
        self.outcome(|outcome| outcome.chain.clone())
    }

    /// The presented certificates, leaf first.
    pub fn untrusted(&self) -> Result<CertificateChain> {
        self.read(|state| Ok(state.untrusted.clone()))
    }

    pub fn current_certificate(&self) -> Result<Option<Certificate>> {
        self.outcome(|outcome| outcome.current.clone())
    }

    pub fn current_issuer(&self) -> Result<Option<Certificate>> {
        self.outcome(|outcome| outcome.issuer.clone())
    }

    /// Failure details of the last verification, if it failed.
    pub fn failure(&self) -> Option<VerifyFailure> {
        self.read(|state| {
            Ok(state.outcome.as_ref().and_then(|outcome| {
                (!outcome.error.is_ok()).then(|| VerifyFailure {
                    code: outcome.error,
                    depth: outcome.depth,
                    certificate: outcome.current.clone(),
                })
            }))
        })
        .ok()
        .flatten()
    }

    pub fn lookup_by_subject(&self, name: &DistinguishedName) -> Result<Option<Certificate>> {
        let store = self.read(|state| {
            state
                .store
                .clone()
                .ok_or_else(|| Error::state("store context is not initialized"))
        })?;
        store.lookup_by_subject(name)
    }

    /// Overwrite the recorded error, as an application callback rejecting
    /// an otherwise valid chain does.
    pub(crate) fn set_error(&self, code: VerifyErrorCode, depth: usize) -> Result<()> {
        self.write(|state| {
            let outcome = state
                .outcome
                .as_mut()
                .ok_or_else(|| Error::state("store context has not been verified"))?;
            outcome.error = code;
            outcome.depth = depth;
            outcome.current = outcome.chain.get(depth).cloned();
            outcome.issuer = outcome.chain.get(depth + 1).cloned();
            Ok(())
        })
    }

    pub(crate) fn set_exception(&self, error: Error) -> Result<()> {
        self.write(|state| {
            state.exception = Some(error);
            Ok(())
        })
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn close(&self) {
        self.handle.release();
    }
}

impl Default for StoreContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext")
            .field("error", &self.error().ok())
            .field("depth", &self.error_depth().ok())
            .finish()
    }
}

fn read_state(state: &RwLock<ContextState>) -> RwLockReadGuard<'_, ContextState> {
    state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_state(state: &RwLock<ContextState>) -> RwLockWriteGuard<'_, ContextState> {
    state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Failure {
    code: VerifyErrorCode,
    depth: usize,
}

impl Failure {
    fn at(code: VerifyErrorCode, depth: usize) -> Option<Self> {
        Some(Self { code, depth })
    }
}

struct ChainVerifier<'a> {
    store: &'a CertificateStore,
    params: &'a ParamData,
    panic: Option<Error>,
    peer_name: Option<String>,
}

fn seconds_since_epoch(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

impl ChainVerifier<'_> {
    fn run(&mut self, presented: &[Certificate]) -> Result<Outcome> {
        let (path, build_failure) = self.build(presented)?;
        let failure = match build_failure {
            Some(failure) => Some(failure),
            None => self.check(&path)?,
        };

        let outcome = match failure {
            None => Outcome {
                error: VerifyErrorCode::Ok,
                depth: 0,
                current: path.first().cloned(),
                issuer: path.get(1).cloned(),
                chain: CertificateChain::from_certificates(path),
            },
            Some(Failure { code, depth }) => Outcome {
                error: code,
                depth,
                current: path.get(depth).cloned(),
                issuer: match code {
                    VerifyErrorCode::UnableToGetIssuerCert
                    | VerifyErrorCode::UnableToGetIssuerCertLocally
                    | VerifyErrorCode::DepthZeroSelfSignedCert
                    | VerifyErrorCode::SelfSignedCertInChain => None,
                    _ => path.get(depth + 1).cloned(),
                },
                chain: CertificateChain::from_certificates(path),
            },
        };
        Ok(outcome)
    }

    fn note_panic(&mut self, panic: Option<Error>) {
        if self.panic.is_none() {
            self.panic = panic;
        }
    }

    fn is_trusted(&mut self, certificate: &Certificate) -> Result<bool> {
        let found = self.store.is_trusted(certificate)?;
        self.note_panic(found.panic);
        Ok(!found.certificates.is_empty())
    }

    /// Trusted issuer of `certificate`, preferring one whose key verifies
    /// the signature.
    fn trusted_issuer(&mut self, certificate: &Certificate) -> Result<Option<Certificate>> {
        let found = self
            .store
            .trusted_issuers(&certificate.issuer_name()?, false)?;
        self.note_panic(found.panic);
        let mut fallback = None;
        for candidate in found.certificates {
            if certificate.is_signed_by(&candidate)? {
                return Ok(Some(candidate));
            }
            fallback.get_or_insert(candidate);
        }
        Ok(fallback)
    }

    fn build(&mut self, presented: &[Certificate]) -> Result<(Vec<Certificate>, Option<Failure>)> {
        let leaf = presented
            .first()
            .cloned()
            .ok_or_else(|| Error::state("store context has no certificates"))?;
        let mut pool: Vec<Certificate> = presented[1..].to_vec();
        let mut path = vec![leaf];
        let mut trusted = false;
        let max_len = self.params.effective_depth().saturating_add(1);
        let partial = self.params.flags.contains(VerifyFlags::PARTIAL_CHAIN);

        let failure = loop {
            let top = path.len() - 1;
            let current = path[top].clone();
            let data = current.data()?;
            let self_issued = data.is_self_issued();

            if !trusted && (self_issued || partial) && self.is_trusted(&current)? {
                trusted = true;
            }
            if self_issued {
                if trusted {
                    break None;
                }
                let code = if top == 0 {
                    VerifyErrorCode::DepthZeroSelfSignedCert
                } else {
                    VerifyErrorCode::SelfSignedCertInChain
                };
                break Failure::at(code, top);
            }
            if partial && trusted {
                break None;
            }

            let mut next = self.trusted_issuer(&current)?;
            if next.is_some() {
                trusted = true;
            } else if !trusted {
                let mut position = None;
                for (index, candidate) in pool.iter().enumerate() {
                    if candidate.data()?.subject_canonical == data.issuer_canonical {
                        position = Some(index);
                        break;
                    }
                }
                next = position.map(|index| pool.remove(index));
            }

            let Some(issuer) = next else {
                let code = if trusted {
                    VerifyErrorCode::UnableToGetIssuerCert
                } else {
                    VerifyErrorCode::UnableToGetIssuerCertLocally
                };
                break Failure::at(code, top);
            };
            let mut looped = false;
            for seen in &path {
                looped |= seen.same_as(&issuer)?;
            }
            if looped {
                break Failure::at(VerifyErrorCode::UnableToGetIssuerCertLocally, top);
            }
            path.push(issuer);
            if path.len() > max_len {
                break Failure::at(VerifyErrorCode::CertChainTooLong, path.len() - 1);
            }
        };
        Ok((path, failure))
    }

    fn check(&mut self, path: &[Certificate]) -> Result<Option<Failure>> {
        let data = path
            .iter()
            .map(Certificate::data)
            .collect::<Result<Vec<_>>>()?;

        if let Some(failure) = self.check_extensions(&data) {
            return Ok(Some(failure));
        }
        if let Some(failure) = self.check_host(&data[0]) {
            return Ok(Some(failure));
        }
        if let Some(failure) = self.check_revocation(path, &data)? {
            return Ok(Some(failure));
        }
        self.check_signatures_and_times(path, &data)
    }

    fn check_extensions(&self, chain: &[Arc<CertData>]) -> Option<Failure> {
        let strict = self.params.strict();
        let mut plen: u32 = 0;
        for (depth, cert) in chain.iter().enumerate() {
            if depth > 0 && !ca_allowed(cert, strict) {
                return Failure::at(VerifyErrorCode::InvalidCa, depth);
            }
            if let Some(purpose) = self.params.purpose {
                if !purpose_allowed(cert, purpose, depth > 0) {
                    return Failure::at(VerifyErrorCode::InvalidPurpose, depth);
                }
            }
            if depth > 1 && !cert.is_self_issued() {
                if let Some((_, Some(limit))) = cert.basic_constraints {
                    if plen > limit.saturating_add(1) {
                        return Failure::at(VerifyErrorCode::PathLengthExceeded, depth);
                    }
                }
            }
            if !cert.is_self_issued() {
                plen += 1;
            }
        }
        None
    }

    fn check_host(&mut self, leaf: &CertData) -> Option<Failure> {
        let hosts = &self.params.hosts;
        if hosts.is_empty() {
            return None;
        }
        match hosts
            .iter()
            .find(|host| hostname::certificate_matches(leaf, host))
        {
            Some(host) => {
                self.peer_name = Some(host.clone());
                None
            }
            None if hosts.iter().all(|host| host.parse::<IpAddr>().is_ok()) => {
                Failure::at(VerifyErrorCode::IpAddressMismatch, 0)
            }
            None => Failure::at(VerifyErrorCode::HostnameMismatch, 0),
        }
    }

    fn check_revocation(
        &self,
        path: &[Certificate],
        chain: &[Arc<CertData>],
    ) -> Result<Option<Failure>> {
        if !self.params.crl_check() {
            return Ok(None);
        }
        let last = if self.params.crl_check_all() { chain.len() } else { 1 };
        let now = self.params.check_time().map(seconds_since_epoch);

        for depth in 0..last {
            let cert = &chain[depth];
            let is_root = depth + 1 == chain.len() && cert.is_self_issued();
            if is_root && depth > 0 {
                continue;
            }
            let issuer = path.get(depth + 1).unwrap_or(&path[depth]);
            let crls = self.store.crls_for(&cert.issuer_canonical)?;
            if crls.is_empty() {
                return Ok(Failure::at(VerifyErrorCode::UnableToGetCrl, depth));
            }
            let mut signed = None;
            for crl in crls {
                if crl.is_signed_by(issuer)? {
                    signed = Some(crl);
                    break;
                }
            }
            let Some(crl) = signed else {
                return Ok(Failure::at(VerifyErrorCode::CrlSignatureFailure, depth));
            };
            if let Some(now) = now {
                if seconds_since_epoch(crl.last_update()?) > now {
                    return Ok(Failure::at(VerifyErrorCode::CrlNotYetValid, depth));
                }
                if let Some(next) = crl.next_update()? {
                    if seconds_since_epoch(next) < now {
                        return Ok(Failure::at(VerifyErrorCode::CrlHasExpired, depth));
                    }
                }
            }
            if crl.get_by_cert(&path[depth])?.is_some() {
                return Ok(Failure::at(VerifyErrorCode::CertRevoked, depth));
            }
        }
        Ok(None)
    }

    fn check_signatures_and_times(
        &self,
        path: &[Certificate],
        chain: &[Arc<CertData>],
    ) -> Result<Option<Failure>> {
        let now = self.params.check_time().map(seconds_since_epoch);
        let check_self = self.params.flags.contains(VerifyFlags::CHECK_SS_SIGNATURE);

        for depth in (0..path.len()).rev() {
            let cert = &chain[depth];
            let issuer = match path.get(depth + 1) {
                Some(issuer) => Some(issuer),
                None if cert.is_self_issued() && check_self => Some(&path[depth]),
                None => None,
            };
            if let Some(issuer) = issuer {
                if !path[depth].is_signed_by(issuer)? {
                    return Ok(Failure::at(VerifyErrorCode::CertSignatureFailure, depth));
                }
            }
            if let Some(now) = now {
                if now < cert.not_before {
                    return Ok(Failure::at(VerifyErrorCode::CertNotYetValid, depth));
                }
                if now > cert.not_after {
                    return Ok(Failure::at(VerifyErrorCode::CertHasExpired, depth));
                }
            }
        }
        Ok(None)
    }
}

fn ca_allowed(cert: &CertData, strict: bool) -> bool {
    match cert.basic_constraints {
        Some((true, _)) => cert
            .key_usage
            .map_or(true, |usage| usage & key_usage::KEY_CERT_SIGN != 0),
        Some((false, _)) => false,
        None => !strict && cert.version == 1 && cert.is_self_issued(),
    }
}

fn purpose_allowed(cert: &CertData, purpose: Purpose, as_ca: bool) -> bool {
    let eku = cert.ext_key_usage;
    let eku_allows = |pick: fn(&ExtendedKeyUsages) -> bool| {
        eku.as_ref().map_or(true, |usages| usages.any || pick(usages))
    };
    let ku_allows = |mask: u16| as_ca || cert.key_usage.map_or(true, |usage| usage & mask != 0);

    match purpose {
        Purpose::SslClient => {
            eku_allows(|u| u.client_auth)
                && ku_allows(key_usage::DIGITAL_SIGNATURE | key_usage::KEY_AGREEMENT)
        }
        Purpose::SslServer | Purpose::NsSslServer => {
            eku_allows(|u| u.server_auth)
                && ku_allows(
                    key_usage::DIGITAL_SIGNATURE
                        | key_usage::KEY_ENCIPHERMENT
                        | key_usage::KEY_AGREEMENT,
                )
        }
        Purpose::SmimeSign => {
            eku_allows(|u| u.email_protection)
                && ku_allows(key_usage::DIGITAL_SIGNATURE | key_usage::NON_REPUDIATION)
        }
        Purpose::SmimeEncrypt => {
            eku_allows(|u| u.email_protection) && ku_allows(key_usage::KEY_ENCIPHERMENT)
        }
        Purpose::CrlSign => as_ca || cert.key_usage.map_or(true, |usage| usage & key_usage::CRL_SIGN != 0),
        Purpose::OcspHelper | Purpose::Any => true,
        Purpose::TimestampSign => {
            as_ca || eku.as_ref().is_some_and(|usages| usages.time_stamping)
        }
    }
}
