mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use rcgen::{
    date_time_ymd, CertificateRevocationListParams, KeyIdMethod, RevocationReason,
    RevokedCertParams, SerialNumber,
};
use tessera_engine::verify::{invoke_verify_callback, MonoVerifyFlags};
use tessera_engine::{
    Certificate, CertificateChain, CertificateStore, Crl, DistinguishedName, Error, FileType,
    LookupCallback, LookupMethod, Result, StoreContext, VerifyErrorCode, VerifyFlags,
    VerifyParam, X509Format,
};

fn run(store: &CertificateStore, chain: &[Certificate], param: Option<&VerifyParam>) -> StoreContext {
    let ctx = StoreContext::new();
    ctx.initialize(store, &CertificateChain::from_certificates(chain.iter().cloned()))
        .unwrap();
    if let Some(param) = param {
        ctx.set_verify_param(param).unwrap();
    }
    ctx.verify().unwrap();
    ctx
}

fn trusting(root: &Certificate) -> CertificateStore {
    let store = CertificateStore::new();
    assert!(store.add_certificate(root).unwrap());
    store
}

#[test]
fn chain_to_a_trusted_root_verifies() {
    let pki = common::pki();
    let store = trusting(&pki.root.engine());
    let ctx = run(&store, &[pki.leaf.engine(), pki.intermediate.engine()], None);

    assert_eq!(ctx.verify_result().unwrap(), 1);
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::Ok);
    assert!(ctx.failure().is_none());
    let chain = ctx.chain().unwrap();
    assert_eq!(chain.count(), 3);
    assert!(chain.get(2).unwrap().same_as(&pki.root.engine()).unwrap());
}

#[test]
fn verification_is_deterministic() {
    let pki = common::pki();
    let store = trusting(&pki.root.engine());
    let chain = [pki.leaf.engine(), pki.intermediate.engine()];
    let untrusted = CertificateStore::new();

    for _ in 0..3 {
        let ok = run(&store, &chain, None);
        assert_eq!(ok.error().unwrap(), VerifyErrorCode::Ok);
        let failed = run(&untrusted, &chain, None);
        assert_eq!(
            failed.error().unwrap(),
            VerifyErrorCode::UnableToGetIssuerCertLocally
        );
        assert_eq!(failed.error_depth().unwrap(), 1);
    }
}

#[test]
fn missing_intermediate_is_reported() {
    let pki = common::pki();
    let store = trusting(&pki.root.engine());
    let ctx = run(&store, &[pki.leaf.engine()], None);
    assert_eq!(ctx.verify_result().unwrap(), 0);
    assert_eq!(
        ctx.error().unwrap(),
        VerifyErrorCode::UnableToGetIssuerCertLocally
    );
    assert_eq!(ctx.error_depth().unwrap(), 0);
    assert!(ctx.current_certificate().unwrap().unwrap().same_as(&pki.leaf.engine()).unwrap());
}

#[test]
fn self_signed_leaf_is_rejected() {
    let root = common::root("lonely.test");
    let ctx = run(&CertificateStore::new(), &[root.engine()], None);
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::DepthZeroSelfSignedCert);
    assert_eq!(ctx.error().unwrap().code(), 18);
}

#[test]
fn result_is_unavailable_before_verify() {
    let ctx = StoreContext::new();
    assert!(matches!(ctx.verify_result(), Err(Error::InvalidState(_))));
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::Ok);
    assert!(matches!(
        ctx.initialize(&CertificateStore::new(), &CertificateChain::new()),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn host_names_are_checked() {
    let pki = common::pki();
    let store = trusting(&pki.root.engine());
    let chain = [pki.leaf.engine(), pki.intermediate.engine()];

    let param = VerifyParam::ssl_server().unwrap().copy().unwrap();
    param.set_host("localhost").unwrap();
    let ctx = run(&store, &chain, Some(&param));
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::Ok);
    assert_eq!(
        ctx.verify_param().unwrap().peer_name().unwrap().as_deref(),
        Some("localhost")
    );

    param.set_host("example.com").unwrap();
    let ctx = run(&store, &chain, Some(&param));
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::HostnameMismatch);

    param.set_host("10.0.0.1").unwrap();
    let ctx = run(&store, &chain, Some(&param));
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::IpAddressMismatch);
}

#[test]
fn presets_are_read_only() {
    let preset = VerifyParam::ssl_server().unwrap();
    assert!(!preset.can_modify());
    assert!(matches!(preset.set_host("a.test"), Err(Error::InvalidState(_))));
    assert!(preset.copy().unwrap().can_modify());
    assert!(matches!(
        VerifyParam::lookup("no-such-preset"),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn verification_time_controls_validity() {
    let pki = common::pki();
    let store = trusting(&pki.root.engine());
    let chain = [pki.leaf.engine(), pki.intermediate.engine()];

    let param = VerifyParam::new();
    // rcgen certificates are valid from 1975 to 4096.
    param.set_time(UNIX_EPOCH + Duration::from_secs(60)).unwrap();
    let ctx = run(&store, &chain, Some(&param));
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::CertNotYetValid);

    param.set_flags(VerifyFlags::NO_CHECK_TIME).unwrap();
    let ctx = run(&store, &chain, Some(&param));
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::Ok);
}

#[test]
fn expired_leaf_is_reported_at_depth_zero() {
    let pki = common::pki();
    let expired = common::leaf_with(&pki.intermediate, &["old.test"], |params| {
        params.not_before = date_time_ymd(2000, 1, 1);
        params.not_after = date_time_ymd(2001, 1, 1);
    });
    let store = trusting(&pki.root.engine());
    let ctx = run(&store, &[expired.engine(), pki.intermediate.engine()], None);
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::CertHasExpired);
    assert_eq!(ctx.error_depth().unwrap(), 0);
}

#[test]
fn depth_limits_chain_length() {
    let pki = common::pki();
    let store = trusting(&pki.root.engine());
    let param = VerifyParam::new();
    param.set_depth(0).unwrap();
    let ctx = run(&store, &[pki.leaf.engine(), pki.intermediate.engine()], Some(&param));
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::CertChainTooLong);
}

fn revoking_crl(authority: &common::Authority, serial: u8) -> Crl {
    let crl = CertificateRevocationListParams {
        this_update: date_time_ymd(2020, 1, 1),
        next_update: date_time_ymd(2999, 1, 1),
        crl_number: SerialNumber::from_slice(&[1]),
        issuing_distribution_point: None,
        revoked_certs: vec![RevokedCertParams {
            serial_number: SerialNumber::from_slice(&[serial]),
            revocation_time: date_time_ymd(2021, 1, 1),
            reason_code: Some(RevocationReason::KeyCompromise),
            invalidity_date: None,
        }],
        key_identifier_method: KeyIdMethod::Sha256,
    }
    .signed_by(&authority.issuer)
    .unwrap();
    Crl::load_from_data(crl.der(), X509Format::Der).unwrap()
}

#[test]
fn revoked_leaf_fails_with_crl_check() {
    let pki = common::pki();
    let store = trusting(&pki.root.engine());
    let crl = revoking_crl(&pki.intermediate, 0x42);
    assert!(crl.get_by_cert(&pki.leaf.engine()).unwrap().is_some());
    store.add_crl(&crl).unwrap();

    let param = VerifyParam::new();
    param.set_mono_flags(MonoVerifyFlags::CRL_CHECK).unwrap();
    let chain = [pki.leaf.engine(), pki.intermediate.engine()];
    let ctx = run(&store, &chain, Some(&param));
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::CertRevoked);
    assert_eq!(ctx.error_depth().unwrap(), 0);

    // Without the flag the CRL is not consulted.
    let ctx = run(&store, &chain, None);
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::Ok);
}

#[test]
fn crl_check_without_a_crl_is_an_error() {
    let pki = common::pki();
    let store = trusting(&pki.root.engine());
    let param = VerifyParam::new();
    param.set_flags(VerifyFlags::CRL_CHECK).unwrap();
    let ctx = run(&store, &[pki.leaf.engine(), pki.intermediate.engine()], Some(&param));
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::UnableToGetCrl);
}

#[test]
fn collection_lookup_supplies_the_anchor() {
    let pki = common::pki();
    let store = CertificateStore::new();
    store
        .add_lookup(LookupMethod::collection([pki.root.engine()]))
        .unwrap();
    let ctx = run(&store, &[pki.leaf.engine(), pki.intermediate.engine()], None);
    assert_eq!(ctx.error().unwrap(), VerifyErrorCode::Ok);
}

struct Exploding;

impl LookupCallback for Exploding {
    fn by_subject(&self, _name: &DistinguishedName) -> Result<Option<Certificate>> {
        panic!("lookup exploded");
    }
}

#[test]
fn lookup_panic_is_raised_after_verification() {
    let pki = common::pki();
    let store = CertificateStore::new();
    store
        .add_lookup(LookupMethod::Callback(Arc::new(Exploding)))
        .unwrap();

    let ctx = StoreContext::new();
    ctx.initialize(
        &store,
        &CertificateChain::from_certificates([pki.leaf.engine(), pki.intermediate.engine()]),
    )
    .unwrap();
    let err = ctx.verify().unwrap_err();
    assert!(matches!(err, Error::CallbackPanic(ref m) if m == "lookup exploded"));
    assert!(matches!(ctx.exception(), Some(Error::CallbackPanic(_))));
    assert_eq!(ctx.verify_result().unwrap(), 0);
}

#[test]
fn store_lookups_answer_subject_and_fingerprint_queries() {
    let pki = common::pki();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intermediate.pem");
    std::fs::write(&path, pki.intermediate.cert.pem()).unwrap();

    let store = trusting(&pki.root.engine());
    let file = store.add_lookup(LookupMethod::File).unwrap();
    assert_eq!(file.load_file(&path, FileType::Pem).unwrap(), 1);
    store
        .add_lookup(LookupMethod::collection([pki.leaf.engine()]))
        .unwrap();

    for expected in [pki.root.engine(), pki.intermediate.engine(), pki.leaf.engine()] {
        let by_fingerprint = store
            .lookup_by_fingerprint(&expected.cert_hash().unwrap())
            .unwrap()
            .unwrap();
        assert!(by_fingerprint.same_as(&expected).unwrap());

        let by_subject = store
            .lookup_by_subject(&expected.subject_name().unwrap())
            .unwrap()
            .unwrap();
        assert!(by_subject.same_as(&expected).unwrap());
    }
    assert!(store.lookup_by_fingerprint(&[0u8; 20]).unwrap().is_none());
}

struct ExplodingFingerprints;

impl LookupCallback for ExplodingFingerprints {
    fn by_subject(&self, _name: &DistinguishedName) -> Result<Option<Certificate>> {
        Ok(None)
    }

    fn by_fingerprint(&self, _fingerprint: &[u8]) -> Result<Option<Certificate>> {
        panic!("fingerprint lookup exploded");
    }
}

#[test]
fn fingerprint_lookup_panics_surface_as_errors() {
    let pki = common::pki();
    let store = trusting(&pki.root.engine());
    store
        .add_lookup(LookupMethod::Callback(Arc::new(ExplodingFingerprints)))
        .unwrap();

    // Anchors are consulted before any lookup.
    assert!(store
        .lookup_by_fingerprint(&pki.root.engine().cert_hash().unwrap())
        .unwrap()
        .is_some());
    let err = store
        .lookup_by_fingerprint(&pki.leaf.engine().cert_hash().unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::CallbackPanic(ref m) if m == "fingerprint lookup exploded"));
}

#[test]
fn verify_callback_can_override_and_reject() {
    let pki = common::pki();
    let chain = [pki.leaf.engine(), pki.intermediate.engine()];

    let failed = run(&CertificateStore::new(), &chain, None);
    let calls = AtomicUsize::new(0);
    let accept_all = |ctx: &StoreContext| {
        calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(ctx.verify_result().unwrap(), 0);
        true
    };
    assert!(invoke_verify_callback(&accept_all, &failed).unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let passed = run(&trusting(&pki.root.engine()), &chain, None);
    assert!(!invoke_verify_callback(&|_: &StoreContext| false, &passed).unwrap());
    assert_eq!(
        passed.error().unwrap(),
        VerifyErrorCode::ApplicationVerification
    );
}

#[test]
fn verify_callback_panic_is_recorded() {
    let pki = common::pki();
    let ctx = run(&CertificateStore::new(), &[pki.leaf.engine()], None);
    let err = invoke_verify_callback(&|_: &StoreContext| -> bool { panic!("policy bug") }, &ctx)
        .unwrap_err();
    assert!(matches!(err, Error::CallbackPanic(ref m) if m == "policy bug"));
    assert!(matches!(ctx.exception(), Some(Error::CallbackPanic(_))));
}
