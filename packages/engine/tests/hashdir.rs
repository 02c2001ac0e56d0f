mod common;

use std::fs;

use tessera_engine::store::hashdir::{convert_directory, install_certificate};
use tessera_engine::{
    CertificateChain, CertificateStore, FileType, LookupMethod, NameHashAlgorithm, StoreContext,
    VerifyErrorCode, X509Format,
};

#[test]
fn colliding_subjects_fill_consecutive_slots() {
    let dir = tempfile::tempdir().unwrap();
    let first = common::root("Collision Root");
    let second = common::root("Collision Root");

    let a = install_certificate(dir.path(), &first.engine(), NameHashAlgorithm::Current).unwrap();
    let b = install_certificate(dir.path(), &second.engine(), NameHashAlgorithm::Current).unwrap();

    let hash = first.engine().subject_name_hash().unwrap();
    assert_eq!(a.file_name().unwrap(), format!("{hash:08x}.0").as_str());
    assert_eq!(b.file_name().unwrap(), format!("{hash:08x}.1").as_str());

    let contents = fs::read_to_string(&a).unwrap();
    assert!(contents.contains("-----BEGIN CERTIFICATE-----"));
    assert!(contents.contains(&format!(
        "SHA1 Fingerprint={}",
        first.engine().fingerprint_string().unwrap()
    )));
}

#[test]
fn issuer_in_the_collision_slot_is_discovered() {
    let dir = tempfile::tempdir().unwrap();
    let decoy = common::root("Collision Root");
    let real = common::root("Collision Root");
    install_certificate(dir.path(), &decoy.engine(), NameHashAlgorithm::Current).unwrap();
    install_certificate(dir.path(), &real.engine(), NameHashAlgorithm::Current).unwrap();
    let leaf = common::leaf(&real, &["collision.test"]);

    let store = CertificateStore::new();
    let lookup = store
        .add_lookup(LookupMethod::HashDir(NameHashAlgorithm::Current))
        .unwrap();
    lookup.add_directory(dir.path(), FileType::Pem).unwrap();

    let name = real.engine().subject_name().unwrap();
    let first = lookup.by_subject(&name).unwrap().unwrap();
    assert!(first.same_as(&decoy.engine()).unwrap());
    assert_eq!(lookup.all_by_subject(&name).unwrap().len(), 2);

    let ctx = StoreContext::new();
    ctx.initialize(&store, &CertificateChain::from_certificates([leaf.engine()]))
        .unwrap();
    assert!(ctx.verify().unwrap());
    let chain = ctx.chain().unwrap();
    assert!(chain.get(1).unwrap().same_as(&real.engine()).unwrap());
}

#[test]
fn unreadable_slots_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let pki = common::pki();
    let root = pki.root.engine();
    let hash = root.subject_name_hash().unwrap();
    fs::write(dir.path().join(format!("{hash:08x}.0")), b"not a certificate").unwrap();
    let installed = install_certificate(dir.path(), &root, NameHashAlgorithm::Current).unwrap();
    assert!(installed.to_string_lossy().ends_with(".1"));

    let store = CertificateStore::new();
    store
        .add_lookup(LookupMethod::HashDir(NameHashAlgorithm::Current))
        .unwrap()
        .add_directory(dir.path(), FileType::Default)
        .unwrap();
    let found = store.lookup_by_subject(&root.subject_name().unwrap()).unwrap();
    assert!(found.unwrap().same_as(&root).unwrap());
}

#[test]
fn old_hash_directories_need_the_old_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let pki = common::pki();
    install_certificate(dir.path(), &pki.root.engine(), NameHashAlgorithm::Old).unwrap();
    let chain = CertificateChain::from_certificates([pki.leaf.engine(), pki.intermediate.engine()]);

    for (algorithm, expected) in [
        (NameHashAlgorithm::Old, VerifyErrorCode::Ok),
        (NameHashAlgorithm::Current, VerifyErrorCode::UnableToGetIssuerCertLocally),
    ] {
        let store = CertificateStore::new();
        store
            .add_lookup(LookupMethod::HashDir(algorithm))
            .unwrap()
            .add_directory(dir.path(), FileType::Pem)
            .unwrap();
        let ctx = StoreContext::new();
        ctx.initialize(&store, &chain).unwrap();
        ctx.verify().unwrap();
        assert_eq!(ctx.error().unwrap(), expected, "{algorithm:?}");
    }
}

#[test]
fn der_directories_convert_to_hashed_layout() {
    let source = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let pki = common::pki();
    fs::write(source.path().join("root.cer"), pki.root.cert.der().as_ref()).unwrap();
    fs::write(source.path().join("intermediate.cer"), pki.intermediate.cert.der().as_ref())
        .unwrap();
    fs::write(source.path().join("broken.cer"), b"garbage").unwrap();
    fs::write(source.path().join("notes.txt"), b"ignored").unwrap();

    let installed =
        convert_directory(source.path(), target.path(), NameHashAlgorithm::Current).unwrap();
    assert_eq!(installed.len(), 2);
    for path in &installed {
        let pem = fs::read(path).unwrap();
        let cert = tessera_engine::Certificate::load_from_data(&pem, X509Format::Pem).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("{:08x}.0", cert.subject_name_hash().unwrap())
        );
    }
}

#[test]
fn file_lookup_loads_bundles() {
    let dir = tempfile::tempdir().unwrap();
    let pki = common::pki();
    let bundle = dir.path().join("bundle.pem");
    fs::write(&bundle, format!("{}{}", pki.root.cert.pem(), pki.intermediate.cert.pem())).unwrap();

    let store = CertificateStore::new();
    let lookup = store.add_lookup(LookupMethod::File).unwrap();
    assert_eq!(lookup.load_file(&bundle, FileType::Default).unwrap(), 2);

    let ctx = StoreContext::new();
    ctx.initialize(&store, &CertificateChain::from_certificates([pki.leaf.engine()]))
        .unwrap();
    assert!(ctx.verify().unwrap());
    assert_eq!(ctx.chain().unwrap().count(), 3);
}
