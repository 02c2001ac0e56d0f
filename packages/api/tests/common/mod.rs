//! Server identity and client trust generated with rcgen

#![allow(dead_code)]

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, Issuer, KeyPair};
use tessera::{Certificate, Identity, TlsSettings};

pub struct Fixture {
    pub root_pem: String,
    pub chain_pem: String,
    pub key_pem: String,
}

impl Fixture {
    pub fn root(&self) -> Certificate {
        Certificate::load_all_pem(self.root_pem.as_bytes())
            .unwrap()
            .remove(0)
    }

    pub fn identity(&self) -> Identity {
        Identity::from_pem(self.chain_pem.as_bytes(), self.key_pem.as_bytes()).unwrap()
    }

    pub fn server(&self) -> TlsSettings {
        TlsSettings::server(self.identity())
    }

    pub fn client(&self, host: &str) -> TlsSettings {
        TlsSettings::client(host).trust_certificates([self.root()])
    }
}

fn authority(common_name: &str, parent: Option<&Issuer<'static, KeyPair>>) -> (String, Issuer<'static, KeyPair>) {
    let mut params = CertificateParams::new(Vec::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    let key = KeyPair::generate().unwrap();
    let cert = match parent {
        Some(parent) => params.signed_by(&key, parent).unwrap(),
        None => params.self_signed(&key).unwrap(),
    };
    (cert.pem(), Issuer::new(params, key))
}

/// Root CA, intermediate, and a `localhost` server certificate.
pub fn fixture() -> Fixture {
    let (root_pem, root) = authority("Tessera API Root", None);
    let (intermediate_pem, intermediate) = authority("Tessera API Intermediate", Some(&root));

    let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, "localhost");
    let key = KeyPair::generate().unwrap();
    let leaf = params.signed_by(&key, &intermediate).unwrap();

    Fixture {
        root_pem,
        chain_pem: format!("{}{}", leaf.pem(), intermediate_pem),
        key_pem: key.serialize_pem(),
    }
}
