//! Certificate fixtures generated with rcgen

#![allow(dead_code)]

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    SerialNumber,
};
use tessera_engine::{Certificate, PrivateKey, X509Format};

pub struct Authority {
    pub cert: rcgen::Certificate,
    pub issuer: Issuer<'static, KeyPair>,
}

impl Authority {
    pub fn engine(&self) -> Certificate {
        engine_cert(&self.cert)
    }
}

pub struct Leaf {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl Leaf {
    pub fn engine(&self) -> Certificate {
        engine_cert(&self.cert)
    }

    pub fn engine_key(&self) -> PrivateKey {
        PrivateKey::from_pkcs8_der(&self.key.serialize_der()).unwrap()
    }
}

/// Root, intermediate and a `localhost` leaf signed by the intermediate.
pub struct Pki {
    pub root: Authority,
    pub intermediate: Authority,
    pub leaf: Leaf,
}

fn name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "Tessera Tests");
    dn.push(DnType::CommonName, common_name);
    dn
}

pub fn root(common_name: &str) -> Authority {
    let mut params = CertificateParams::new(Vec::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name = name(common_name);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    Authority {
        cert,
        issuer: Issuer::new(params, key),
    }
}

pub fn intermediate(parent: &Authority, common_name: &str) -> Authority {
    let mut params = CertificateParams::new(Vec::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name = name(common_name);
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &parent.issuer).unwrap();
    Authority {
        cert,
        issuer: Issuer::new(params, key),
    }
}

pub fn leaf_with(parent: &Authority, names: &[&str], edit: impl FnOnce(&mut CertificateParams)) -> Leaf {
    let mut params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    params.distinguished_name = name(names.first().copied().unwrap_or("leaf"));
    params.serial_number = Some(SerialNumber::from_slice(&[0x42]));
    edit(&mut params);
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &parent.issuer).unwrap();
    Leaf { cert, key }
}

pub fn leaf(parent: &Authority, names: &[&str]) -> Leaf {
    leaf_with(parent, names, |_| {})
}

pub fn pki() -> Pki {
    let root = root("Tessera Test Root");
    let intermediate = intermediate(&root, "Tessera Test Intermediate");
    let leaf = leaf(&intermediate, &["localhost"]);
    Pki {
        root,
        intermediate,
        leaf,
    }
}

pub fn engine_cert(cert: &rcgen::Certificate) -> Certificate {
    Certificate::load_from_data(cert.der(), X509Format::Der).unwrap()
}
