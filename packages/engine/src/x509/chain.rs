use super::Certificate;

/// Ordered certificate sequence, leaf first.
#[derive(Debug, Clone, Default)]
pub struct CertificateChain {
    certificates: Vec<Certificate>,
}

impl CertificateChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_certificates(certificates: impl IntoIterator<Item = Certificate>) -> Self {
        Self {
            certificates: certificates.into_iter().collect(),
        }
    }

    pub fn add_certificate(&mut self, certificate: &Certificate) {
        self.certificates.push(certificate.clone());
    }

    pub fn count(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Certificate> {
        self.certificates.get(index)
    }

    pub fn leaf(&self) -> Option<&Certificate> {
        self.certificates.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Certificate> {
        self.certificates.iter()
    }

    pub fn as_slice(&self) -> &[Certificate] {
        &self.certificates
    }
}

impl<'a> IntoIterator for &'a CertificateChain {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certificates.iter()
    }
}

impl FromIterator<Certificate> for CertificateChain {
    fn from_iter<I: IntoIterator<Item = Certificate>>(iter: I) -> Self {
        Self::from_certificates(iter)
    }
}
