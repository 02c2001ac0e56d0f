//! Host name matching against certificate identities

use std::net::IpAddr;

use crate::x509::CertData;

/// Match a reference identity against the leaf.
///
/// IP literals compare against IP address SANs only. DNS names compare
/// against DNS SANs, falling back to the subject common names when the
/// certificate carries no DNS SAN at all.
pub(crate) fn certificate_matches(cert: &CertData, host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return cert.ip_addresses.contains(&ip);
    }

    if !cert.dns_names.is_empty() {
        return cert.dns_names.iter().any(|pattern| match_hostname(host, pattern));
    }
    let matched = cert.common_names.iter().any(|cn| match_hostname(host, cn));
    if matched {
        tracing::debug!("host {} matched through the subject common name", host);
    }
    matched
}

/// Case-insensitive comparison with single-label wildcard support.
///
/// `*.example.com` matches `www.example.com` but neither `example.com` nor
/// `a.b.example.com`. The wildcard must be the whole leftmost label and the
/// remainder must have at least two labels.
pub fn match_hostname(hostname: &str, pattern: &str) -> bool {
    let hostname = hostname.trim_end_matches('.').to_ascii_lowercase();
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    if hostname.is_empty() || pattern.is_empty() {
        return false;
    }

    if hostname == pattern {
        return true;
    }

    let Some(suffix) = pattern.strip_prefix("*.") else {
        return false;
    };
    if suffix.contains('*') || !suffix.contains('.') {
        return false;
    }
    match hostname.split_once('.') {
        Some((label, rest)) => !label.is_empty() && rest == suffix,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_case_insensitive() {
        assert!(match_hostname("Example.COM", "example.com"));
        assert!(match_hostname("example.com.", "example.com"));
        assert!(!match_hostname("example.org", "example.com"));
        assert!(!match_hostname("", ""));
    }

    #[test]
    fn wildcard_covers_one_label() {
        assert!(match_hostname("www.example.com", "*.example.com"));
        assert!(!match_hostname("example.com", "*.example.com"));
        assert!(!match_hostname("a.b.example.com", "*.example.com"));
        assert!(!match_hostname("www.example.com", "w*.example.com"));
    }

    #[test]
    fn wildcard_needs_a_registrable_suffix() {
        assert!(!match_hostname("example.com", "*.com"));
        assert!(!match_hostname("a.example.com", "*.*.com"));
    }
}
