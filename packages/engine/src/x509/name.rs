//! Distinguished names and subject-name hashing
//!
//! Hashed certificate directories name each file after a 32-bit hash of the
//! certificate subject. Two algorithms are in use:
//!
//! * **current**: SHA-1 over the *canonical* encoding, where every string value
//!   is converted to UTF-8, trimmed, has internal whitespace runs collapsed to
//!   one space, is ASCII lower-cased and re-tagged as UTF8String. The RDN sets
//!   are concatenated without the outer SEQUENCE.
//! * **old**: MD5 over the plain DER encoding.
//!
//! In both cases the hash is the first four digest bytes read little-endian.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use der::asn1::SetOfVec;
use der::oid::ObjectIdentifier;
use der::{Any, Decode, Encode, Reader, SliceReader, Tag, Tagged};
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};

use super::certificate::CertData;
use crate::config::NameHashAlgorithm;
use crate::crypto;
use crate::error::{Error, Result};
use crate::handle::Handle;

/// Attribute types with a well-known meaning in names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameEntryType {
    Unknown,
    CountryName,
    OrganizationName,
    OrganizationalUnitName,
    CommonName,
    LocalityName,
    StateOrProvinceName,
    StreetAddress,
    SerialNumber,
    DomainComponent,
    UserId,
    Email,
    DnQualifier,
    Title,
    Surname,
    GivenName,
    Initial,
}

const ENTRY_TYPES: &[(&str, NameEntryType, &str)] = &[
    ("2.5.4.6", NameEntryType::CountryName, "C"),
    ("2.5.4.10", NameEntryType::OrganizationName, "O"),
    ("2.5.4.11", NameEntryType::OrganizationalUnitName, "OU"),
    ("2.5.4.3", NameEntryType::CommonName, "CN"),
    ("2.5.4.7", NameEntryType::LocalityName, "L"),
    ("2.5.4.8", NameEntryType::StateOrProvinceName, "ST"),
    ("2.5.4.9", NameEntryType::StreetAddress, "street"),
    ("2.5.4.5", NameEntryType::SerialNumber, "serialNumber"),
    ("0.9.2342.19200300.100.1.25", NameEntryType::DomainComponent, "DC"),
    ("0.9.2342.19200300.100.1.1", NameEntryType::UserId, "UID"),
    ("1.2.840.113549.1.9.1", NameEntryType::Email, "emailAddress"),
    ("2.5.4.46", NameEntryType::DnQualifier, "dnQualifier"),
    ("2.5.4.12", NameEntryType::Title, "title"),
    ("2.5.4.4", NameEntryType::Surname, "SN"),
    ("2.5.4.42", NameEntryType::GivenName, "GN"),
    ("2.5.4.43", NameEntryType::Initial, "initials"),
];

impl NameEntryType {
    pub fn from_oid(oid: &str) -> Self {
        ENTRY_TYPES
            .iter()
            .find(|(known, _, _)| *known == oid)
            .map_or(Self::Unknown, |(_, kind, _)| *kind)
    }
}

fn short_name(oid: &str) -> Option<&'static str> {
    ENTRY_TYPES
        .iter()
        .find(|(known, _, _)| *known == oid)
        .map(|(_, _, short)| *short)
}

#[derive(Debug, Clone)]
struct NameEntry {
    oid: String,
    oid_data: Vec<u8>,
    value: Option<String>,
}

enum NameStorage {
    Owned(Vec<u8>),
    Embedded {
        cert: Arc<CertData>,
        range: Range<usize>,
    },
}

struct NameData {
    storage: NameStorage,
    canonical: Vec<u8>,
    entries: Vec<NameEntry>,
    rfc4514: String,
}

impl NameData {
    fn parse(storage: NameStorage) -> Result<Self> {
        let der = match &storage {
            NameStorage::Owned(der) => der.as_slice(),
            NameStorage::Embedded { cert, range } => &cert.der[range.clone()],
        };
        let name = decode_name(der)?;
        let canonical = canonical_encoding(&name)?;
        let entries = name
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .map(|atv| NameEntry {
                oid: atv.oid.to_string(),
                oid_data: atv.oid.as_bytes().to_vec(),
                value: decode_text(&atv.value),
            })
            .collect();
        let rfc4514 = name.to_string();
        Ok(Self {
            storage,
            canonical,
            entries,
            rfc4514,
        })
    }

    fn der(&self) -> &[u8] {
        match &self.storage {
            NameStorage::Owned(der) => der,
            NameStorage::Embedded { cert, range } => &cert.der[range.clone()],
        }
    }

    fn entry(&self, index: usize) -> Result<&NameEntry> {
        self.entries.get(index).ok_or(Error::IndexOutOfRange {
            index,
            count: self.entries.len(),
        })
    }
}

/// An X.509 distinguished name.
///
/// Names taken from a certificate are non-owning aliases: they keep the
/// certificate data alive, and releasing them never releases the certificate.
#[derive(Clone)]
pub struct DistinguishedName {
    handle: Handle<NameData>,
    owned: bool,
}

impl DistinguishedName {
    /// Parse a DER-encoded `Name`.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            handle: Handle::new("name", NameData::parse(NameStorage::Owned(der.to_vec()))?),
            owned: true,
        })
    }

    /// Build a name from DER, or from its canonical encoding when `canonical` is set.
    pub fn from_data(data: &[u8], canonical: bool) -> Result<Self> {
        if !canonical {
            return Self::from_der(data);
        }
        let mut reader = SliceReader::new(data).map_err(|e| Error::parse("canonical name", e))?;
        let mut rdns = Vec::new();
        while !reader.is_finished() {
            rdns.push(
                RelativeDistinguishedName::decode(&mut reader)
                    .map_err(|e| Error::parse("canonical name", e))?,
            );
        }
        let der = RdnSequence(rdns)
            .to_der()
            .map_err(|e| Error::parse("canonical name", e))?;
        Self::from_der(&der)
    }

    pub(crate) fn embedded(cert: Arc<CertData>, range: Range<usize>) -> Result<Self> {
        Ok(Self {
            handle: Handle::new("name", NameData::parse(NameStorage::Embedded { cert, range })?),
            owned: false,
        })
    }

    /// `false` for names that alias a certificate's subject or issuer.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn close(&self) {
        self.handle.release();
    }

    /// DER encoding, or the canonical encoding used for hashing.
    pub fn raw_data(&self, canonical: bool) -> Result<Vec<u8>> {
        self.handle.with(|name| {
            Ok(if canonical {
                name.canonical.clone()
            } else {
                name.der().to_vec()
            })
        })
    }

    pub fn hash(&self) -> Result<u32> {
        self.hash_with(NameHashAlgorithm::Current)
    }

    pub fn hash_old(&self) -> Result<u32> {
        self.hash_with(NameHashAlgorithm::Old)
    }

    pub fn hash_with(&self, algorithm: NameHashAlgorithm) -> Result<u32> {
        self.handle.with(|name| {
            Ok(match algorithm {
                NameHashAlgorithm::Current => hash_canonical(&name.canonical),
                NameHashAlgorithm::Old => hash_der(name.der()),
            })
        })
    }

    pub fn entry_count(&self) -> Result<usize> {
        self.handle.with(|name| Ok(name.entries.len()))
    }

    pub fn entry_type(&self, index: usize) -> Result<NameEntryType> {
        self.handle
            .with(|name| Ok(NameEntryType::from_oid(&name.entry(index)?.oid)))
    }

    /// Dotted-decimal attribute type.
    pub fn entry_oid(&self, index: usize) -> Result<String> {
        self.handle.with(|name| Ok(name.entry(index)?.oid.clone()))
    }

    /// Attribute type as encoded OID content bytes.
    pub fn entry_oid_data(&self, index: usize) -> Result<Vec<u8>> {
        self.handle.with(|name| Ok(name.entry(index)?.oid_data.clone()))
    }

    /// Attribute value as text; `None` for non-string values.
    pub fn entry_value(&self, index: usize) -> Result<Option<String>> {
        self.handle.with(|name| Ok(name.entry(index)?.value.clone()))
    }

    /// First value of the given attribute type.
    pub fn find(&self, kind: NameEntryType) -> Result<Option<String>> {
        self.handle.with(|name| {
            Ok(name
                .entries
                .iter()
                .find(|entry| NameEntryType::from_oid(&entry.oid) == kind)
                .and_then(|entry| entry.value.clone()))
        })
    }

    /// `/C=US/O=Example/CN=host` form.
    pub fn to_oneline(&self) -> Result<String> {
        self.handle.with(|name| {
            let mut out = String::new();
            for entry in &name.entries {
                out.push('/');
                out.push_str(short_name(&entry.oid).unwrap_or(&entry.oid));
                out.push('=');
                match &entry.value {
                    Some(value) => out.push_str(value),
                    None => out.push_str("<binary>"),
                }
            }
            Ok(out)
        })
    }

    pub fn to_rfc4514(&self) -> Result<String> {
        self.handle.with(|name| Ok(name.rfc4514.clone()))
    }

    /// Equality of canonical encodings, the comparison hashed lookups rely on.
    pub fn canonical_eq(&self, other: &DistinguishedName) -> Result<bool> {
        let lhs = self.handle.get()?;
        let rhs = other.handle.get()?;
        Ok(lhs.canonical == rhs.canonical)
    }
}

impl fmt::Debug for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_oneline() {
            Ok(text) => f.debug_tuple("DistinguishedName").field(&text).finish(),
            Err(_) => f.write_str("DistinguishedName(<released>)"),
        }
    }
}

pub(crate) fn hash_canonical(canonical: &[u8]) -> u32 {
    let digest = crypto::sha1(canonical);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

pub(crate) fn hash_der(der: &[u8]) -> u32 {
    let digest = crypto::md5(der);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Canonical encoding of a DER name.
pub(crate) fn canonical_der(der: &[u8]) -> Result<Vec<u8>> {
    canonical_encoding(&decode_name(der)?)
}

const UNIVERSAL_STRING: u8 = 0x1c;

fn name_error(reason: impl fmt::Display) -> Error {
    Error::parse("distinguished name", reason)
}

/// Split one DER element off the front of `input`, returning its tag byte
/// and contents.
fn read_tlv<'a>(input: &mut &'a [u8]) -> Result<(u8, &'a [u8])> {
    let bytes: &'a [u8] = *input;
    let (&tag, rest) = bytes.split_first().ok_or_else(|| name_error("truncated element"))?;
    let (&first, rest) = rest.split_first().ok_or_else(|| name_error("truncated length"))?;
    let (len, rest) = if first < 0x80 {
        (usize::from(first), rest)
    } else {
        let octets = usize::from(first & 0x7f);
        if octets == 0 || octets > 4 || rest.len() < octets {
            return Err(name_error("unsupported length encoding"));
        }
        let (len_bytes, rest) = rest.split_at(octets);
        let len = len_bytes.iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        (len, rest)
    };
    if rest.len() < len {
        return Err(name_error("element overruns its container"));
    }
    let (contents, rest) = rest.split_at(len);
    *input = rest;
    Ok((tag, contents))
}

fn expect_tlv<'a>(input: &mut &'a [u8], expected: u8) -> Result<&'a [u8]> {
    let (tag, contents) = read_tlv(input)?;
    if tag != expected {
        return Err(name_error(format!("expected tag {expected:#04x}, found {tag:#04x}")));
    }
    Ok(contents)
}

/// UCS-4 big-endian to UTF-8.
fn decode_ucs4(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 4 != 0 {
        return Err(name_error("UniversalString length is not a multiple of 4"));
    }
    bytes
        .chunks_exact(4)
        .map(|quad| {
            char::from_u32(u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]]))
                .ok_or_else(|| name_error("invalid UniversalString code point"))
        })
        .collect()
}

/// Decode a `Name`, re-tagging UniversalString values as UTF8String so the
/// result fits the `der` type model.
fn decode_name(der: &[u8]) -> Result<Name> {
    let mut input = der;
    let mut rdns = expect_tlv(&mut input, 0x30)?;
    if !input.is_empty() {
        return Err(name_error("trailing data after name"));
    }

    let mut sequence = Vec::new();
    while !rdns.is_empty() {
        let mut set = expect_tlv(&mut rdns, 0x31)?;
        let mut values = Vec::new();
        while !set.is_empty() {
            let mut atv = expect_tlv(&mut set, 0x30)?;
            let oid = ObjectIdentifier::from_bytes(expect_tlv(&mut atv, 0x06)?).map_err(name_error)?;
            let (tag, contents) = read_tlv(&mut atv)?;
            if !atv.is_empty() {
                return Err(name_error("trailing data in attribute"));
            }
            let value = match tag {
                UNIVERSAL_STRING => Any::new(Tag::Utf8String, decode_ucs4(contents)?.into_bytes()),
                other => Any::new(Tag::try_from(other).map_err(name_error)?, contents.to_vec()),
            }
            .map_err(name_error)?;
            values.push(AttributeTypeAndValue { oid, value });
        }
        let set = SetOfVec::try_from(values).map_err(name_error)?;
        sequence.push(RelativeDistinguishedName(set));
    }
    Ok(RdnSequence(sequence))
}

fn canonical_encoding(name: &Name) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for rdn in &name.0 {
        let mut values = Vec::with_capacity(rdn.0.len());
        for atv in rdn.0.iter() {
            let value = match canonical_text(&atv.value) {
                Some(text) => Any::new(Tag::Utf8String, text.into_bytes())
                    .map_err(|e| Error::parse("distinguished name", e))?,
                None => atv.value.clone(),
            };
            values.push(AttributeTypeAndValue {
                oid: atv.oid,
                value,
            });
        }
        let set = SetOfVec::try_from(values).map_err(|e| Error::parse("distinguished name", e))?;
        RelativeDistinguishedName(set)
            .encode_to_vec(&mut out)
            .map_err(|e| Error::parse("distinguished name", e))?;
    }
    Ok(out)
}

/// Text of a string-typed value.
fn decode_text(value: &Any) -> Option<String> {
    let bytes = value.value();
    match value.tag() {
        Tag::Utf8String => String::from_utf8(bytes.to_vec()).ok(),
        Tag::PrintableString
        | Tag::Ia5String
        | Tag::VisibleString
        | Tag::NumericString
        | Tag::TeletexString => Some(bytes.iter().map(|&b| char::from(b)).collect()),
        Tag::BmpString => {
            if bytes.len() % 2 != 0 {
                return None;
            }
            let units = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units).collect::<std::result::Result<String, _>>().ok()
        }
        _ => None,
    }
}

/// Normalised text for the string types that hashing folds; other values,
/// NumericString included, are hashed verbatim.
fn canonical_text(value: &Any) -> Option<String> {
    if !matches!(
        value.tag(),
        Tag::Utf8String
            | Tag::BmpString
            | Tag::PrintableString
            | Tag::TeletexString
            | Tag::Ia5String
            | Tag::VisibleString
    ) {
        return None;
    }
    let text = decode_text(value)?;
    let mut out = String::with_capacity(text.len());
    for word in text.split(|c: char| c.is_ascii() && is_space(c)) {
        if word.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().map(|c| c.to_ascii_lowercase()));
    }
    Some(out)
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0b' | '\x0c' | '\r')
}

#[cfg(test)]
mod tests {
    use super::*;

    // SEQUENCE { SET { SEQUENCE { OID 2.5.4.3, <tag> <value> } } }
    fn single_cn(tag: u8, value: &[u8]) -> Vec<u8> {
        let atv_len = 5 + 2 + value.len();
        let mut der = vec![0x30, (atv_len + 4) as u8, 0x31, (atv_len + 2) as u8];
        der.extend_from_slice(&[0x30, atv_len as u8, 0x06, 0x03, 0x55, 0x04, 0x03]);
        der.push(tag);
        der.push(value.len() as u8);
        der.extend_from_slice(value);
        der
    }

    #[test]
    fn canonical_form_normalises_strings() {
        let printable = DistinguishedName::from_der(&single_cn(0x13, b"  Foo   BAR ")).unwrap();
        let utf8 = DistinguishedName::from_der(&single_cn(0x0c, b"foo bar")).unwrap();

        let expected = [
            0x31, 0x10, 0x30, 0x0e, 0x06, 0x03, 0x55, 0x04, 0x03, 0x0c, 0x07, b'f', b'o', b'o',
            b' ', b'b', b'a', b'r',
        ];
        assert_eq!(printable.raw_data(true).unwrap(), expected);
        assert!(printable.canonical_eq(&utf8).unwrap());
        assert_eq!(printable.hash().unwrap(), utf8.hash().unwrap());
        assert_ne!(printable.hash_old().unwrap(), utf8.hash_old().unwrap());
    }

    #[test]
    fn numeric_strings_hash_verbatim() {
        // `openssl x509 -subject_hash` for CN=" 12  34" as NumericString
        let name = DistinguishedName::from_der(&single_cn(0x12, b" 12  34")).unwrap();
        assert_eq!(name.hash().unwrap(), 0x3acf4092);
        assert_eq!(name.hash_old().unwrap(), 0xbbab7818);
        assert_eq!(name.entry_value(0).unwrap().as_deref(), Some(" 12  34"));
    }

    #[test]
    fn universal_strings_are_canonicalised() {
        let ucs4: Vec<u8> = "  Foo  BAR "
            .chars()
            .flat_map(|c| (c as u32).to_be_bytes())
            .collect();
        let der = single_cn(0x1c, &ucs4);
        let name = DistinguishedName::from_der(&der).unwrap();
        let utf8 = DistinguishedName::from_der(&single_cn(0x0c, b"foo bar")).unwrap();

        assert_eq!(name.hash().unwrap(), 0x7ef63abc);
        assert_eq!(name.hash_old().unwrap(), 0x80dc05f0);
        assert!(name.canonical_eq(&utf8).unwrap());
        assert_eq!(name.raw_data(false).unwrap(), der);
        assert_eq!(name.entry_value(0).unwrap().as_deref(), Some("  Foo  BAR "));
    }

    #[test]
    fn hashes_are_little_endian_digest_prefixes() {
        let der = single_cn(0x0c, b"Example Root");
        let name = DistinguishedName::from_der(&der).unwrap();
        let canonical = name.raw_data(true).unwrap();

        let sha = crypto::sha1(&canonical);
        assert_eq!(
            name.hash().unwrap(),
            u32::from_le_bytes([sha[0], sha[1], sha[2], sha[3]])
        );
        let md = crypto::md5(&der);
        assert_eq!(
            name.hash_old().unwrap(),
            u32::from_le_bytes([md[0], md[1], md[2], md[3]])
        );
        assert_eq!(name.hash().unwrap(), name.hash().unwrap());
    }

    #[test]
    fn canonical_data_rebuilds_the_name() {
        let name = DistinguishedName::from_der(&single_cn(0x0c, b"Round Trip")).unwrap();
        let rebuilt = DistinguishedName::from_data(&name.raw_data(true).unwrap(), true).unwrap();
        assert!(rebuilt.canonical_eq(&name).unwrap());
        assert_eq!(rebuilt.entry_value(0).unwrap().as_deref(), Some("round trip"));
    }

    #[test]
    fn entries_and_printing() {
        let name = DistinguishedName::from_der(&single_cn(0x13, b"host")).unwrap();
        assert_eq!(name.entry_count().unwrap(), 1);
        assert_eq!(name.entry_type(0).unwrap(), NameEntryType::CommonName);
        assert_eq!(name.entry_oid(0).unwrap(), "2.5.4.3");
        assert_eq!(name.entry_oid_data(0).unwrap(), [0x55, 0x04, 0x03]);
        assert_eq!(name.to_oneline().unwrap(), "/CN=host");
        assert!(name.to_rfc4514().unwrap().ends_with("=host"));
        assert!(matches!(
            name.entry_oid(3),
            Err(Error::IndexOutOfRange { index: 3, count: 1 })
        ));
    }

    #[test]
    fn released_name_is_invalid() {
        let name = DistinguishedName::from_der(&single_cn(0x0c, b"x")).unwrap();
        let copy = name.clone();
        name.close();
        name.close();
        assert!(matches!(name.hash(), Err(Error::InvalidHandle("name"))));
        assert!(copy.hash().is_ok());
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(matches!(
            DistinguishedName::from_der(&[0x30, 0x05, 0x31]),
            Err(Error::Parse { .. })
        ));
    }
}
