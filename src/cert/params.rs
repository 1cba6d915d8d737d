use std::fmt;
use std::str::FromStr;

use bon::Builder;
use const_oid::ObjectIdentifier;
use der::asn1::{OctetString, SetOfVec};
use der::{Any, Decode, Encode, Tag, Tagged};
use time::Duration;
use time::OffsetDateTime;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};

use super::extensions::ToAndFromX509Extension;
use crate::error::{CertForgeError, Result};

/// `commonName`
pub const CN: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
/// `countryName`
pub const COUNTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
/// `localityName`
pub const LOCALITY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
/// `stateOrProvinceName`
pub const STATE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
/// `organizationName`
pub const ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
/// `organizationalUnitName`
pub const ORGANIZATION_UNIT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");

/// An X.509 name: an ordered sequence of relative distinguished names.
///
/// Names parse from and display as RFC 4514 strings (`"CN=test,O=Example"`),
/// and keep the exact attribute encodings of certificates they were read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Name(RdnSequence);

impl Name {
    /// The empty name.
    pub fn empty() -> Self {
        Name(RdnSequence(Vec::new()))
    }

    /// Parses an RFC 4514 string. Attribute values are encoded as UTF8String.
    pub fn parse(rfc4514: &str) -> Result<Self> {
        RdnSequence::from_str(rfc4514)
            .map(Name)
            .map_err(|e| CertForgeError::InvalidInput(format!("invalid name {rfc4514:?}: {e}")))
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Name(RdnSequence::from_der(der)?))
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.0
            .to_der()
            .map_err(|e| CertForgeError::EncodingError(e.to_string()))
    }

    pub fn as_x509_name(&self) -> &x509_cert::name::Name {
        &self.0
    }

    pub fn from_x509_name(name: &x509_cert::name::Name) -> Self {
        Name(name.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.0.0.is_empty()
    }

    /// Every attribute in encoded order with its value rendered as text.
    ///
    /// Values that are not one of the common string types are skipped.
    pub fn entries(&self) -> Vec<(ObjectIdentifier, String)> {
        self.0
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .filter_map(|attr| attribute_text(&attr.value).map(|text| (attr.oid, text)))
            .collect()
    }

    /// The last value of the given attribute, as OpenSSL's lookup returns it.
    pub fn get(&self, oid: ObjectIdentifier) -> Option<String> {
        self.entries()
            .into_iter()
            .rev()
            .find(|(attr, _)| *attr == oid)
            .map(|(_, value)| value)
    }

    pub fn common_name(&self) -> Option<String> {
        self.get(CN)
    }

    /// Compares two names the way OpenSSL matches an issuer to a subject.
    ///
    /// String attributes compare by text with ASCII case folded and runs of
    /// whitespace collapsed, regardless of the string type they were encoded
    /// with. Other attribute values compare by their exact encoding.
    pub fn matches(&self, other: &Name) -> bool {
        self.canonical() == other.canonical()
    }

    fn canonical(&self) -> Vec<Vec<(ObjectIdentifier, CanonicalValue)>> {
        self.0
            .0
            .iter()
            .map(|rdn| {
                let mut attrs: Vec<_> = rdn
                    .0
                    .iter()
                    .map(|attr| (attr.oid, CanonicalValue::of(&attr.value)))
                    .collect();
                attrs.sort();
                attrs
            })
            .collect()
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum CanonicalValue {
    Text(String),
    Raw(u8, Vec<u8>),
}

impl CanonicalValue {
    fn of(value: &Any) -> Self {
        match attribute_text(value) {
            Some(text) => CanonicalValue::Text(
                text.split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_ascii_lowercase(),
            ),
            None => CanonicalValue::Raw(value.tag().into(), value.value().to_vec()),
        }
    }
}

fn attribute_text(value: &Any) -> Option<String> {
    match value.tag() {
        Tag::Utf8String
        | Tag::PrintableString
        | Tag::Ia5String
        | Tag::TeletexString
        | Tag::VisibleString => Some(String::from_utf8_lossy(value.value()).into_owned()),
        _ => None,
    }
}

impl Default for Name {
    fn default() -> Self {
        Name::empty()
    }
}

impl FromStr for Name {
    type Err = CertForgeError;

    fn from_str(s: &str) -> Result<Self> {
        Name::parse(s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<x509_cert::name::Name> for Name {
    fn from(name: x509_cert::name::Name) -> Self {
        Name(name)
    }
}

/// Distinguished name parameters for building an X.509 name.
///
/// # Fields
/// * `common_name` - The common name (CN).
/// * `country` - The country (C).
/// * `state` - The state or province (ST).
/// * `locality` - The locality or city (L).
/// * `organization` - The organization (O).
/// * `organization_unit` - The organizational unit (OU).
#[derive(Clone, Debug, Builder, Default)]
pub struct DistinguishedName {
    #[builder(into)]
    pub common_name: String,
    #[builder(into)]
    pub country: Option<String>,
    #[builder(into)]
    pub state: Option<String>,
    #[builder(into)]
    pub locality: Option<String>,
    #[builder(into)]
    pub organization: Option<String>,
    #[builder(into)]
    pub organization_unit: Option<String>,
}

impl DistinguishedName {
    /// Converts the distinguished name to a [`Name`].
    ///
    /// Attributes are encoded most-general first (C, ST, L, O, OU, CN), one per
    /// RDN; absent and empty attributes are left out. The country is a
    /// PrintableString, everything else UTF8String.
    ///
    /// # Returns
    /// A `Name`, or an error if a value cannot be encoded.
    pub fn as_name(&self) -> Result<Name> {
        let attributes = [
            (COUNTRY, self.country.as_deref()),
            (STATE, self.state.as_deref()),
            (LOCALITY, self.locality.as_deref()),
            (ORGANIZATION, self.organization.as_deref()),
            (ORGANIZATION_UNIT, self.organization_unit.as_deref()),
            (CN, Some(self.common_name.as_str())),
        ];

        let mut rdns = Vec::new();
        for (oid, value) in attributes {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };
            let tag = if oid == COUNTRY {
                Tag::PrintableString
            } else {
                Tag::Utf8String
            };
            let atv = AttributeTypeAndValue {
                oid,
                value: Any::new(tag, value.as_bytes())?,
            };
            rdns.push(RelativeDistinguishedName(SetOfVec::try_from(vec![atv])?));
        }
        Ok(Name(RdnSequence(rdns)))
    }

    /// Reads the common fields back out of a [`Name`].
    ///
    /// # Arguments
    /// * `name` - The name to inspect.
    ///
    /// # Returns
    /// A `DistinguishedName`; attributes it has no field for are ignored.
    pub fn from_name(name: &Name) -> Self {
        DistinguishedName {
            common_name: name.get(CN).unwrap_or_default(),
            country: name.get(COUNTRY),
            state: name.get(STATE),
            locality: name.get(LOCALITY),
            organization: name.get(ORGANIZATION),
            organization_unit: name.get(ORGANIZATION_UNIT),
        }
    }
}

/// Certificate validity period.
///
/// This struct represents the `notBefore` and `notAfter` fields in a certificate.
///
/// # Fields
/// * `not_before` - The start of the validity period.
/// * `not_after` - The end of the validity period.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Creates a validity period starting now for the given number of days.
    ///
    /// # Arguments
    /// * `days` - The number of days for the validity period.
    ///
    /// # Returns
    /// A `Validity` object.
    pub fn for_days(days: i64) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            not_before: now,
            not_after: now + Duration::days(days),
        }
    }

    /// Whether `at` falls inside the window, bounds included.
    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// Represents an X.509 extension.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER content of the `extnValue` OCTET STRING.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extension {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl Extension {
    pub fn new(oid: ObjectIdentifier, critical: bool, value: impl Into<Vec<u8>>) -> Self {
        Self {
            oid,
            critical,
            value: value.into(),
        }
    }

    /// Creates an `Extension` from a typed extension.
    ///
    /// # Arguments
    /// * `extension` - The extension to encode.
    /// * `critical` - Indicates if the extension is critical.
    ///
    /// # Returns
    /// An `Extension`, or the encoding error of the typed value.
    pub fn from_extension<E: ToAndFromX509Extension>(extension: &E, critical: bool) -> Result<Self> {
        Ok(Self {
            oid: E::OID,
            critical,
            value: extension.to_x509_extension_value()?,
        })
    }

    /// Decodes an `Extension` into a specific typed extension.
    ///
    /// # Returns
    /// A decoded extension object.
    pub fn to_extension<E: ToAndFromX509Extension>(&self) -> Result<E> {
        if self.oid != E::OID {
            return Err(CertForgeError::InvalidInput(format!(
                "extension {} is not {}",
                self.oid,
                E::OID
            )));
        }
        E::from_x509_extension_value(&self.value)
    }

    pub(crate) fn to_x509(&self) -> Result<x509_cert::ext::Extension> {
        Ok(x509_cert::ext::Extension {
            extn_id: self.oid,
            critical: self.critical,
            extn_value: OctetString::new(self.value.clone())?,
        })
    }

    pub(crate) fn from_x509(extension: &x509_cert::ext::Extension) -> Self {
        Self {
            oid: extension.extn_id,
            critical: extension.critical,
            value: extension.extn_value.as_bytes().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinguished_name_skips_absent_attributes() {
        let name = DistinguishedName::builder()
            .common_name("example.com")
            .organization("Example Corp")
            .country("US")
            .state("")
            .build()
            .as_name()
            .unwrap();

        assert_eq!(name.to_string(), "CN=example.com,O=Example Corp,C=US");
        assert_eq!(name.common_name().as_deref(), Some("example.com"));
        assert_eq!(name.get(STATE), None);
        assert_eq!(name.entries().len(), 3);
    }

    #[test]
    fn parse_and_display_agree() {
        let name = Name::parse("CN=test,O=Example").unwrap();
        assert_eq!(name.to_string(), "CN=test,O=Example");
        let reparsed = Name::from_der(&name.to_der().unwrap()).unwrap();
        assert_eq!(reparsed, name);
        let dn = DistinguishedName::from_name(&reparsed);
        assert_eq!(dn.common_name, "test");
        assert_eq!(dn.organization.as_deref(), Some("Example"));
    }

    #[test]
    fn matching_ignores_string_type_case_and_spacing() {
        let built = DistinguishedName::builder()
            .common_name("example.com")
            .organization("Example Corp")
            .country("US")
            .build()
            .as_name()
            .unwrap();
        // C is a UTF8String here and a PrintableString in `built`
        let parsed = Name::parse("CN=Example.COM,O=example  corp,C=us").unwrap();
        assert_ne!(built, parsed);
        assert!(built.matches(&parsed));
        assert!(parsed.matches(&built));

        assert!(!built.matches(&Name::parse("CN=other.com,O=Example Corp,C=US").unwrap()));
        assert!(!built.matches(&Name::parse("O=Example Corp,C=US").unwrap()));
        assert!(Name::empty().matches(&Name::empty()));
    }

    #[test]
    fn extension_to_extension_checks_oid() {
        let ext = Extension::new(CN, false, vec![0x05, 0x00]);
        assert!(ext.to_extension::<super::super::extensions::BasicConstraints>().is_err());
    }
}
