use std::net::IpAddr;

use const_oid::AssociatedOid;
use der::{
    Decode, Encode,
    asn1::{Ia5String, OctetString},
    oid::ObjectIdentifier,
};
use x509_cert::ext::pkix::name::GeneralName;

pub use der::flagset::FlagSet;
use x509_cert::ext::pkix::KeyUsage as X509KeyUsage;
pub use x509_cert::ext::pkix::KeyUsages;

use super::params::Name;
use crate::digest::Digest;
use crate::error::{CertForgeError, Result};
use crate::key::PublicKey;

/// Trait for converting to and from X.509 extensions.
///
/// This trait provides methods to encode and decode X.509 extension values.
///
/// # Example
/// ```
/// use certforge::cert::extensions::{AltName, SubjectAltName, ToAndFromX509Extension};
/// let san = SubjectAltName { names: vec![AltName::Dns("example.com".to_string())] };
/// let encoded = san.to_x509_extension_value().unwrap();
/// let decoded = SubjectAltName::from_x509_extension_value(&encoded).unwrap();
/// assert_eq!(san.names, decoded.names);
/// ```
pub trait ToAndFromX509Extension {
    /// The Object Identifier (OID) for the extension.
    const OID: ObjectIdentifier;

    /// Encodes the extension into a DER-encoded byte vector.
    fn to_x509_extension_value(&self) -> Result<Vec<u8>>;

    /// Decodes the extension from a DER-encoded byte slice.
    fn from_x509_extension_value(extension: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// OID of the Subject Alternative Name extension.
pub const SUBJECT_ALT_NAME: ObjectIdentifier = x509_cert::ext::pkix::SubjectAltName::OID;

/// Concatenates two encoded `GeneralNames` values, `existing` first.
///
/// Both inputs are the DER content of a SAN `extnValue`; the result is a single
/// re-encoded `GeneralNames` sequence.
pub(crate) fn merge_subject_alt_names(existing: &[u8], additional: &[u8]) -> Result<Vec<u8>> {
    let mut merged = x509_cert::ext::pkix::SubjectAltName::from_der(existing)?;
    let extra = x509_cert::ext::pkix::SubjectAltName::from_der(additional)?;
    merged.0.extend(extra.0);
    merged
        .to_der()
        .map_err(|e| CertForgeError::EncodingError(e.to_string()))
}

/// Decodes a SAN value and encodes it again.
pub(crate) fn normalize_subject_alt_name(value: &[u8]) -> Result<Vec<u8>> {
    x509_cert::ext::pkix::SubjectAltName::from_der(value)?
        .to_der()
        .map_err(|e| CertForgeError::EncodingError(e.to_string()))
}

/// One entry of a Subject Alternative Name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltName {
    Dns(String),
    Email(String),
    Uri(String),
    Ip(IpAddr),
    Directory(Name),
}

impl AltName {
    fn to_general_name(&self) -> Result<GeneralName> {
        let ia5 = |s: &String| {
            Ia5String::try_from(s.clone()).map_err(|e| CertForgeError::InvalidInput(e.to_string()))
        };
        Ok(match self {
            AltName::Dns(name) => GeneralName::DnsName(ia5(name)?),
            AltName::Email(email) => GeneralName::Rfc822Name(ia5(email)?),
            AltName::Uri(uri) => GeneralName::UniformResourceIdentifier(ia5(uri)?),
            AltName::Ip(IpAddr::V4(ip)) => GeneralName::IpAddress(OctetString::new(ip.octets())?),
            AltName::Ip(IpAddr::V6(ip)) => GeneralName::IpAddress(OctetString::new(ip.octets())?),
            AltName::Directory(name) => GeneralName::DirectoryName(name.as_x509_name().clone()),
        })
    }

    fn from_general_name(name: &GeneralName) -> Result<Self> {
        match name {
            GeneralName::DnsName(dns) => Ok(AltName::Dns(dns.to_string())),
            GeneralName::Rfc822Name(email) => Ok(AltName::Email(email.to_string())),
            GeneralName::UniformResourceIdentifier(uri) => Ok(AltName::Uri(uri.to_string())),
            GeneralName::IpAddress(ip) => match ip.as_bytes().len() {
                4 => {
                    let mut octets = [0u8; 4];
                    octets.copy_from_slice(ip.as_bytes());
                    Ok(AltName::Ip(IpAddr::from(octets)))
                }
                16 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(ip.as_bytes());
                    Ok(AltName::Ip(IpAddr::from(octets)))
                }
                n => Err(CertForgeError::InvalidInput(format!(
                    "IP address of {n} bytes in general name"
                ))),
            },
            GeneralName::DirectoryName(name) => Ok(AltName::Directory(Name::from_x509_name(name))),
            _ => Err(CertForgeError::InvalidInput(
                "Unsupported general name type".to_string(),
            )),
        }
    }
}

/// Represents the Subject Alternative Name (SAN) extension.
///
/// This extension specifies additional identities for the subject of the certificate.
///
/// # Fields
/// * `names` - The alternative names, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectAltName {
    pub names: Vec<AltName>,
}

impl SubjectAltName {
    /// A SAN holding only DNS names.
    pub fn dns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(|n| AltName::Dns(n.into())).collect(),
        }
    }
}

impl ToAndFromX509Extension for SubjectAltName {
    const OID: ObjectIdentifier = SUBJECT_ALT_NAME;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        let san = x509_cert::ext::pkix::SubjectAltName(
            self.names
                .iter()
                .map(AltName::to_general_name)
                .collect::<Result<Vec<_>>>()?,
        );

        Ok(san.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self> {
        let san = x509_cert::ext::pkix::SubjectAltName::from_der(extension)?;
        let names = san
            .0
            .iter()
            .map(AltName::from_general_name)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { names })
    }
}

/// Represents the Basic Constraints extension.
///
/// This extension indicates whether the certificate is a CA certificate and its path length.
///
/// # Fields
/// * `is_ca` - Indicates if the certificate is a CA.
/// * `max_path_length` - The maximum number of intermediate CAs allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasicConstraints {
    pub is_ca: bool,
    pub max_path_length: Option<u8>,
}

impl ToAndFromX509Extension for BasicConstraints {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::BasicConstraints::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        let bc = x509_cert::ext::pkix::BasicConstraints {
            ca: self.is_ca,
            path_len_constraint: self.max_path_length,
        };

        Ok(bc.to_der()?)
    }

    fn from_x509_extension_value(der_bytes: &[u8]) -> Result<Self> {
        let bc = x509_cert::ext::pkix::BasicConstraints::from_der(der_bytes)?;
        Ok(Self {
            is_ca: bc.ca,
            max_path_length: bc.path_len_constraint,
        })
    }
}

/// Represents the Key Usage extension.
///
/// This extension defines the purpose of the key contained in the certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsage(pub FlagSet<KeyUsages>);

impl ToAndFromX509Extension for KeyUsage {
    const OID: ObjectIdentifier = <X509KeyUsage as AssociatedOid>::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        let ku = X509KeyUsage::from(self.0);
        Ok(ku.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self> {
        let ku = X509KeyUsage::from_der(extension)?;
        Ok(Self(ku.0))
    }
}

/// Represents the Extended Key Usage extension.
///
/// This extension indicates purposes for which the public key may be used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedKeyUsage {
    pub usage: Vec<ExtendedKeyUsageOption>,
}

impl ExtendedKeyUsage {
    pub fn allows(&self, option: ExtendedKeyUsageOption) -> bool {
        self.usage.contains(&option)
    }
}

impl ToAndFromX509Extension for ExtendedKeyUsage {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::ExtendedKeyUsage::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        let oids: Vec<ObjectIdentifier> = self.usage.iter().map(|v| (*v).into()).collect();
        let eku = x509_cert::ext::pkix::ExtendedKeyUsage(oids);
        Ok(eku.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self> {
        let eku = x509_cert::ext::pkix::ExtendedKeyUsage::from_der(extension)?;
        let usage = eku.0.iter().map(|v| ExtendedKeyUsageOption::from(*v)).collect();
        Ok(Self { usage })
    }
}

/// Represents an option for the Extended Key Usage extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedKeyUsageOption {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    TimeStamping,
    OcspSigning,
    /// `anyExtendedKeyUsage`
    Any,
    Other(ObjectIdentifier),
}

const ANY_EXTENDED_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37.0");

impl From<ExtendedKeyUsageOption> for ObjectIdentifier {
    fn from(value: ExtendedKeyUsageOption) -> Self {
        match value {
            ExtendedKeyUsageOption::OcspSigning => const_oid::db::rfc5912::ID_KP_OCSP_SIGNING,
            ExtendedKeyUsageOption::ServerAuth => const_oid::db::rfc5912::ID_KP_SERVER_AUTH,
            ExtendedKeyUsageOption::ClientAuth => const_oid::db::rfc5912::ID_KP_CLIENT_AUTH,
            ExtendedKeyUsageOption::CodeSigning => const_oid::db::rfc5912::ID_KP_CODE_SIGNING,
            ExtendedKeyUsageOption::EmailProtection => {
                const_oid::db::rfc5912::ID_KP_EMAIL_PROTECTION
            }
            ExtendedKeyUsageOption::TimeStamping => const_oid::db::rfc5912::ID_KP_TIME_STAMPING,
            ExtendedKeyUsageOption::Any => ANY_EXTENDED_KEY_USAGE,
            ExtendedKeyUsageOption::Other(oid) => oid,
        }
    }
}

impl From<ObjectIdentifier> for ExtendedKeyUsageOption {
    fn from(oid: ObjectIdentifier) -> Self {
        match oid {
            const_oid::db::rfc5912::ID_KP_OCSP_SIGNING => ExtendedKeyUsageOption::OcspSigning,
            const_oid::db::rfc5912::ID_KP_SERVER_AUTH => ExtendedKeyUsageOption::ServerAuth,
            const_oid::db::rfc5912::ID_KP_CLIENT_AUTH => ExtendedKeyUsageOption::ClientAuth,
            const_oid::db::rfc5912::ID_KP_CODE_SIGNING => ExtendedKeyUsageOption::CodeSigning,
            const_oid::db::rfc5912::ID_KP_EMAIL_PROTECTION => {
                ExtendedKeyUsageOption::EmailProtection
            }
            const_oid::db::rfc5912::ID_KP_TIME_STAMPING => ExtendedKeyUsageOption::TimeStamping,
            ANY_EXTENDED_KEY_USAGE => ExtendedKeyUsageOption::Any,
            other => ExtendedKeyUsageOption::Other(other),
        }
    }
}

/// Represents the Subject Key Identifier extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectKeyIdentifier(pub Vec<u8>);

impl SubjectKeyIdentifier {
    /// RFC 5280 method 1: SHA-1 over the `subjectPublicKey` BIT STRING contents.
    pub fn from_public_key(key: &PublicKey) -> Result<Self> {
        let spki = x509_cert::spki::SubjectPublicKeyInfoOwned::from_der(&key.to_spki_der()?)?;
        Ok(Self(Digest::Sha1.hash(spki.subject_public_key.raw_bytes())))
    }
}

impl ToAndFromX509Extension for SubjectKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier(OctetString::new(self.0.clone())?);
        Ok(ski.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier::from_der(extension)?;
        Ok(Self(ski.0.as_bytes().to_vec()))
    }
}

/// Represents the Authority Key Identifier (AKI) extension.
///
/// This extension identifies the public key corresponding to the private key used to sign the certificate.
///
/// # Fields
/// * `key_identifier` - The key identifier.
/// * `authority_cert_issuer` - The issuer's name, if present.
/// * `authority_cert_serial_number` - The issuer's certificate serial number, big-endian.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityKeyIdentifier {
    pub key_identifier: Option<Vec<u8>>,
    pub authority_cert_issuer: Option<Name>,
    pub authority_cert_serial_number: Option<Vec<u8>>,
}

impl ToAndFromX509Extension for AuthorityKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::AuthorityKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier {
            key_identifier: self
                .key_identifier
                .as_ref()
                .map(|id| OctetString::new(id.as_slice()))
                .transpose()?,
            authority_cert_issuer: self
                .authority_cert_issuer
                .as_ref()
                .map(|name| vec![GeneralName::DirectoryName(name.as_x509_name().clone())]),
            authority_cert_serial_number: self
                .authority_cert_serial_number
                .as_ref()
                .map(|sn| x509_cert::serial_number::SerialNumber::new(sn.as_slice()))
                .transpose()?,
        };

        Ok(aki.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self> {
        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier::from_der(extension)?;

        let authority_cert_issuer = aki.authority_cert_issuer.as_ref().and_then(|names| {
            names.iter().find_map(|name| match name {
                GeneralName::DirectoryName(dn) => Some(Name::from_x509_name(dn)),
                _ => None,
            })
        });

        Ok(Self {
            key_identifier: aki.key_identifier.map(|id| id.as_bytes().to_vec()),
            authority_cert_issuer,
            authority_cert_serial_number: aki
                .authority_cert_serial_number
                .map(|sn| sn.as_bytes().to_vec()),
        })
    }
}
