pub mod algorithm;
pub mod extensions;
pub mod params;
pub mod trust;

use der::asn1::BitString;
use der::{Decode, Encode};
use rsa::BigUint;
use time::{Duration, OffsetDateTime, UtcOffset};
use tracing::debug;
use x509_cert::Version;

pub use algorithm::SignatureAlgorithm;
use extensions::{SUBJECT_ALT_NAME, merge_subject_alt_names, normalize_subject_alt_name};
pub use params::{DistinguishedName, Extension, Name, Validity};
pub use trust::AuxiliaryTrust;

use crate::digest::Digest;
use crate::error::{CertForgeError, Result};
use crate::key::{KeyPair, PublicKey};
use crate::tbs_certificate::TbsCertificate;

/// A mutable X.509 certificate.
///
/// Setters edit the field set and mark the certificate dirty; [`Certificate::sign`]
/// turns the field set into an immutable signed snapshot and clears the flag.
/// [`Certificate::verify`] only ever checks that snapshot and refuses to succeed
/// while the certificate is dirty, so a stale signature is never reported valid.
///
/// ```rust,no_run
/// use certforge::{cert::{Certificate, Name}, digest::Digest, key::KeyPair};
/// use time::macros::datetime;
///
/// # fn main() -> certforge::error::Result<()> {
/// let key = KeyPair::generate_rsa(2048)?;
/// let mut cert = Certificate::new();
/// cert.set_serial(1u32);
/// cert.set_subject(Name::parse("CN=test")?);
/// cert.set_issuer(Name::parse("CN=test")?);
/// cert.set_not_before(datetime!(2024-01-01 00:00:00 UTC));
/// cert.set_not_after(datetime!(2025-01-01 00:00:00 UTC));
/// cert.set_public_key(key.public_key());
/// cert.sign(&key, Digest::Sha256)?;
/// assert!(cert.verify(&key.public_key())?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Certificate {
    version: Version,
    serial: BigUint,
    not_before: Option<OffsetDateTime>,
    not_after: Option<OffsetDateTime>,
    subject: Name,
    issuer: Name,
    public_key: Option<PublicKey>,
    signature_algorithm: Option<SignatureAlgorithm>,
    extensions: Vec<Extension>,
    aux: Option<AuxiliaryTrust>,
    signed: Option<x509_cert::Certificate>,
    dirty: bool,
}

impl Default for Certificate {
    fn default() -> Self {
        Self::new()
    }
}

/// UTC with the sub-second part dropped, the precision X.509 times carry.
fn normalize_time(at: OffsetDateTime) -> OffsetDateTime {
    let at = at.to_offset(UtcOffset::UTC);
    at - Duration::nanoseconds(i64::from(at.nanosecond()))
}

impl Certificate {
    /// An empty, unsigned v3 certificate with serial 0.
    pub fn new() -> Self {
        Self {
            version: Version::V3,
            serial: BigUint::from(0u8),
            not_before: None,
            not_after: None,
            subject: Name::empty(),
            issuer: Name::empty(),
            public_key: None,
            signature_algorithm: None,
            extensions: Vec::new(),
            aux: None,
            signed: None,
            dirty: true,
        }
    }

    /// Parses a single DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Self::from_x509(x509_cert::Certificate::from_der(der)?)
    }

    /// Parses the first certificate block of a PEM document.
    ///
    /// Any PEM certificate label is accepted, including `TRUSTED CERTIFICATE`.
    pub fn from_pem(pem: &str) -> Result<Self> {
        crate::pem::read_certificate(pem)?.ok_or_else(|| {
            CertForgeError::FormatError("no certificate found in PEM input".to_string())
        })
    }

    /// Builds a certificate from a decoded X.509 structure.
    ///
    /// Every extension goes through [`Certificate::add_extension`] in encoded
    /// order, so repeated SAN extensions collapse into one entry; the SAN value is
    /// decoded and re-encoded, all other values are kept as they are. The result
    /// is clean: it verifies against its issuer's key without signing again.
    pub fn from_x509(signed: x509_cert::Certificate) -> Result<Self> {
        let tbs = TbsCertificate::from_tbs_certificate_inner(&signed.tbs_certificate)?;

        let mut cert = Self {
            version: tbs.version,
            serial: tbs.serial_number,
            not_before: Some(tbs.not_before),
            not_after: Some(tbs.not_after),
            subject: tbs.subject,
            issuer: tbs.issuer,
            public_key: Some(tbs.subject_public_key),
            signature_algorithm: SignatureAlgorithm::from_oid(signed.signature_algorithm.oid).ok(),
            extensions: Vec::new(),
            aux: None,
            signed: None,
            dirty: true,
        };
        for mut extension in tbs.extensions {
            if extension.oid == SUBJECT_ALT_NAME {
                extension.value = normalize_subject_alt_name(&extension.value)?;
            }
            cert.add_extension(extension)?;
        }
        cert.signed = Some(signed);
        cert.dirty = false;

        debug!(
            subject = %cert.subject,
            serial = %cert.serial,
            extensions = cert.extensions.len(),
            "parsed certificate"
        );
        Ok(cert)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        if self.version != version {
            self.version = version;
            self.dirty = true;
        }
    }

    pub fn serial(&self) -> &BigUint {
        &self.serial
    }

    pub fn set_serial(&mut self, serial: impl Into<BigUint>) {
        let serial = serial.into();
        if self.serial != serial {
            self.serial = serial;
            self.dirty = true;
        }
    }

    pub fn subject(&self) -> &Name {
        &self.subject
    }

    pub fn set_subject(&mut self, subject: Name) {
        if self.subject != subject {
            self.subject = subject;
            self.dirty = true;
        }
    }

    pub fn issuer(&self) -> &Name {
        &self.issuer
    }

    pub fn set_issuer(&mut self, issuer: Name) {
        if self.issuer != issuer {
            self.issuer = issuer;
            self.dirty = true;
        }
    }

    pub fn not_before(&self) -> Option<OffsetDateTime> {
        self.not_before
    }

    /// Sets the start of the validity window, normalized to UTC whole seconds.
    /// Always marks the certificate dirty.
    pub fn set_not_before(&mut self, at: OffsetDateTime) {
        self.not_before = Some(normalize_time(at));
        self.dirty = true;
    }

    pub fn not_after(&self) -> Option<OffsetDateTime> {
        self.not_after
    }

    /// Sets the end of the validity window, normalized to UTC whole seconds.
    /// Always marks the certificate dirty.
    pub fn set_not_after(&mut self, at: OffsetDateTime) {
        self.not_after = Some(normalize_time(at));
        self.dirty = true;
    }

    /// The validity window, once both ends are set.
    pub fn validity(&self) -> Option<Validity> {
        Some(Validity {
            not_before: self.not_before?,
            not_after: self.not_after?,
        })
    }

    pub fn set_validity(&mut self, validity: Validity) {
        self.set_not_before(validity.not_before);
        self.set_not_after(validity.not_after);
    }

    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    pub fn set_public_key(&mut self, key: PublicKey) {
        if self.public_key.as_ref() != Some(&key) {
            self.public_key = Some(key);
            self.dirty = true;
        }
    }

    /// The algorithm of the current signature; `None` when unsigned or signed
    /// with an algorithm outside the supported set.
    pub fn signature_algorithm(&self) -> Option<SignatureAlgorithm> {
        self.signature_algorithm
    }

    /// The raw signature bytes of the signed snapshot.
    pub fn signature(&self) -> Option<&[u8]> {
        self.signed.as_ref().map(|s| s.signature.raw_bytes())
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    /// The first extension with the given OID.
    pub fn extension(&self, oid: der::oid::ObjectIdentifier) -> Option<&Extension> {
        self.extensions.iter().find(|e| e.oid == oid)
    }

    /// Replaces the whole extension list as given, without merging.
    pub fn set_extensions(&mut self, extensions: Vec<Extension>) {
        self.extensions = extensions;
        self.dirty = true;
    }

    /// Adds an extension and marks the certificate dirty.
    ///
    /// A Subject Alternative Name is merged into an existing SAN entry: the
    /// existing names come first, then the new ones, and the entry keeps its
    /// position and criticality. Any other extension is appended, even when one
    /// with the same OID is already present.
    pub fn add_extension(&mut self, extension: Extension) -> Result<()> {
        self.dirty = true;
        if extension.oid == SUBJECT_ALT_NAME {
            if let Some(existing) = self
                .extensions
                .iter_mut()
                .find(|e| e.oid == SUBJECT_ALT_NAME)
            {
                existing.value = merge_subject_alt_names(&existing.value, &extension.value)?;
                return Ok(());
            }
        }
        self.extensions.push(extension);
        Ok(())
    }

    /// The OpenSSL auxiliary trust record, if this certificate carries one.
    pub fn aux(&self) -> Option<&AuxiliaryTrust> {
        self.aux.as_ref()
    }

    /// Auxiliary trust is not covered by the signature; setting it leaves the
    /// certificate clean.
    pub fn set_aux(&mut self, aux: Option<AuxiliaryTrust>) {
        self.aux = aux;
    }

    /// Whether any signed field changed since the last `sign`.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_signed(&self) -> bool {
        self.signed.is_some()
    }

    /// The signed snapshot as an `x509-cert` structure.
    pub fn to_x509(&self) -> Option<&x509_cert::Certificate> {
        self.signed.as_ref()
    }

    /// Signs the current field set with `key` using `digest`.
    ///
    /// # Arguments
    /// * `key` - The issuer's key pair.
    /// * `digest` - The message digest; DSA keys need `Dss1` for SHA-1.
    ///
    /// # Returns
    /// `Ok(())` once the signed snapshot replaced the previous one; the
    /// certificate is clean afterwards.
    pub fn sign(&mut self, key: &KeyPair, digest: Digest) -> Result<()> {
        let algorithm = SignatureAlgorithm::new(key.algorithm(), digest)?;

        let public_key = self.public_key.clone().ok_or_else(|| {
            CertForgeError::CertificateError("certificate has no public key".to_string())
        })?;
        let validity = self.validity().ok_or_else(|| {
            CertForgeError::CertificateError("certificate has no validity period".to_string())
        })?;

        let tbs = TbsCertificate {
            version: self.version,
            serial_number: self.serial.clone(),
            signature_algorithm: Some(algorithm),
            issuer: self.issuer.clone(),
            not_before: validity.not_before,
            not_after: validity.not_after,
            subject: self.subject.clone(),
            subject_public_key: public_key,
            extensions: self.extensions.clone(),
        };

        let tbs_certificate = tbs.to_tbs_certificate_inner()?;
        let tbs_der = tbs_certificate
            .to_der()
            .map_err(|e| CertForgeError::EncodingError(e.to_string()))?;
        let signature = key.sign_prehash(digest, &digest.hash(&tbs_der))?;

        self.signed = Some(x509_cert::Certificate {
            tbs_certificate,
            signature_algorithm: algorithm.to_algorithm_identifier(),
            signature: BitString::from_bytes(&signature)?,
        });
        self.signature_algorithm = Some(algorithm);
        self.dirty = false;

        debug!(subject = %self.subject, algorithm = %algorithm, "signed certificate");
        Ok(())
    }

    /// Checks the signed snapshot against `key`.
    ///
    /// Returns `Ok(false)` while the certificate is dirty or unsigned, and when
    /// `key` belongs to a different family than the signature algorithm. A
    /// signature that does not match, or an algorithm outside the supported
    /// set, is a certificate error.
    pub fn verify(&self, key: &PublicKey) -> Result<bool> {
        if self.dirty {
            return Ok(false);
        }
        let Some(signed) = &self.signed else {
            return Ok(false);
        };

        let algorithm = SignatureAlgorithm::from_oid(signed.signature_algorithm.oid)?;
        if algorithm.key != key.algorithm() {
            return Ok(false);
        }

        let tbs_der = signed
            .tbs_certificate
            .to_der()
            .map_err(|e| CertForgeError::EncodingError(e.to_string()))?;
        let signature = signed.signature.as_bytes().ok_or_else(|| {
            CertForgeError::CertificateError("signature has unused bits".to_string())
        })?;

        let digest = algorithm.digest;
        if key.verify_prehash(digest, &digest.hash(&tbs_der), signature) {
            Ok(true)
        } else {
            Err(CertForgeError::CertificateError(
                "certificate signature does not verify with the supplied key".to_string(),
            ))
        }
    }

    /// Whether `key` is the private half of this certificate's public key.
    pub fn check_private_key(&self, key: &KeyPair) -> bool {
        self.public_key
            .as_ref()
            .is_some_and(|public| *public == key.public_key())
    }

    /// Encodes the signed snapshot into DER format.
    ///
    /// # Returns
    /// A byte vector containing the DER-encoded certificate, or a certificate
    /// error when the certificate was never signed.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.signed
            .as_ref()
            .ok_or_else(|| CertForgeError::CertificateError("certificate is not signed".to_string()))?
            .to_der()
            .map_err(|e| CertForgeError::EncodingError(e.to_string()))
    }

    /// Encodes the signed snapshot into PEM format under the `CERTIFICATE` label.
    ///
    /// # Returns
    /// A string containing the PEM-encoded certificate.
    pub fn to_pem(&self) -> Result<String> {
        Ok(crate::pem::encode_block(
            crate::pem::Label::Certificate,
            &[],
            &self.to_der()?,
        ))
    }
}

impl PartialEq for Certificate {
    /// Field-wise equality including the signature bytes; the dirty flag and
    /// the cached snapshot encoding are not compared.
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.serial == other.serial
            && self.not_before == other.not_before
            && self.not_after == other.not_after
            && self.subject == other.subject
            && self.issuer == other.issuer
            && self.public_key == other.public_key
            && self.signature_algorithm == other.signature_algorithm
            && self.signature() == other.signature()
            && self.extensions == other.extensions
            && self.aux == other.aux
    }
}
