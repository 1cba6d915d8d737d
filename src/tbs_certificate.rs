use std::time::Duration as StdDuration;

use der::asn1::{GeneralizedTime, UtcTime};
use der::{Decode, Encode};
use rsa::BigUint;
use time::OffsetDateTime;
use x509_cert::Version;
use x509_cert::certificate::TbsCertificateInner;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Time;

use crate::cert::SignatureAlgorithm;
use crate::cert::params::{Extension, Name};
use crate::error::{CertForgeError, Result};
use crate::key::PublicKey;

/// Represents the "To Be Signed" (TBS) portion of an X.509 certificate.
/// This struct contains all the fields required to generate a valid X.509 certificate.
///
/// # Fields
/// * `version` - The certificate version.
/// * `serial_number` - The unique identifier for the certificate.
/// * `signature_algorithm` - The algorithm used to sign the certificate.
/// * `issuer` - The name of the certificate issuer.
/// * `not_before` - The start of the certificate's validity period.
/// * `not_after` - The end of the certificate's validity period.
/// * `subject` - The name of the certificate subject.
/// * `subject_public_key` - The public key of the certificate subject.
/// * `extensions` - Additional X.509 extensions for the certificate.
#[derive(Clone, Debug)]
pub struct TbsCertificate {
    pub version: Version,
    pub serial_number: BigUint,
    /// `None` when read from a certificate signed with an algorithm we cannot verify
    pub signature_algorithm: Option<SignatureAlgorithm>,
    pub issuer: Name,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub subject: Name,
    pub subject_public_key: PublicKey,
    pub extensions: Vec<Extension>,
}

/// Converts a point in time to the X.509 encoding RFC 5280 asks for:
/// UTCTime through 2049, GeneralizedTime from 2050 on.
pub(crate) fn to_x509_time(at: OffsetDateTime) -> Result<Time> {
    let seconds = u64::try_from(at.unix_timestamp()).map_err(|_| {
        CertForgeError::InvalidInput(format!("validity time {at} is before 1970"))
    })?;
    let since_epoch = StdDuration::from_secs(seconds);
    if at.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(since_epoch)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(
            since_epoch,
        )?))
    }
}

pub(crate) fn from_x509_time(time: &Time) -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + time.to_unix_duration()
}

fn serial_to_x509(serial: &BigUint) -> Result<SerialNumber> {
    let mut bytes = serial.to_bytes_be();
    if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        bytes.insert(0, 0);
    }
    Ok(SerialNumber::new(&bytes)?)
}

impl TbsCertificate {
    /// Converts the `TbsCertificate` into a `TbsCertificateInner` for DER encoding.
    ///
    /// # Returns
    /// A `TbsCertificateInner`, or an error if a field cannot be encoded or the
    /// signature algorithm is unknown.
    pub fn to_tbs_certificate_inner(&self) -> Result<TbsCertificateInner> {
        let signature = self
            .signature_algorithm
            .as_ref()
            .ok_or_else(|| CertForgeError::CertificateError("no signature algorithm".to_string()))?
            .to_algorithm_identifier();

        let extensions = self
            .extensions
            .iter()
            .map(Extension::to_x509)
            .collect::<Result<Vec<_>>>()?;

        let validity = x509_cert::time::Validity {
            not_before: to_x509_time(self.not_before)?,
            not_after: to_x509_time(self.not_after)?,
        };

        let subject_public_key_info = x509_cert::spki::SubjectPublicKeyInfoOwned::from_der(
            &self.subject_public_key.to_spki_der()?,
        )?;

        Ok(TbsCertificateInner {
            version: self.version,
            serial_number: serial_to_x509(&self.serial_number)?,
            signature,
            issuer: self.issuer.as_x509_name().clone(),
            validity,
            subject: self.subject.as_x509_name().clone(),
            subject_public_key_info,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: (!extensions.is_empty()).then_some(extensions),
        })
    }

    /// Creates a `TbsCertificate` from a `TbsCertificateInner`.
    ///
    /// Extensions are copied verbatim in encoded order.
    ///
    /// # Arguments
    /// * `inner` - The `TbsCertificateInner` object to convert from.
    ///
    /// # Returns
    /// A `TbsCertificate`, or a certificate error when the subject key is
    /// neither RSA nor DSA.
    pub fn from_tbs_certificate_inner(inner: &TbsCertificateInner) -> Result<Self> {
        let spki_der = inner.subject_public_key_info.to_der()?;
        let subject_public_key = PublicKey::from_spki_der(&spki_der).map_err(|e| match e {
            CertForgeError::CryptoError(msg) => CertForgeError::CertificateError(msg),
            other => other,
        })?;

        let extensions = inner
            .extensions
            .iter()
            .flatten()
            .map(Extension::from_x509)
            .collect();

        Ok(Self {
            version: inner.version,
            serial_number: BigUint::from_bytes_be(inner.serial_number.as_bytes()),
            signature_algorithm: SignatureAlgorithm::from_oid(inner.signature.oid).ok(),
            issuer: Name::from_x509_name(&inner.issuer),
            not_before: from_x509_time(&inner.validity.not_before),
            not_after: from_x509_time(&inner.validity.not_after),
            subject: Name::from_x509_name(&inner.subject),
            subject_public_key,
            extensions,
        })
    }

    /// Encodes the `TbsCertificate` into DER format.
    ///
    /// # Returns
    /// A byte vector containing the DER-encoded TBS structure.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.to_tbs_certificate_inner()?
            .to_der()
            .map_err(|e| CertForgeError::EncodingError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn picks_utc_time_before_2050() {
        let time = to_x509_time(datetime!(2049-12-31 23:59:59 UTC)).unwrap();
        assert!(matches!(time, Time::UtcTime(_)));
        let time = to_x509_time(datetime!(2050-01-01 00:00:00 UTC)).unwrap();
        assert!(matches!(time, Time::GeneralTime(_)));
        assert_eq!(from_x509_time(&time), datetime!(2050-01-01 00:00:00 UTC));
    }

    #[test]
    fn rejects_pre_epoch_dates() {
        assert!(to_x509_time(datetime!(1969-07-20 20:17:00 UTC)).is_err());
    }

    #[test]
    fn high_bit_serials_stay_positive() {
        let serial = serial_to_x509(&BigUint::from(0x80u32)).unwrap();
        assert_eq!(serial.to_der().unwrap(), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(BigUint::from_bytes_be(serial.as_bytes()), BigUint::from(0x80u32));
        let serial = serial_to_x509(&BigUint::from(0x1234u32)).unwrap();
        assert_eq!(serial.to_der().unwrap(), vec![0x02, 0x02, 0x12, 0x34]);
    }
}
