use const_oid::ObjectIdentifier;
use der::asn1::OctetString;
use der::{Any, Decode, Encode, Sequence};

use crate::error::{CertForgeError, Result};

/// OpenSSL's auxiliary trust record (`X509_CERT_AUX`), carried after the
/// certificate in the `TRUSTED CERTIFICATE` PEM form.
///
/// ```text
/// X509_CERT_AUX ::= SEQUENCE {
///     trust   SEQUENCE OF OBJECT IDENTIFIER OPTIONAL,
///     reject  [0] IMPLICIT SEQUENCE OF OBJECT IDENTIFIER OPTIONAL,
///     alias   UTF8String OPTIONAL,
///     keyid   OCTET STRING OPTIONAL,
///     other   [1] IMPLICIT SEQUENCE OF ANY OPTIONAL }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Sequence)]
pub struct AuxiliaryTrust {
    #[asn1(optional = "true")]
    pub trust: Option<Vec<ObjectIdentifier>>,

    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub reject: Option<Vec<ObjectIdentifier>>,

    #[asn1(optional = "true")]
    pub alias: Option<String>,

    #[asn1(optional = "true")]
    pub keyid: Option<OctetString>,

    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub other: Option<Vec<Any>>,
}

impl AuxiliaryTrust {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(<Self as Decode>::from_der(der)?)
    }

    /// Encodes the record. Empty `trust`, `reject` and `other` lists are left
    /// out rather than written as empty sequences.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let record = AuxiliaryTrust {
            trust: self.trust.clone().filter(|t| !t.is_empty()),
            reject: self.reject.clone().filter(|r| !r.is_empty()),
            alias: self.alias.clone(),
            keyid: self.keyid.clone(),
            other: self.other.clone().filter(|o| !o.is_empty()),
        };
        Encode::to_der(&record).map_err(|e| CertForgeError::EncodingError(e.to_string()))
    }

    /// Adds `purpose` to the trusted uses.
    pub fn add_trust(&mut self, purpose: ObjectIdentifier) {
        self.trust.get_or_insert_with(Vec::new).push(purpose);
    }

    /// Adds `purpose` to the rejected uses.
    pub fn add_reject(&mut self, purpose: ObjectIdentifier) {
        self.reject.get_or_insert_with(Vec::new).push(purpose);
    }

    pub fn is_trusted_for(&self, purpose: ObjectIdentifier) -> bool {
        self.trust.as_ref().is_some_and(|t| t.contains(&purpose))
    }

    pub fn is_rejected_for(&self, purpose: ObjectIdentifier) -> bool {
        self.reject.as_ref().is_some_and(|r| r.contains(&purpose))
    }

    pub fn keyid(&self) -> Option<&[u8]> {
        self.keyid.as_ref().map(OctetString::as_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use const_oid::db::rfc5912::{ID_KP_CLIENT_AUTH, ID_KP_SERVER_AUTH};

    #[test]
    fn encodes_like_openssl_trustout() {
        let mut aux = AuxiliaryTrust::default();
        aux.add_trust(ID_KP_SERVER_AUTH);
        aux.add_reject(ID_KP_CLIENT_AUTH);
        aux.alias = Some("fixture alias".to_string());

        let der = aux.to_der().unwrap();
        // SEQUENCE { SEQUENCE { serverAuth }, [0] { clientAuth }, UTF8String }
        assert_eq!(der[0], 0x30);
        assert_eq!(&der[2..4], &[0x30, 0x0a]);
        assert_eq!(&der[14..16], &[0xa0, 0x0a]);
        assert_eq!(&der[26..28], &[0x0c, 0x0d]);
        assert_eq!(AuxiliaryTrust::from_der(&der).unwrap(), aux);
    }

    #[test]
    fn empty_record_is_an_empty_sequence() {
        let aux = AuxiliaryTrust::default();
        assert_eq!(aux.to_der().unwrap(), vec![0x30, 0x00]);
        assert!(!aux.is_trusted_for(ID_KP_SERVER_AUTH));
        assert_eq!(aux.keyid(), None);
    }

    #[test]
    fn empty_lists_are_omitted() {
        let aux = AuxiliaryTrust {
            trust: Some(Vec::new()),
            reject: Some(Vec::new()),
            other: Some(Vec::new()),
            ..Default::default()
        };
        assert_eq!(aux.to_der().unwrap(), vec![0x30, 0x00]);

        let aux = AuxiliaryTrust {
            trust: Some(Vec::new()),
            reject: Some(vec![ID_KP_CLIENT_AUTH]),
            alias: Some("a".to_string()),
            ..Default::default()
        };
        let der = aux.to_der().unwrap();
        // SEQUENCE { [0] { clientAuth }, UTF8String }
        assert_eq!(&der[..4], &[0x30, 0x0f, 0xa0, 0x0a]);
        let decoded = AuxiliaryTrust::from_der(&der).unwrap();
        assert_eq!(decoded.trust, None);
        assert!(decoded.is_rejected_for(ID_KP_CLIENT_AUTH));
    }
}
