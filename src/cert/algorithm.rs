use std::fmt;

use const_oid::ObjectIdentifier;
use der::AnyRef;
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::digest::Digest;
use crate::error::{CertForgeError, Result};
use crate::key::KeyAlgorithm;

const MD5_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.4");
const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
const SHA224_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.14");
const DSA_WITH_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10040.4.3");
const DSA_WITH_SHA224: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.3.1");
const DSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.3.2");
const DSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.3.3");
const DSA_WITH_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.3.4");

/// A certificate signature algorithm: a key family paired with a digest.
///
/// Displays in the OpenSSL style, e.g. `SHA256WITHRSA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureAlgorithm {
    pub key: KeyAlgorithm,
    pub digest: Digest,
}

impl SignatureAlgorithm {
    /// Pairs `key` with `digest`, refusing the combinations OpenSSL refuses:
    /// DSA with MD5, RSA with DSS1, and DSA with SHA1 spelled `SHA1`
    /// (DSA wants `DSS1`).
    pub fn new(key: KeyAlgorithm, digest: Digest) -> Result<Self> {
        let refused = matches!(
            (key, digest),
            (KeyAlgorithm::Dsa, Digest::Md5)
                | (KeyAlgorithm::Rsa, Digest::Dss1)
                | (KeyAlgorithm::Dsa, Digest::Sha1)
        );
        if refused {
            return Err(CertForgeError::CertificateError(format!(
                "unsupported key / digest algorithm ({}/{})",
                key.name(),
                digest.name()
            )));
        }
        Ok(Self { key, digest })
    }

    /// The OpenSSL name: digest algorithm, `WITH`, key algorithm.
    pub fn name(&self) -> String {
        format!("{}WITH{}", self.digest.algorithm(), self.key.name())
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match (self.key, self.digest) {
            (KeyAlgorithm::Rsa, Digest::Md5) => MD5_WITH_RSA,
            (KeyAlgorithm::Rsa, Digest::Sha1 | Digest::Dss1) => SHA1_WITH_RSA,
            (KeyAlgorithm::Rsa, Digest::Sha224) => SHA224_WITH_RSA,
            (KeyAlgorithm::Rsa, Digest::Sha256) => SHA256_WITH_RSA,
            (KeyAlgorithm::Rsa, Digest::Sha384) => SHA384_WITH_RSA,
            (KeyAlgorithm::Rsa, Digest::Sha512) => SHA512_WITH_RSA,
            // MD5 is refused in `new`
            (KeyAlgorithm::Dsa, Digest::Sha1 | Digest::Dss1 | Digest::Md5) => DSA_WITH_SHA1,
            (KeyAlgorithm::Dsa, Digest::Sha224) => DSA_WITH_SHA224,
            (KeyAlgorithm::Dsa, Digest::Sha256) => DSA_WITH_SHA256,
            (KeyAlgorithm::Dsa, Digest::Sha384) => DSA_WITH_SHA384,
            (KeyAlgorithm::Dsa, Digest::Sha512) => DSA_WITH_SHA512,
        }
    }

    /// Maps a signature OID back to its algorithm. DSA with SHA-1 reads as `DSS1`.
    pub fn from_oid(oid: ObjectIdentifier) -> Result<Self> {
        let (key, digest) = match oid {
            MD5_WITH_RSA => (KeyAlgorithm::Rsa, Digest::Md5),
            SHA1_WITH_RSA => (KeyAlgorithm::Rsa, Digest::Sha1),
            SHA224_WITH_RSA => (KeyAlgorithm::Rsa, Digest::Sha224),
            SHA256_WITH_RSA => (KeyAlgorithm::Rsa, Digest::Sha256),
            SHA384_WITH_RSA => (KeyAlgorithm::Rsa, Digest::Sha384),
            SHA512_WITH_RSA => (KeyAlgorithm::Rsa, Digest::Sha512),
            DSA_WITH_SHA1 => (KeyAlgorithm::Dsa, Digest::Dss1),
            DSA_WITH_SHA224 => (KeyAlgorithm::Dsa, Digest::Sha224),
            DSA_WITH_SHA256 => (KeyAlgorithm::Dsa, Digest::Sha256),
            DSA_WITH_SHA384 => (KeyAlgorithm::Dsa, Digest::Sha384),
            DSA_WITH_SHA512 => (KeyAlgorithm::Dsa, Digest::Sha512),
            _ => {
                return Err(CertForgeError::CertificateError(format!(
                    "unsupported signature algorithm {oid}"
                )));
            }
        };
        Ok(Self { key, digest })
    }

    /// The `AlgorithmIdentifier` written into the certificate. RSA carries
    /// explicit NULL parameters, DSA none.
    pub fn to_algorithm_identifier(&self) -> AlgorithmIdentifierOwned {
        let parameters = match self.key {
            KeyAlgorithm::Rsa => Some(AnyRef::NULL.into()),
            KeyAlgorithm::Dsa => None,
        };
        AlgorithmIdentifierOwned {
            oid: self.oid(),
            parameters,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
