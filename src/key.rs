use std::fmt;
use std::str::FromStr;

use const_oid::ObjectIdentifier;
use der::asn1::Uint;
use der::{Decode, Encode, Sequence};
use pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{
    BigUint, RsaPrivateKey, RsaPublicKey,
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey},
};
use signature::SignatureEncoding;
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use x509_cert::spki::SubjectPublicKeyInfoRef;

use crate::digest::Digest;
use crate::error::{CertForgeError, Result};

/// `rsaEncryption` (RFC 8017).
pub const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
/// `id-dsa` (RFC 3279).
pub const ID_DSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10040.4.1");

/// The key families a certificate can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Rsa,
    Dsa,
}

impl KeyAlgorithm {
    /// The OpenSSL name of the algorithm, `"RSA"` or `"DSA"`.
    pub fn name(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::Dsa => "DSA",
        }
    }

    /// The SubjectPublicKeyInfo algorithm OID.
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            KeyAlgorithm::Rsa => RSA_ENCRYPTION,
            KeyAlgorithm::Dsa => ID_DSA,
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = CertForgeError;

    fn from_str(name: &str) -> Result<Self> {
        if name.eq_ignore_ascii_case("RSA") {
            Ok(KeyAlgorithm::Rsa)
        } else if name.eq_ignore_ascii_case("DSA") {
            Ok(KeyAlgorithm::Dsa)
        } else {
            Err(CertForgeError::CryptoError(format!(
                "unsupported key algorithm ({name})"
            )))
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// OpenSSL "traditional" DSA private key: `SEQUENCE { 0, p, q, g, y, x }`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct TraditionalDsaKey {
    version: u8,
    p: Uint,
    q: Uint,
    g: Uint,
    y: Uint,
    x: Uint,
}

fn to_uint(value: &BigUint) -> Result<Uint> {
    Ok(Uint::new(&value.to_bytes_be())?)
}

fn from_uint(value: &Uint) -> BigUint {
    BigUint::from_bytes_be(value.as_bytes())
}

/// Supported key types for certificate operations.
#[derive(Clone)]
pub enum KeyPair {
    Rsa {
        private: Box<RsaPrivateKey>,
        public: RsaPublicKey,
    },
    Dsa {
        signing_key: Box<dsa::SigningKey>,
    },
}

impl KeyPair {
    /// Generate an RSA key pair with the specified number of bits.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        let mut rng = rand_core::OsRng;
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CertForgeError::KeyGenerationError(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair::Rsa {
            private: Box::new(private),
            public,
        })
    }

    /// Generate a DSA key pair over fresh 2048/256-bit domain parameters.
    ///
    /// Parameter generation is slow; prefer importing existing keys in hot paths.
    pub fn generate_dsa() -> Self {
        let mut rng = rand_core::OsRng;
        let components = dsa::Components::generate(&mut rng, dsa::KeySize::DSA_2048_256);
        let signing_key = dsa::SigningKey::generate(&mut rng, components);
        KeyPair::Dsa {
            signing_key: Box::new(signing_key),
        }
    }

    /// The key family of this pair.
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeyPair::Rsa { .. } => KeyAlgorithm::Rsa,
            KeyPair::Dsa { .. } => KeyAlgorithm::Dsa,
        }
    }

    /// The public half of this pair.
    pub fn public_key(&self) -> PublicKey {
        match self {
            KeyPair::Rsa { public, .. } => PublicKey::Rsa(public.clone()),
            KeyPair::Dsa { signing_key } => PublicKey::Dsa(signing_key.verifying_key().clone()),
        }
    }

    /// Imports a PKCS#1 `RSAPrivateKey` DER document.
    pub fn import_rsa_der(der: &[u8]) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs1_der(der)?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair::Rsa {
            private: Box::new(private),
            public,
        })
    }

    /// Imports an OpenSSL traditional `DSAPrivateKey` DER document.
    pub fn import_dsa_der(der: &[u8]) -> Result<Self> {
        let doc = TraditionalDsaKey::from_der(der)?;
        if doc.version != 0 {
            return Err(CertForgeError::DecodingError(format!(
                "unsupported DSA private key version {}",
                doc.version
            )));
        }
        let components =
            dsa::Components::from_components(from_uint(&doc.p), from_uint(&doc.q), from_uint(&doc.g))?;
        let verifying_key = dsa::VerifyingKey::from_components(components, from_uint(&doc.y))?;
        let signing_key = dsa::SigningKey::from_components(verifying_key, from_uint(&doc.x))?;
        Ok(KeyPair::Dsa {
            signing_key: Box::new(signing_key),
        })
    }

    /// Encodes the private key in its OpenSSL traditional DER form
    /// (PKCS#1 for RSA, `SEQUENCE {0, p, q, g, y, x}` for DSA).
    pub fn to_traditional_der(&self) -> Result<Vec<u8>> {
        match self {
            KeyPair::Rsa { private, .. } => Ok(private.to_pkcs1_der()?.as_bytes().to_vec()),
            KeyPair::Dsa { signing_key } => {
                let verifying_key = signing_key.verifying_key();
                let components = verifying_key.components();
                let doc = TraditionalDsaKey {
                    version: 0,
                    p: to_uint(components.p())?,
                    q: to_uint(components.q())?,
                    g: to_uint(components.g())?,
                    y: to_uint(verifying_key.y())?,
                    x: to_uint(signing_key.x())?,
                };
                doc.to_der()
                    .map_err(|e| CertForgeError::EncodingError(e.to_string()))
            }
        }
    }

    /// Signs an already computed `digest` value of `data_hash`.
    ///
    /// RSA produces a PKCS#1 v1.5 signature, DSA a DER `Dss-Sig-Value`.
    pub fn sign_prehash(&self, digest: Digest, data_hash: &[u8]) -> Result<Vec<u8>> {
        match self {
            KeyPair::Rsa { private, .. } => Ok(private.sign(digest.pkcs1v15(), data_hash)?),
            KeyPair::Dsa { signing_key } => {
                let signature: dsa::Signature = signing_key.sign_prehash(data_hash)?;
                Ok(signature.to_vec())
            }
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm())
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Public keys a certificate can carry.
#[derive(Clone)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Dsa(dsa::VerifyingKey),
}

impl PublicKey {
    pub fn from_key_pair(key_pair: &KeyPair) -> Self {
        key_pair.public_key()
    }

    /// Decodes a DER `SubjectPublicKeyInfo`.
    ///
    /// Only RSA and DSA keys are supported; other algorithms are a crypto error.
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        let spki = SubjectPublicKeyInfoRef::from_der(der)?;
        match spki.algorithm.oid {
            RSA_ENCRYPTION => Ok(PublicKey::Rsa(RsaPublicKey::from_public_key_der(der)?)),
            ID_DSA => Ok(PublicKey::Dsa(dsa::VerifyingKey::from_public_key_der(der)?)),
            oid => Err(CertForgeError::CryptoError(format!(
                "The algorithm {oid} is unsupported for public keys"
            ))),
        }
    }

    /// Decodes a PKCS#1 `RSAPublicKey` DER document.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self> {
        Ok(PublicKey::Rsa(RsaPublicKey::from_pkcs1_der(der)?))
    }

    /// Encodes the key as a DER `SubjectPublicKeyInfo`.
    pub fn to_spki_der(&self) -> Result<Vec<u8>> {
        let document = match self {
            PublicKey::Rsa(key) => key.to_public_key_der(),
            PublicKey::Dsa(key) => key.to_public_key_der(),
        }
        .map_err(|e| CertForgeError::EncodingError(e.to_string()))?;
        Ok(document.as_bytes().to_vec())
    }

    /// Encodes an RSA key as PKCS#1 `RSAPublicKey`.
    pub fn to_pkcs1_der(&self) -> Result<Vec<u8>> {
        match self {
            PublicKey::Rsa(key) => Ok(key.to_pkcs1_der()?.as_bytes().to_vec()),
            PublicKey::Dsa(_) => Err(CertForgeError::InvalidInput(
                "PKCS#1 encoding is only defined for RSA keys".to_string(),
            )),
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PublicKey::Rsa(_) => KeyAlgorithm::Rsa,
            PublicKey::Dsa(_) => KeyAlgorithm::Dsa,
        }
    }

    /// Verifies `signature` over an already hashed message.
    ///
    /// A malformed or mismatching signature is reported as `Ok(false)`;
    /// callers decide whether that is an error.
    pub fn verify_prehash(&self, digest: Digest, data_hash: &[u8], signature: &[u8]) -> bool {
        match self {
            PublicKey::Rsa(key) => key.verify(digest.pkcs1v15(), data_hash, signature).is_ok(),
            PublicKey::Dsa(key) => match dsa::Signature::try_from(signature) {
                Ok(signature) => key.verify_prehash(data_hash, &signature).is_ok(),
                Err(_) => false,
            },
        }
    }
}

impl PartialEq for PublicKey {
    /// Keys are equal when their SubjectPublicKeyInfo encodings are identical.
    fn eq(&self, other: &Self) -> bool {
        match (self.to_spki_der(), other.to_spki_der()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicKey::Rsa(key) => f
                .debug_tuple("PublicKey::Rsa")
                .field(&rsa::traits::PublicKeyParts::n(key).bits())
                .finish(),
            PublicKey::Dsa(key) => f
                .debug_tuple("PublicKey::Dsa")
                .field(&key.components().p().bits())
                .finish(),
        }
    }
}
