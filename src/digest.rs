use std::fmt;
use std::str::FromStr;

use rsa::Pkcs1v15Sign;
use sha2::digest::Digest as _;

use crate::error::{CertForgeError, Result};

/// Message digests accepted when signing certificates.
///
/// `Dss1` is the legacy OpenSSL spelling of SHA-1 for DSA signatures; it hashes
/// exactly like [`Digest::Sha1`] but is the only SHA-1 spelling DSA accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Digest {
    Md5,
    Sha1,
    Dss1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl Digest {
    /// The OpenSSL name of the digest, e.g. `"SHA256"` or `"DSS1"`.
    pub fn name(self) -> &'static str {
        match self {
            Digest::Md5 => "MD5",
            Digest::Sha1 => "SHA1",
            Digest::Dss1 => "DSS1",
            Digest::Sha224 => "SHA224",
            Digest::Sha256 => "SHA256",
            Digest::Sha384 => "SHA384",
            Digest::Sha512 => "SHA512",
        }
    }

    /// The name of the hash algorithm actually computed. `DSS1` computes `SHA1`.
    pub fn algorithm(self) -> &'static str {
        match self {
            Digest::Dss1 => "SHA1",
            other => other.name(),
        }
    }

    /// Hashes `data` with this digest.
    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            Digest::Md5 => md5::Md5::digest(data).to_vec(),
            Digest::Sha1 | Digest::Dss1 => sha1::Sha1::digest(data).to_vec(),
            Digest::Sha224 => sha2::Sha224::digest(data).to_vec(),
            Digest::Sha256 => sha2::Sha256::digest(data).to_vec(),
            Digest::Sha384 => sha2::Sha384::digest(data).to_vec(),
            Digest::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }

    pub(crate) fn pkcs1v15(self) -> Pkcs1v15Sign {
        match self {
            Digest::Md5 => Pkcs1v15Sign::new::<md5::Md5>(),
            Digest::Sha1 | Digest::Dss1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
            Digest::Sha224 => Pkcs1v15Sign::new::<sha2::Sha224>(),
            Digest::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
            Digest::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
            Digest::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
        }
    }
}

impl FromStr for Digest {
    type Err = CertForgeError;

    /// Parses an OpenSSL digest name, ignoring case and dashes (`sha-256`).
    fn from_str(name: &str) -> Result<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "MD5" => Ok(Digest::Md5),
            "SHA1" => Ok(Digest::Sha1),
            "DSS1" => Ok(Digest::Dss1),
            "SHA224" => Ok(Digest::Sha224),
            "SHA256" => Ok(Digest::Sha256),
            "SHA384" => Ok(Digest::Sha384),
            "SHA512" => Ok(Digest::Sha512),
            _ => Err(CertForgeError::CryptoError(format!(
                "unsupported digest algorithm ({name})"
            ))),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
