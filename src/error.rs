//! use certforge::error::CertForgeError;

use thiserror::Error;

/// Represents errors that can occur in the CertForge library.
///
/// Every payload is a rendered message so the error stays `Clone` and can be
/// handed across the TLS bridge without borrowing from the failing operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CertForgeError {
    /// Malformed PEM armor: missing end marker, bad base64, bad headers.
    #[error("PEM format error: {0}")]
    FormatError(String),

    /// Unsupported algorithm, failed decryption, missing password.
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// Error related to certificate operations.
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// A peer chain was rejected by the trust policy.
    #[error("Trust error: {0}")]
    TrustError(String),

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    DecodingError(String),

    /// Error due to invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error during key generation.
    #[error("Key generation error: {0}")]
    KeyGenerationError(String),

    /// Error from RSA operations.
    #[error("RSA error: {0}")]
    RsaError(String),

    /// Error from RSA PKCS1 operations.
    #[error("RSA PKCS1 error: {0}")]
    RsaPkcs1Error(String),

    /// Filesystem error while loading PEM material.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CertForgeError>;

impl From<der::Error> for CertForgeError {
    /// Converts a `der::Error` into a `CertForgeError`.
    fn from(err: der::Error) -> Self {
        CertForgeError::DecodingError(err.to_string())
    }
}

impl From<rsa::Error> for CertForgeError {
    fn from(err: rsa::Error) -> Self {
        CertForgeError::RsaError(err.to_string())
    }
}

impl From<rsa::pkcs1::Error> for CertForgeError {
    fn from(err: rsa::pkcs1::Error) -> Self {
        CertForgeError::RsaPkcs1Error(err.to_string())
    }
}

impl From<pkcs8::spki::Error> for CertForgeError {
    fn from(err: pkcs8::spki::Error) -> Self {
        CertForgeError::DecodingError(err.to_string())
    }
}

impl From<signature::Error> for CertForgeError {
    fn from(err: signature::Error) -> Self {
        CertForgeError::CryptoError(err.to_string())
    }
}

impl From<std::io::Error> for CertForgeError {
    fn from(err: std::io::Error) -> Self {
        CertForgeError::IoError(err.to_string())
    }
}
