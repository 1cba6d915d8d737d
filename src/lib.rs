//! # CertForge - A Pure Rust PKI Toolkit
//!
//! CertForge builds, signs, verifies and serializes X.509 certificates with the
//! RustCrypto libraries, reads and writes the OpenSSL PEM formats (including
//! password-protected "traditional" private keys), and plugs certificate trust
//! decisions into a TLS handshake.
//!
//! ## Supported Key Types
//!
//! - **RSA**: PKCS#1 v1.5 signatures with MD5, SHA-1 and the SHA-2 family
//! - **DSA**: SHA-1 (`Dss1`) and the SHA-2 family
//!
//! ## Supported Formats
//!
//! - **PEM**: public and private keys, certificates (plain and `TRUSTED`), CRLs,
//!   certificate requests, PKCS#7 and DH parameters
//! - **Legacy encryption**: `Proc-Type: 4,ENCRYPTED` keys with `DES-EDE3-CBC`
//!   or `DES-CBC`
//! - **DER**: everything above in binary form
//!
//! ## Quick Start
//!
//! ### Signing a Certificate
//!
//! ```rust,no_run
//! use certforge::{
//!     cert::{Certificate, DistinguishedName, Extension, Validity},
//!     cert::extensions::SubjectAltName,
//!     digest::Digest,
//!     key::KeyPair,
//! };
//!
//! # fn main() -> Result<(), certforge::error::CertForgeError> {
//! let key_pair = KeyPair::generate_rsa(2048)?;
//!
//! let subject = DistinguishedName::builder()
//!     .common_name("example.com")
//!     .organization("Example Corp")
//!     .country("US")
//!     .build()
//!     .as_name()?;
//!
//! let mut cert = Certificate::new();
//! cert.set_serial(1u32);
//! cert.set_subject(subject.clone());
//! cert.set_issuer(subject);
//! cert.set_validity(Validity::for_days(365));
//! cert.set_public_key(key_pair.public_key());
//! cert.add_extension(Extension::from_extension(
//!     &SubjectAltName::dns(["example.com", "www.example.com"]),
//!     false,
//! )?)?;
//! cert.sign(&key_pair, Digest::Sha256)?;
//!
//! println!("Certificate:\n{}", cert.to_pem()?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Reading an Encrypted Key
//!
//! ```rust,no_run
//! use certforge::pem::{self, PemObject};
//!
//! # fn main() -> Result<(), certforge::error::CertForgeError> {
//! let text = std::fs::read_to_string("key.pem")?;
//! match pem::parse(&text, Some(b"hunter2"))? {
//!     Some(PemObject::PrivateKey(key)) => println!("{} key", key.algorithm()),
//!     Some(other) => println!("not a key: {other:?}"),
//!     None => println!("no PEM block"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Verifying a Peer Chain
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use certforge::tls::{Role, TrustContext, VerifyFlag, store::X509Store};
//!
//! # fn main() -> Result<(), certforge::error::CertForgeError> {
//! let mut store = X509Store::new();
//! store.add_file("ca.pem")?;
//!
//! let ctx = TrustContext::builder()
//!     .verify_mode(VerifyFlag::Peer)
//!     .cert_store(Arc::new(store))
//!     .build();
//!
//! # let peer_chain: Vec<Vec<u8>> = Vec::new();
//! let mut verifier = ctx.peer_verifier(Role::Client);
//! verifier.check_peer_chain(&peer_chain)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use certforge::{cert::Certificate, error::CertForgeError};
//!
//! match Certificate::from_pem("invalid pem data") {
//!     Ok(cert) => println!("parsed {}", cert.subject()),
//!     Err(CertForgeError::FormatError(msg)) => println!("bad PEM: {}", msg),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`key`]: RSA/DSA key pairs, public keys and their encodings
//! - [`digest`]: Message digests used for signing
//! - [`cert`]: The mutable certificate model, names and extensions
//! - [`pem`]: PEM armor and the legacy key encryption envelope
//! - [`tls`]: The TLS trust bridge and the default X.509 store
//! - [`error`]: Error types
//! - [`tbs_certificate`]: Low-level certificate structure manipulation

pub mod cert;
pub mod digest;
pub mod error;
pub mod key;
pub mod pem;
pub mod tbs_certificate;
pub mod tls;
