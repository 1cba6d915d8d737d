#![allow(dead_code)]

use std::path::PathBuf;

use certforge::cert::extensions::BasicConstraints;
use certforge::cert::{Certificate, Extension, Name, Validity};
use certforge::digest::Digest;
use certforge::key::KeyPair;
use certforge::pem;

pub const CERT_PEM: &str = include_str!("fixtures/cert.pem");
pub const TRUSTED_PEM: &str = include_str!("fixtures/trusted.pem");
pub const RSA_PEM: &str = include_str!("fixtures/rsa.pem");
pub const RSA_OTHER_PEM: &str = include_str!("fixtures/rsa_other.pem");
pub const RSA_ENC_PEM: &str = include_str!("fixtures/rsa_enc.pem");
pub const DSA_PEM: &str = include_str!("fixtures/dsa.pem");
pub const DSA_CERT_PEM: &str = include_str!("fixtures/dsa_cert.pem");
pub const CRL_PEM: &str = include_str!("fixtures/crl.pem");
pub const CSR_PEM: &str = include_str!("fixtures/csr.pem");
pub const DH_PEM: &str = include_str!("fixtures/dh.pem");

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture_cert() -> Certificate {
    Certificate::from_pem(CERT_PEM).unwrap()
}

pub fn rsa_key() -> KeyPair {
    pem::read_private_key(RSA_PEM, None).unwrap().unwrap()
}

pub fn other_rsa_key() -> KeyPair {
    pem::read_private_key(RSA_OTHER_PEM, None).unwrap().unwrap()
}

pub fn dsa_key() -> KeyPair {
    pem::read_private_key(DSA_PEM, None).unwrap().unwrap()
}

/// A certificate for `subject`, issued by `issuer` and signed with `signer`,
/// valid from now for a month.
pub fn issue(subject: &str, issuer: &str, key: &KeyPair, signer: &KeyPair) -> Certificate {
    build(subject, issuer, key, signer, false)
}

/// Like [`issue`], but marked as a CA.
pub fn issue_ca(subject: &str, issuer: &str, key: &KeyPair, signer: &KeyPair) -> Certificate {
    build(subject, issuer, key, signer, true)
}

fn build(subject: &str, issuer: &str, key: &KeyPair, signer: &KeyPair, ca: bool) -> Certificate {
    let mut cert = Certificate::new();
    cert.set_serial(2u32);
    cert.set_subject(Name::parse(subject).unwrap());
    cert.set_issuer(Name::parse(issuer).unwrap());
    cert.set_validity(Validity::for_days(30));
    cert.set_public_key(key.public_key());
    if ca {
        let bc = BasicConstraints {
            is_ca: true,
            max_path_length: None,
        };
        cert.add_extension(Extension::from_extension(&bc, true).unwrap())
            .unwrap();
    }
    cert.sign(signer, Digest::Sha256).unwrap();
    cert
}
