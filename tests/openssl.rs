mod util;

use certforge::cert::extensions::{ExtendedKeyUsage, ExtendedKeyUsageOption, SubjectAltName};
use certforge::cert::{Certificate, DistinguishedName, Extension, Validity};
use certforge::digest::Digest;
use certforge::key::KeyPair;
use certforge::pem::{self, PemObject, legacy::LegacyCipher};
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::X509;
use regex::Regex;
use std::process::Command;
use time::OffsetDateTime;

fn server_cert(key: &KeyPair, ca_key: &KeyPair, digest: Digest) -> Certificate {
    let mut cert = Certificate::new();
    cert.set_serial(1u32);
    cert.set_subject(
        DistinguishedName::builder()
            .common_name("server.myca.local")
            .build()
            .as_name()
            .unwrap(),
    );
    cert.set_issuer(
        DistinguishedName::builder()
            .common_name("myca.local")
            .build()
            .as_name()
            .unwrap(),
    );
    cert.set_validity(Validity {
        not_before: OffsetDateTime::now_utc(),
        not_after: OffsetDateTime::now_utc() + time::Duration::days(365),
    });
    cert.set_public_key(key.public_key());
    cert.add_extension(
        Extension::from_extension(&SubjectAltName::dns(["server.myca.local"]), false).unwrap(),
    )
    .unwrap();
    cert.add_extension(
        Extension::from_extension(
            &ExtendedKeyUsage {
                usage: vec![ExtendedKeyUsageOption::ServerAuth],
            },
            false,
        )
        .unwrap(),
    )
    .unwrap();
    cert.sign(ca_key, digest).unwrap();
    cert
}

#[test]
fn test_openssl_validate_cert() {
    let ca_key = util::rsa_key();
    let server_cert = server_cert(&util::other_rsa_key(), &ca_key, Digest::Sha256);

    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("server_cert.pem");
    std::fs::write(&cert_path, server_cert.to_pem().unwrap())
        .expect("Failed to write server certificate");

    // Use OpenSSL CLI to validate the generated certificate
    let output = Command::new("openssl")
        .arg("x509")
        .arg("-in")
        .arg(&cert_path)
        .arg("-noout")
        .arg("-text")
        .output()
        .expect("Failed to execute OpenSSL command");

    assert!(
        output.status.success(),
        "OpenSSL command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let output_text = String::from_utf8_lossy(&output.stdout);
    assert!(
        output_text.contains("Issuer: CN=myca.local"),
        "Issuer field is incorrect"
    );
    assert!(
        output_text.contains("Subject: CN=server.myca.local"),
        "Subject field is incorrect"
    );
    assert!(
        output_text.contains("Version: 3 (0x2)"),
        "Version field is incorrect"
    );
    assert!(
        output_text.contains("Serial Number: 1 (0x1)"),
        "Serial Number field is incorrect"
    );
    assert!(
        output_text.contains("DNS:server.myca.local"),
        "Subject Alternative Name is incorrect"
    );
    assert!(
        output_text.contains("TLS Web Server Authentication"),
        "Extended Key Usage is incorrect"
    );

    let not_before_regex = Regex::new(r"Not Before: .+").unwrap();
    let not_after_regex = Regex::new(r"Not After : .+").unwrap();
    assert!(
        not_before_regex.is_match(&output_text),
        "Missing or incorrect Not Before field"
    );
    assert!(
        not_after_regex.is_match(&output_text),
        "Missing or incorrect Not After field"
    );
    assert!(
        output_text.contains("Signature Algorithm: sha256WithRSAEncryption"),
        "Signature Algorithm field is incorrect"
    );
}

#[test]
fn test_openssl_crate_validate_cert() {
    let ca_key = util::rsa_key();
    let server_cert = server_cert(&util::other_rsa_key(), &ca_key, Digest::Sha512);
    let server_cert_pem = server_cert.to_pem().unwrap();

    let x509 = X509::from_pem(server_cert_pem.as_bytes()).expect("Failed to parse PEM");

    let subject = x509
        .subject_name()
        .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .as_utf8()
        .unwrap();
    assert_eq!(subject.to_string(), "server.myca.local", "Subject CN mismatch");

    let issuer = x509
        .issuer_name()
        .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .as_utf8()
        .unwrap();
    assert_eq!(issuer.to_string(), "myca.local", "Issuer CN mismatch");

    assert_eq!(x509.version(), 2, "X509 version should be 3 (0-based index)");

    let serial = x509.serial_number().to_bn().unwrap().to_dec_str().unwrap();
    assert_eq!(serial.to_string(), "1", "Serial number should be 1");

    assert_eq!(
        x509.signature_algorithm().object().nid(),
        openssl::nid::Nid::SHA512WITHRSAENCRYPTION,
        "Signature algorithm should be sha512WithRSAEncryption"
    );

    // the signature checks out under the CA key
    let ca_public = pem::encode(&PemObject::PublicKey(ca_key.public_key())).unwrap();
    let ca_pkey = PKey::public_key_from_pem(ca_public.as_bytes()).unwrap();
    assert!(x509.verify(&ca_pkey).unwrap());
}

#[test]
fn test_openssl_reads_dsa_signed_cert() {
    let key = util::dsa_key();
    let mut cert = Certificate::new();
    cert.set_serial(9u32);
    cert.set_subject(
        DistinguishedName::builder()
            .common_name("dsa.myca.local")
            .build()
            .as_name()
            .unwrap(),
    );
    cert.set_validity(Validity::for_days(30));
    cert.set_public_key(key.public_key());
    cert.sign(&key, Digest::Sha256).unwrap();

    let x509 = X509::from_pem(cert.to_pem().unwrap().as_bytes()).unwrap();
    assert_eq!(
        x509.signature_algorithm().object().nid(),
        openssl::nid::Nid::DSA_WITH_SHA256
    );
    let public = pem::encode(&PemObject::PublicKey(key.public_key())).unwrap();
    let pkey = PKey::public_key_from_pem(public.as_bytes()).unwrap();
    assert!(x509.verify(&pkey).unwrap());
}

#[test]
fn test_openssl_crate_reads_encrypted_key() {
    let key = util::rsa_key();
    for cipher in [LegacyCipher::DesEde3Cbc, LegacyCipher::DesCbc] {
        let text =
            pem::encode_encrypted_private_key(&key, cipher, b"hunter2", &mut rand_core::OsRng)
                .unwrap();
        let rsa = Rsa::private_key_from_pem_passphrase(text.as_bytes(), b"hunter2")
            .unwrap_or_else(|e| panic!("OpenSSL rejected {cipher} key: {e}"));
        assert!(rsa.check_key().unwrap());

        let ours = pem::encode(&PemObject::PublicKey(key.public_key())).unwrap();
        let theirs = String::from_utf8(rsa.public_key_to_pem().unwrap()).unwrap();
        assert_eq!(ours, theirs);
    }
}

#[test]
fn test_openssl_cli_decrypts_our_key() {
    let text = pem::encode_encrypted_private_key(
        &util::rsa_key(),
        LegacyCipher::DesEde3Cbc,
        b"hunter2",
        &mut rand_core::OsRng,
    )
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("key.pem");
    std::fs::write(&key_path, &text).unwrap();

    let output = Command::new("openssl")
        .arg("rsa")
        .arg("-in")
        .arg(&key_path)
        .arg("-passin")
        .arg("pass:hunter2")
        .arg("-pubout")
        .output()
        .expect("Failed to execute OpenSSL command");
    assert!(
        output.status.success(),
        "OpenSSL command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let public = pem::read_public_key(&String::from_utf8_lossy(&output.stdout))
        .unwrap()
        .unwrap();
    assert_eq!(public, util::rsa_key().public_key());
}
