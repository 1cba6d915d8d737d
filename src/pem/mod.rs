//! PEM armor codec compatible with OpenSSL's `PEM_read_bio_*` / `PEM_write_bio_*`.
//!
//! Besides the plain envelope this reads and writes the legacy
//! `Proc-Type: 4,ENCRYPTED` / `DEK-Info` header block OpenSSL uses for
//! password-protected traditional private keys; see [`legacy`].

pub mod legacy;

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use const_oid::ObjectIdentifier;
use der::asn1::Uint;
use der::{Any, Decode, Encode, Reader, Sequence, SliceReader};
use rand_core::CryptoRngCore;
use rsa::BigUint;
use tracing::{debug, trace};
use x509_cert::crl::CertificateList;
use x509_cert::request::CertReq;
use zeroize::Zeroizing;

use crate::cert::{AuxiliaryTrust, Certificate};
use crate::error::{CertForgeError, Result};
use crate::key::{KeyAlgorithm, KeyPair, PublicKey};
use legacy::LegacyCipher;

/// Body lines are wrapped at this many characters.
pub const LINE_WIDTH: usize = 64;

/// The PEM labels this codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    PublicKey,
    RsaPublicKey,
    RsaPrivateKey,
    DsaPrivateKey,
    /// The pre-RFC 7468 `X509 CERTIFICATE` spelling.
    X509Certificate,
    Certificate,
    TrustedCertificate,
    Crl,
    CertificateRequest,
    Pkcs7,
    DhParameters,
}

impl Label {
    pub const ALL: [Label; 11] = [
        Label::PublicKey,
        Label::RsaPublicKey,
        Label::RsaPrivateKey,
        Label::DsaPrivateKey,
        Label::X509Certificate,
        Label::Certificate,
        Label::TrustedCertificate,
        Label::Crl,
        Label::CertificateRequest,
        Label::Pkcs7,
        Label::DhParameters,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Label::PublicKey => "PUBLIC KEY",
            Label::RsaPublicKey => "RSA PUBLIC KEY",
            Label::RsaPrivateKey => "RSA PRIVATE KEY",
            Label::DsaPrivateKey => "DSA PRIVATE KEY",
            Label::X509Certificate => "X509 CERTIFICATE",
            Label::Certificate => "CERTIFICATE",
            Label::TrustedCertificate => "TRUSTED CERTIFICATE",
            Label::Crl => "X509 CRL",
            Label::CertificateRequest => "CERTIFICATE REQUEST",
            Label::Pkcs7 => "PKCS7",
            Label::DhParameters => "DH PARAMETERS",
        }
    }

    /// Exact match on the text between `-----BEGIN ` and `-----`.
    pub fn from_marker(text: &str) -> Option<Label> {
        Label::ALL.into_iter().find(|label| label.as_str() == text)
    }

    fn is_private_key(self) -> bool {
        matches!(self, Label::RsaPrivateKey | Label::DsaPrivateKey)
    }

    fn is_certificate(self) -> bool {
        matches!(
            self,
            Label::X509Certificate | Label::Certificate | Label::TrustedCertificate
        )
    }

    fn for_private_key(key: &KeyPair) -> Label {
        match key.algorithm() {
            KeyAlgorithm::Rsa => Label::RsaPrivateKey,
            KeyAlgorithm::Dsa => Label::DsaPrivateKey,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diffie-Hellman domain parameters (`DHparams`, PKCS#3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DhParameters {
    pub p: BigUint,
    pub g: BigUint,
    pub private_value_length: Option<u64>,
}

#[derive(Sequence)]
struct DhParamsDocument {
    p: Uint,
    g: Uint,
    #[asn1(optional = "true")]
    private_value_length: Option<u64>,
}

impl DhParameters {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let doc = DhParamsDocument::from_der(der)?;
        Ok(Self {
            p: BigUint::from_bytes_be(doc.p.as_bytes()),
            g: BigUint::from_bytes_be(doc.g.as_bytes()),
            private_value_length: doc.private_value_length,
        })
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        let doc = DhParamsDocument {
            p: Uint::new(&self.p.to_bytes_be())?,
            g: Uint::new(&self.g.to_bytes_be())?,
            private_value_length: self.private_value_length,
        };
        doc.to_der()
            .map_err(|e| CertForgeError::EncodingError(e.to_string()))
    }
}

#[derive(Sequence)]
struct ContentInfo {
    content_type: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    content: Option<Any>,
}

/// A PKCS#7 / CMS `ContentInfo`, kept as its DER encoding.
///
/// Only the outer structure is checked; the signed-data internals are not
/// interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pkcs7 {
    content_type: ObjectIdentifier,
    der: Vec<u8>,
}

impl Pkcs7 {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let info = ContentInfo::from_der(der)?;
        Ok(Self {
            content_type: info.content_type,
            der: der.to_vec(),
        })
    }

    pub fn content_type(&self) -> ObjectIdentifier {
        self.content_type
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }
}

/// Anything a PEM block can decode to.
#[derive(Clone, Debug)]
pub enum PemObject {
    PublicKey(PublicKey),
    PrivateKey(KeyPair),
    Certificate(Certificate),
    /// A certificate read from, or to be written as, `TRUSTED CERTIFICATE`.
    TrustedCertificate(Certificate),
    Crl(CertificateList),
    CertificateRequest(CertReq),
    Pkcs7(Pkcs7),
    DhParameters(DhParameters),
}

struct Encryption {
    cipher: LegacyCipher,
    iv: Vec<u8>,
}

/// One armored block with its body already Base64-decoded.
struct Block {
    label: Label,
    encryption: Option<Encryption>,
    body: Vec<u8>,
}

/// Returns the label text of a `-----BEGIN <label>-----` line.
fn begin_label(line: &str) -> Option<&str> {
    let start = line.find("-----BEGIN ")?;
    line[start + "-----BEGIN ".len()..]
        .trim_end()
        .strip_suffix("-----")
}

fn parse_dek_info(value: &str) -> Result<Encryption> {
    let (cipher, iv) = value.split_once(',').ok_or_else(|| {
        CertForgeError::FormatError(format!("malformed DEK-Info header: {value}"))
    })?;
    let cipher: LegacyCipher = cipher.parse()?;
    let iv = hex::decode(iv.trim())
        .map_err(|e| CertForgeError::FormatError(format!("malformed DEK-Info IV: {e}")))?;
    if iv.len() < cipher.iv_len() {
        return Err(CertForgeError::FormatError(format!(
            "DEK-Info IV too short for {cipher}"
        )));
    }
    Ok(Encryption { cipher, iv })
}

fn decode_base64(body: &str) -> Result<Vec<u8>> {
    if body.len() % 4 != 0 {
        return Err(CertForgeError::FormatError(
            "base64 data appears to be truncated".to_string(),
        ));
    }
    STANDARD
        .decode(body)
        .map_err(|e| CertForgeError::FormatError(format!("invalid base64 data: {e}")))
}

/// Reads header lines and body up to the END marker of `label`.
fn read_block<'a>(lines: &mut impl Iterator<Item = &'a str>, label: Label) -> Result<Block> {
    let end_marker = format!("-----END {label}");
    let mut encrypted = false;
    let mut dek_info = None;
    let mut in_headers = true;
    let mut body = String::new();

    for line in lines {
        let line = line.trim();
        if line.starts_with(&end_marker) {
            let encryption = match (encrypted, dek_info) {
                (false, _) => None,
                (true, Some(encryption)) => Some(encryption),
                (true, None) => {
                    return Err(CertForgeError::FormatError(
                        "encrypted PEM block without DEK-Info header".to_string(),
                    ));
                }
            };
            if encryption.is_some() && !label.is_private_key() {
                return Err(CertForgeError::FormatError(format!(
                    "encrypted {label} blocks are not supported"
                )));
            }
            return Ok(Block {
                label,
                encryption,
                body: decode_base64(&body)?,
            });
        }
        if line.is_empty() {
            continue;
        }
        if in_headers {
            // base64 never contains ':'
            if let Some((name, value)) = line.split_once(':') {
                match name.trim() {
                    "Proc-Type" => {
                        if value.trim() != "4,ENCRYPTED" {
                            return Err(CertForgeError::FormatError(format!(
                                "unsupported Proc-Type: {}",
                                value.trim()
                            )));
                        }
                        encrypted = true;
                    }
                    "DEK-Info" => dek_info = Some(parse_dek_info(value.trim())?),
                    other => trace!(header = other, "ignoring PEM header"),
                }
                continue;
            }
            in_headers = false;
        }
        body.push_str(line);
    }

    Err(CertForgeError::FormatError(format!("{end_marker} not found")))
}

/// Iterates over the recognized blocks of a PEM document.
struct Blocks<'a> {
    lines: std::str::Lines<'a>,
}

impl<'a> Blocks<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
        }
    }
}

impl Iterator for Blocks<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            let Some(marker) = begin_label(line) else {
                continue;
            };
            match Label::from_marker(marker) {
                Some(label) => return Some(read_block(&mut self.lines, label)),
                None => trace!(label = marker, "skipping unrecognized PEM block"),
            }
        }
    }
}

fn decode_certificate(der: &[u8]) -> Result<Certificate> {
    let mut reader = SliceReader::new(der)?;
    let x509 = x509_cert::Certificate::decode(&mut reader)?;
    let consumed = usize::try_from(reader.position())?;
    let mut cert = Certificate::from_x509(x509)?;
    let trailing = &der[consumed..];
    if !trailing.is_empty() {
        cert.set_aux(Some(AuxiliaryTrust::from_der(trailing)?));
    }
    Ok(cert)
}

fn decode_private_key(block: &Block, password: Option<&[u8]>) -> Result<KeyPair> {
    let der = match &block.encryption {
        None => Zeroizing::new(block.body.clone()),
        Some(encryption) => {
            let password = password.ok_or_else(|| {
                CertForgeError::CryptoError(
                    "password required for encrypted private key".to_string(),
                )
            })?;
            Zeroizing::new(legacy::decrypt(
                &block.body,
                password,
                &encryption.iv[..encryption.cipher.iv_len()],
                encryption.cipher,
            )?)
        }
    };
    match block.label {
        Label::DsaPrivateKey => KeyPair::import_dsa_der(&der),
        _ => KeyPair::import_rsa_der(&der),
    }
}

fn decode_block(block: &Block, password: Option<&[u8]>) -> Result<PemObject> {
    let der = block.body.as_slice();
    let object = match block.label {
        Label::PublicKey => PemObject::PublicKey(PublicKey::from_spki_der(der)?),
        Label::RsaPublicKey => PemObject::PublicKey(PublicKey::from_pkcs1_der(der)?),
        Label::RsaPrivateKey | Label::DsaPrivateKey => {
            PemObject::PrivateKey(decode_private_key(block, password)?)
        }
        Label::X509Certificate | Label::Certificate => {
            PemObject::Certificate(decode_certificate(der)?)
        }
        Label::TrustedCertificate => PemObject::TrustedCertificate(decode_certificate(der)?),
        Label::Crl => PemObject::Crl(CertificateList::from_der(der)?),
        Label::CertificateRequest => PemObject::CertificateRequest(CertReq::from_der(der)?),
        Label::Pkcs7 => PemObject::Pkcs7(Pkcs7::from_der(der)?),
        Label::DhParameters => PemObject::DhParameters(DhParameters::from_der(der)?),
    };
    debug!(label = %block.label, "decoded PEM block");
    Ok(object)
}

/// Decodes the first recognized block of `text`.
///
/// Text around blocks and blocks with unknown labels are skipped; `Ok(None)`
/// means nothing recognizable was found. `password` is only consulted for
/// encrypted private keys.
pub fn parse(text: &str, password: Option<&[u8]>) -> Result<Option<PemObject>> {
    Blocks::new(text)
        .next()
        .map(|block| decode_block(&block?, password))
        .transpose()
}

/// Decodes every recognized block of `text`, in order.
pub fn parse_all(text: &str, password: Option<&[u8]>) -> Result<Vec<PemObject>> {
    Blocks::new(text)
        .map(|block| decode_block(&block?, password))
        .collect()
}

/// The first certificate in `text`, under any certificate label.
pub fn read_certificate(text: &str) -> Result<Option<Certificate>> {
    Ok(read_certificates_inner(text, true)?.into_iter().next())
}

/// Every certificate in `text`, under any certificate label.
pub fn read_certificates(text: &str) -> Result<Vec<Certificate>> {
    read_certificates_inner(text, false)
}

fn read_certificates_inner(text: &str, first_only: bool) -> Result<Vec<Certificate>> {
    let mut certs = Vec::new();
    for block in Blocks::new(text) {
        let block = block?;
        if block.label.is_certificate() {
            certs.push(decode_certificate(&block.body)?);
            if first_only {
                break;
            }
        }
    }
    Ok(certs)
}

/// The first RSA or DSA private key in `text`.
pub fn read_private_key(text: &str, password: Option<&[u8]>) -> Result<Option<KeyPair>> {
    for block in Blocks::new(text) {
        let block = block?;
        if block.label.is_private_key() {
            return decode_private_key(&block, password).map(Some);
        }
    }
    Ok(None)
}

/// The first public key in `text`, SPKI or PKCS#1.
pub fn read_public_key(text: &str) -> Result<Option<PublicKey>> {
    for block in Blocks::new(text) {
        let block = block?;
        match block.label {
            Label::PublicKey => return PublicKey::from_spki_der(&block.body).map(Some),
            Label::RsaPublicKey => return PublicKey::from_pkcs1_der(&block.body).map(Some),
            _ => {}
        }
    }
    Ok(None)
}

/// Armors `der` under `label`, writing `headers` as `Name: value` lines
/// followed by a blank line.
pub fn encode_block(label: Label, headers: &[(&str, &str)], der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut out = String::with_capacity(body.len() + body.len() / LINE_WIDTH + 64);
    out.push_str("-----BEGIN ");
    out.push_str(label.as_str());
    out.push_str("-----\n");
    if !headers.is_empty() {
        for (name, value) in headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
    }
    // base64 output is ASCII, so byte chunks are char boundaries
    for chunk in body.as_bytes().chunks(LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str("-----END ");
    out.push_str(label.as_str());
    out.push_str("-----\n");
    out
}

/// Encodes `object` in its canonical PEM form.
///
/// Private keys are written unencrypted in the traditional format; use
/// [`encode_encrypted_private_key`] for the password-protected form.
pub fn encode(object: &PemObject) -> Result<String> {
    let encoding_error = |e: der::Error| CertForgeError::EncodingError(e.to_string());
    let (label, der) = match object {
        PemObject::PublicKey(key) => (Label::PublicKey, key.to_spki_der()?),
        PemObject::PrivateKey(key) => (Label::for_private_key(key), key.to_traditional_der()?),
        PemObject::Certificate(cert) => (Label::Certificate, cert.to_der()?),
        PemObject::TrustedCertificate(cert) => {
            let mut der = cert.to_der()?;
            if let Some(aux) = cert.aux() {
                der.extend(aux.to_der()?);
            }
            (Label::TrustedCertificate, der)
        }
        PemObject::Crl(crl) => (Label::Crl, crl.to_der().map_err(encoding_error)?),
        PemObject::CertificateRequest(req) => (
            Label::CertificateRequest,
            req.to_der().map_err(encoding_error)?,
        ),
        PemObject::Pkcs7(pkcs7) => (Label::Pkcs7, pkcs7.as_der().to_vec()),
        PemObject::DhParameters(params) => (Label::DhParameters, params.to_der()?),
    };
    Ok(encode_block(label, &[], &der))
}

/// Encodes an RSA public key under `RSA PUBLIC KEY` (PKCS#1).
pub fn encode_rsa_public_key(key: &PublicKey) -> Result<String> {
    Ok(encode_block(Label::RsaPublicKey, &[], &key.to_pkcs1_der()?))
}

/// Encodes `key` in the traditional format, encrypted under `password` with a
/// fresh salt drawn from `rng`.
pub fn encode_encrypted_private_key(
    key: &KeyPair,
    cipher: LegacyCipher,
    password: &[u8],
    rng: &mut impl CryptoRngCore,
) -> Result<String> {
    let der = Zeroizing::new(key.to_traditional_der()?);
    let (ciphertext, salt) = legacy::encrypt(&der, password, cipher, rng)?;
    let dek_info = format!("{},{}", cipher.name(), hex::encode_upper(salt));
    Ok(encode_block(
        Label::for_private_key(key),
        &[("Proc-Type", "4,ENCRYPTED"), ("DEK-Info", &dek_info)],
        &ciphertext,
    ))
}
