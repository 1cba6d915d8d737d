//! The trust-store seam between the handshake bridge and X.509 path
//! validation, with an in-memory default implementation.

use std::fmt;
use std::fs;
use std::path::Path;

use const_oid::ObjectIdentifier;
use const_oid::db::rfc5912::{ID_KP_CLIENT_AUTH, ID_KP_SERVER_AUTH};
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::cert::Certificate;
use crate::cert::extensions::{
    BasicConstraints, ExtendedKeyUsage, ExtendedKeyUsageOption, ToAndFromX509Extension,
};
use crate::error::Result;
use crate::pem;

/// Longest issuer chain the default store will build.
pub const DEFAULT_VERIFY_DEPTH: usize = 32;

/// What the verified certificate is going to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// The certificate identifies a TLS client.
    SslClient,
    /// The certificate identifies a TLS server.
    SslServer,
}

impl Purpose {
    /// The Extended Key Usage a leaf needs for this purpose.
    pub fn key_usage(self) -> ObjectIdentifier {
        match self {
            Purpose::SslClient => ID_KP_CLIENT_AUTH,
            Purpose::SslServer => ID_KP_SERVER_AUTH,
        }
    }
}

/// A source of trust anchors that can validate a peer chain.
pub trait CertStore: Send + Sync + fmt::Debug {
    /// Starts a validation of `leaf`, with `chain` as the untrusted certificates
    /// the peer sent (which may include the leaf itself).
    fn init<'a>(
        &'a self,
        leaf: &'a Certificate,
        chain: &'a [Certificate],
    ) -> Result<Box<dyn StoreContext + 'a>>;
}

/// One in-progress validation.
pub trait StoreContext {
    fn set_purpose(&mut self, purpose: Purpose);

    /// Bounds the number of issuers above the leaf. Stores without a bound
    /// may ignore it.
    fn set_depth(&mut self, _depth: usize) {}

    /// Adds anchors from a PEM file and/or a directory of PEM files for this
    /// validation only.
    fn load_verify_locations(&mut self, ca_file: Option<&Path>, ca_path: Option<&Path>)
    -> Result<()>;

    /// Runs the validation. `Ok(false)` means no trusted path was found.
    fn verify_certificate(&mut self) -> Result<bool>;
}

/// Every certificate in a PEM file.
pub fn load_file(path: &Path) -> Result<Vec<Certificate>> {
    let text = fs::read_to_string(path)?;
    pem::read_certificates(&text)
}

/// Every certificate in the readable PEM files directly inside `dir`.
///
/// Files that are not UTF-8 text or hold a malformed block are skipped.
pub fn load_dir(dir: &Path) -> Result<Vec<Certificate>> {
    let mut certs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match fs::read_to_string(&path)
            .map_err(Into::into)
            .and_then(|text| pem::read_certificates(&text))
        {
            Ok(found) => certs.extend(found),
            Err(e) => trace!(path = %path.display(), error = %e, "skipping CA file"),
        }
    }
    Ok(certs)
}

/// An in-memory set of trust anchors.
#[derive(Debug, Clone)]
pub struct X509Store {
    anchors: Vec<Certificate>,
    depth: usize,
}

impl Default for X509Store {
    fn default() -> Self {
        Self::new()
    }
}

impl X509Store {
    /// An empty store; nothing verifies against it until anchors are added.
    pub fn new() -> Self {
        Self {
            anchors: Vec::new(),
            depth: DEFAULT_VERIFY_DEPTH,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn anchors(&self) -> &[Certificate] {
        &self.anchors
    }

    pub fn add_certificate(&mut self, cert: Certificate) {
        self.anchors.push(cert);
    }

    /// Adds every certificate of a PEM file, returning how many were added.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let certs = load_file(path.as_ref())?;
        let added = certs.len();
        self.anchors.extend(certs);
        Ok(added)
    }

    /// Adds every certificate found in the PEM files of a directory.
    pub fn add_path(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let certs = load_dir(dir.as_ref())?;
        let added = certs.len();
        self.anchors.extend(certs);
        Ok(added)
    }
}

impl CertStore for X509Store {
    fn init<'a>(
        &'a self,
        leaf: &'a Certificate,
        chain: &'a [Certificate],
    ) -> Result<Box<dyn StoreContext + 'a>> {
        Ok(Box::new(X509StoreContext {
            store: self,
            leaf,
            chain,
            purpose: None,
            depth: self.depth,
            local_anchors: Vec::new(),
        }))
    }
}

struct X509StoreContext<'a> {
    store: &'a X509Store,
    leaf: &'a Certificate,
    chain: &'a [Certificate],
    purpose: Option<Purpose>,
    depth: usize,
    local_anchors: Vec<Certificate>,
}

fn issued_by(child: &Certificate, issuer: &Certificate) -> bool {
    child.issuer().matches(issuer.subject())
        && issuer
            .public_key()
            .is_some_and(|key| child.verify(key).unwrap_or(false))
}

/// Whether `issuer` may sign with `below` intermediates already under it.
///
/// Only a certificate marked as a CA by Basic Constraints can issue, and its
/// path length bound counts the intermediates between it and the leaf.
fn may_issue(issuer: &Certificate, below: usize) -> bool {
    let Some(extension) = issuer.extension(BasicConstraints::OID) else {
        return false;
    };
    match extension.to_extension::<BasicConstraints>() {
        Ok(bc) => {
            bc.is_ca
                && bc
                    .max_path_length
                    .is_none_or(|max| below <= usize::from(max))
        }
        Err(e) => {
            debug!(subject = %issuer.subject(), error = %e, "malformed basic constraints");
            false
        }
    }
}

fn valid_at(cert: &Certificate, now: OffsetDateTime) -> bool {
    cert.validity().is_some_and(|v| v.contains(now))
}

fn allows_purpose(cert: &Certificate, purpose: Purpose) -> Result<bool> {
    let Some(extension) = cert.extension(ExtendedKeyUsage::OID) else {
        return Ok(true);
    };
    let eku: ExtendedKeyUsage = extension.to_extension()?;
    Ok(eku.allows(ExtendedKeyUsageOption::from(purpose.key_usage()))
        || eku.allows(ExtendedKeyUsageOption::Any))
}

impl X509StoreContext<'_> {
    fn anchors(&self) -> impl Iterator<Item = &Certificate> {
        let purpose = self.purpose;
        self.store
            .anchors
            .iter()
            .chain(self.local_anchors.iter())
            .filter(move |anchor| match (purpose, anchor.aux()) {
                (Some(purpose), Some(aux)) => !aux.is_rejected_for(purpose.key_usage()),
                _ => true,
            })
    }
}

impl StoreContext for X509StoreContext<'_> {
    fn set_purpose(&mut self, purpose: Purpose) {
        self.purpose = Some(purpose);
    }

    fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
    }

    fn load_verify_locations(
        &mut self,
        ca_file: Option<&Path>,
        ca_path: Option<&Path>,
    ) -> Result<()> {
        if let Some(file) = ca_file {
            self.local_anchors.extend(load_file(file)?);
        }
        if let Some(dir) = ca_path {
            self.local_anchors.extend(load_dir(dir)?);
        }
        Ok(())
    }

    fn verify_certificate(&mut self) -> Result<bool> {
        if let Some(purpose) = self.purpose {
            if !allows_purpose(self.leaf, purpose)? {
                debug!(subject = %self.leaf.subject(), ?purpose, "leaf not valid for purpose");
                return Ok(false);
            }
        }

        let now = OffsetDateTime::now_utc();
        let mut current = self.leaf;
        for below in 0..=self.depth {
            if !valid_at(current, now) {
                debug!(subject = %current.subject(), "certificate outside its validity period");
                return Ok(false);
            }
            if self.anchors().any(|anchor| anchor == current) {
                return Ok(true);
            }
            if let Some(anchor) = self
                .anchors()
                .find(|anchor| issued_by(current, anchor) && may_issue(anchor, below))
            {
                return Ok(valid_at(anchor, now));
            }
            match self.chain.iter().find(|cert| {
                *cert != current && issued_by(current, cert) && may_issue(cert, below)
            }) {
                Some(issuer) => current = issuer,
                None => {
                    debug!(issuer = %current.issuer(), "unable to find issuer certificate");
                    return Ok(false);
                }
            }
        }
        debug!(depth = self.depth, "certificate chain too long");
        Ok(false)
    }
}
