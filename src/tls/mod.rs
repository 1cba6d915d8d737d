//! The TLS trust bridge.
//!
//! A [`TrustContext`] holds the local identity and the peer verification
//! policy. During a handshake the TLS engine asks it which key type to use,
//! for the certificate chain and private key to present, and hands the peer's
//! raw DER chain to a [`PeerVerifier`], which runs it through a
//! [`store::CertStore`].

pub mod store;

#[cfg(feature = "rustls")]
pub mod rustls_adapter;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bon::Builder;
use der::flagset::{FlagSet, flags};
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::cert::Certificate;
use crate::error::{CertForgeError, Result};
use crate::key::{KeyAlgorithm, KeyPair};
use store::{CertStore, Purpose, X509Store};

flags! {
    /// OpenSSL `SSL_VERIFY_*` bits.
    pub enum VerifyFlag: u8 {
        Peer = 0x01,
        FailIfNoPeerCert = 0x02,
        ClientOnce = 0x04,
    }
}

pub type VerifyMode = FlagSet<VerifyFlag>;

/// Builds a verify mode from raw OpenSSL bits, dropping unknown ones.
pub fn verify_mode_from_bits(bits: u8) -> VerifyMode {
    VerifyMode::new_truncated(bits)
}

/// A certificate with its private key, plus any intermediates to send
/// after it.
#[derive(Clone, Debug)]
pub struct Identity {
    pub certificate: Certificate,
    pub key: KeyPair,
    pub intermediates: Vec<Certificate>,
}

impl Identity {
    /// Pairs `certificate` with `key`, failing when the key does not belong to
    /// the certificate.
    pub fn new(certificate: Certificate, key: KeyPair) -> Result<Self> {
        if !certificate.check_private_key(&key) {
            return Err(CertForgeError::InvalidInput(
                "private key does not match the certificate public key".to_string(),
            ));
        }
        Ok(Self {
            certificate,
            key,
            intermediates: Vec::new(),
        })
    }

    pub fn with_intermediates(mut self, intermediates: Vec<Certificate>) -> Self {
        self.intermediates = intermediates;
        self
    }

    /// The leaf followed by the intermediates.
    pub fn chain(&self) -> Vec<Certificate> {
        std::iter::once(&self.certificate)
            .chain(&self.intermediates)
            .cloned()
            .collect()
    }
}

/// Produces the local identity on first use.
pub type CertificateChooser = Arc<dyn Fn() -> Result<Identity> + Send + Sync>;

/// Which side of the handshake this context serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// The purpose the peer's certificate is checked for.
    pub fn peer_purpose(self) -> Purpose {
        match self {
            Role::Client => Purpose::SslServer,
            Role::Server => Purpose::SslClient,
        }
    }
}

/// Trust configuration shared by every handshake of an endpoint.
///
/// ```rust,no_run
/// use certforge::tls::{Role, TrustContext, VerifyFlag};
///
/// # fn main() -> certforge::error::Result<()> {
/// let ctx = TrustContext::builder()
///     .verify_mode(VerifyFlag::Peer | VerifyFlag::FailIfNoPeerCert)
///     .ca_file("/etc/ssl/certs/ca-certificates.crt")
///     .build();
/// let mut verifier = ctx.peer_verifier(Role::Client);
/// # let chain: Vec<Vec<u8>> = Vec::new();
/// verifier.check_peer_chain(&chain)?;
/// # Ok(())
/// # }
/// ```
#[derive(Builder)]
pub struct TrustContext {
    /// Used as is; takes precedence over the chooser.
    #[builder(into)]
    identity: Option<Arc<Identity>>,

    /// Runs at most once per context, on the first identity lookup.
    certificate_chooser: Option<CertificateChooser>,

    #[builder(skip)]
    chosen: OnceCell<Option<Arc<Identity>>>,

    /// Without a mode every peer chain is accepted.
    #[builder(into)]
    verify_mode: Option<VerifyMode>,

    /// Defaults to an empty [`X509Store`].
    cert_store: Option<Arc<dyn CertStore>>,

    #[builder(into)]
    ca_file: Option<PathBuf>,

    #[builder(into)]
    ca_path: Option<PathBuf>,

    verify_depth: Option<usize>,
}

impl fmt::Debug for TrustContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustContext")
            .field("identity", &self.identity)
            .field("has_certificate_chooser", &self.certificate_chooser.is_some())
            .field("verify_mode", &self.verify_mode)
            .field("cert_store", &self.cert_store)
            .field("ca_file", &self.ca_file)
            .field("ca_path", &self.ca_path)
            .field("verify_depth", &self.verify_depth)
            .finish()
    }
}

impl TrustContext {
    pub fn verify_mode(&self) -> Option<VerifyMode> {
        self.verify_mode
    }

    /// The identity to present: the explicit one, or the chooser's result.
    ///
    /// The chooser runs once even under concurrent calls; a failure is logged
    /// and remembered as "no identity".
    pub fn identity(&self) -> Option<Arc<Identity>> {
        if let Some(identity) = &self.identity {
            return Some(Arc::clone(identity));
        }
        self.chosen
            .get_or_init(|| {
                let chooser = self.certificate_chooser.as_ref()?;
                match chooser() {
                    Ok(identity) => {
                        debug!(subject = %identity.certificate.subject(), "certificate chooser selected identity");
                        Some(Arc::new(identity))
                    }
                    Err(e) => {
                        warn!(error = %e, "certificate chooser failed");
                        None
                    }
                }
            })
            .clone()
    }

    fn identity_algorithm(&self) -> Option<KeyAlgorithm> {
        self.identity().map(|identity| identity.key.algorithm())
    }

    /// The first of `key_types` matching the identity's key algorithm.
    pub fn choose_client_key_type(&self, key_types: &[&str]) -> Option<KeyAlgorithm> {
        let algorithm = self.identity_algorithm()?;
        key_types
            .iter()
            .any(|offered| offered.eq_ignore_ascii_case(algorithm.name()))
            .then_some(algorithm)
    }

    /// `key_type` when it matches the identity's key algorithm.
    pub fn choose_server_key_type(&self, key_type: &str) -> Option<KeyAlgorithm> {
        let algorithm = self.identity_algorithm()?;
        key_type
            .eq_ignore_ascii_case(algorithm.name())
            .then_some(algorithm)
    }

    /// The identity's leaf and intermediates.
    pub fn certificate_chain(&self) -> Option<Vec<Certificate>> {
        self.identity().map(|identity| identity.chain())
    }

    pub fn private_key(&self) -> Option<KeyPair> {
        self.identity().map(|identity| identity.key.clone())
    }

    /// Starts the peer check of one handshake.
    pub fn peer_verifier(&self, role: Role) -> PeerVerifier<'_> {
        PeerVerifier {
            context: self,
            role,
            state: HandshakeState::AwaitingPeerChain,
            peer: None,
        }
    }
}

/// Where a [`PeerVerifier`] stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingPeerChain,
    Verified,
    Rejected,
}

fn verify_failed() -> CertForgeError {
    CertForgeError::TrustError("certificate verify failed".to_string())
}

/// Per-handshake peer chain check.
#[derive(Debug)]
pub struct PeerVerifier<'a> {
    context: &'a TrustContext,
    role: Role,
    state: HandshakeState,
    peer: Option<Certificate>,
}

impl PeerVerifier<'_> {
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The peer's leaf, recorded by [`PeerVerifier::check_peer_chain`] whether
    /// or not the chain was accepted.
    pub fn peer_certificate(&self) -> Option<&Certificate> {
        self.peer.as_ref()
    }

    pub fn into_peer_certificate(self) -> Option<Certificate> {
        self.peer
    }

    /// Applies the context's verify policy to the peer's DER chain, leaf first.
    pub fn check_peer_chain<C: AsRef<[u8]>>(&mut self, chain: &[C]) -> Result<()> {
        let outcome = self.evaluate(chain);
        self.state = match outcome {
            Ok(()) => HandshakeState::Verified,
            Err(_) => HandshakeState::Rejected,
        };
        outcome
    }

    fn evaluate<C: AsRef<[u8]>>(&mut self, chain: &[C]) -> Result<()> {
        let certs = chain
            .iter()
            .map(|der| Certificate::from_der(der.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| {
                debug!(error = %e, "unparsable peer chain");
                verify_failed()
            })?;
        self.peer = certs.first().cloned();

        let context = self.context;
        let Some(mode) = context.verify_mode else {
            debug!("no verify mode set, accepting peer");
            return Ok(());
        };
        let Some(leaf) = certs.first() else {
            if mode.contains(VerifyFlag::FailIfNoPeerCert) {
                return Err(CertForgeError::TrustError(
                    "no peer certificate".to_string(),
                ));
            }
            return Ok(());
        };
        if !mode.contains(VerifyFlag::Peer) {
            return Ok(());
        }

        let default_store;
        let store: &dyn CertStore = match &context.cert_store {
            Some(store) => store.as_ref(),
            None => {
                default_store = X509Store::new();
                &default_store
            }
        };
        let mut store_ctx = store.init(leaf, &certs).map_err(|e| {
            warn!(error = %e, "couldn't initialize store");
            CertForgeError::TrustError("couldn't initialize store".to_string())
        })?;
        store_ctx.set_purpose(self.role.peer_purpose());
        if let Some(depth) = context.verify_depth {
            store_ctx.set_depth(depth);
        }
        if context.ca_file.is_some() || context.ca_path.is_some() {
            if let Err(e) = store_ctx
                .load_verify_locations(context.ca_file.as_deref(), context.ca_path.as_deref())
            {
                warn!(error = %e, "can't set verify locations");
            }
        }

        match store_ctx.verify_certificate() {
            Ok(true) => {
                debug!(subject = %leaf.subject(), role = ?self.role, "peer chain verified");
                Ok(())
            }
            Ok(false) => Err(verify_failed()),
            Err(e) => {
                debug!(error = %e, "peer chain verification errored");
                Err(verify_failed())
            }
        }
    }
}
