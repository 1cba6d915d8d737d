//! Wires a [`TrustContext`] into rustls.
//!
//! The verifiers hand the peer chain to the bridge instead of webpki, and the
//! resolvers serve the context's identity. TLS handshake signatures are still
//! checked with the ring provider's algorithms.

use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::OnceCell;
use rustls::client::ResolvesClientCert;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{
    CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, DistinguishedName,
    OtherError, ServerConfig, ServerConnection, SignatureScheme,
};
use tracing::{debug, warn};

use super::{Identity, Role, TrustContext, VerifyFlag};
use crate::cert::Certificate;
use crate::error::{CertForgeError, Result};
use crate::key::KeyAlgorithm;

/// Receives the peer's leaf certificate, even when the handshake fails.
///
/// A slot is tied to the config it was built with.
pub type PeerSlot = Arc<Mutex<Option<Certificate>>>;

fn to_rustls_error(err: CertForgeError) -> rustls::Error {
    rustls::Error::InvalidCertificate(CertificateError::Other(OtherError(Arc::new(err))))
}

fn store_peer(slot: &PeerSlot, peer: Option<Certificate>) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = peer;
}

/// Runs the bridge on a rustls chain and records the leaf in `slot`.
fn check_chain(
    context: &TrustContext,
    role: Role,
    slot: &PeerSlot,
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
) -> std::result::Result<(), rustls::Error> {
    let chain: Vec<&[u8]> = std::iter::once(end_entity.as_ref())
        .chain(intermediates.iter().map(|c| c.as_ref()))
        .collect();
    let mut verifier = context.peer_verifier(role);
    let outcome = verifier.check_peer_chain(&chain);
    store_peer(slot, verifier.into_peer_certificate());
    outcome.map_err(to_rustls_error)
}

fn rsa_scheme(scheme: SignatureScheme) -> bool {
    matches!(
        scheme,
        SignatureScheme::RSA_PKCS1_SHA1
            | SignatureScheme::RSA_PKCS1_SHA256
            | SignatureScheme::RSA_PKCS1_SHA384
            | SignatureScheme::RSA_PKCS1_SHA512
            | SignatureScheme::RSA_PSS_SHA256
            | SignatureScheme::RSA_PSS_SHA384
            | SignatureScheme::RSA_PSS_SHA512
    )
}

#[derive(Debug)]
struct BridgeServerVerifier {
    context: Arc<TrustContext>,
    provider: Arc<CryptoProvider>,
    peer: PeerSlot,
}

impl ServerCertVerifier for BridgeServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        check_chain(&self.context, Role::Client, &self.peer, end_entity, intermediates)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(Debug)]
struct BridgeClientVerifier {
    context: Arc<TrustContext>,
    provider: Arc<CryptoProvider>,
    peer: PeerSlot,
}

impl ClientCertVerifier for BridgeClientVerifier {
    fn offer_client_auth(&self) -> bool {
        self.context
            .verify_mode()
            .is_some_and(|mode| mode.contains(VerifyFlag::Peer))
    }

    fn client_auth_mandatory(&self) -> bool {
        self.context
            .verify_mode()
            .is_some_and(|mode| mode.contains(VerifyFlag::FailIfNoPeerCert))
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        check_chain(&self.context, Role::Server, &self.peer, end_entity, intermediates)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Serves the context identity, converted once to a rustls `CertifiedKey`.
#[derive(Debug)]
struct BridgeCertResolver {
    context: Arc<TrustContext>,
    certified: OnceCell<Option<Arc<CertifiedKey>>>,
}

fn certify(identity: &Identity) -> Result<CertifiedKey> {
    if identity.key.algorithm() != KeyAlgorithm::Rsa {
        return Err(CertForgeError::InvalidInput(format!(
            "{} identities cannot be used with rustls",
            identity.key.algorithm()
        )));
    }
    let key_der = PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(
        identity.key.to_traditional_der()?,
    ));
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key_der)
        .map_err(|e| CertForgeError::CryptoError(e.to_string()))?;
    let chain = identity
        .chain()
        .iter()
        .map(|cert| cert.to_der().map(CertificateDer::from))
        .collect::<Result<Vec<_>>>()?;
    Ok(CertifiedKey::new(chain, signing_key))
}

impl BridgeCertResolver {
    fn new(context: Arc<TrustContext>) -> Self {
        Self {
            context,
            certified: OnceCell::new(),
        }
    }

    fn certified_key(&self) -> Option<Arc<CertifiedKey>> {
        self.certified
            .get_or_init(|| {
                let identity = self.context.identity()?;
                match certify(&identity) {
                    Ok(key) => Some(Arc::new(key)),
                    Err(e) => {
                        warn!(error = %e, "identity cannot be served over rustls");
                        None
                    }
                }
            })
            .clone()
    }
}

impl ResolvesClientCert for BridgeCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        let offered: Vec<&str> = if sigschemes.iter().copied().any(rsa_scheme) {
            vec![KeyAlgorithm::Rsa.name()]
        } else {
            Vec::new()
        };
        self.context.choose_client_key_type(&offered)?;
        self.certified_key()
    }

    fn has_certs(&self) -> bool {
        self.certified_key().is_some()
    }
}

impl ResolvesServerCert for BridgeCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        debug!(server_name = ?client_hello.server_name(), "resolving server certificate");
        self.context
            .choose_server_key_type(KeyAlgorithm::Rsa.name())?;
        self.certified_key()
    }
}

fn ring_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn build_client_config(
    context: &Arc<TrustContext>,
    provider: &Arc<CryptoProvider>,
    resolver: Arc<BridgeCertResolver>,
) -> Result<(ClientConfig, PeerSlot)> {
    let peer = PeerSlot::default();
    let verifier = Arc::new(BridgeServerVerifier {
        context: Arc::clone(context),
        provider: Arc::clone(provider),
        peer: Arc::clone(&peer),
    });
    let config = ClientConfig::builder_with_provider(Arc::clone(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| CertForgeError::TrustError(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_cert_resolver(resolver);
    Ok((config, peer))
}

fn build_server_config(
    context: &Arc<TrustContext>,
    provider: &Arc<CryptoProvider>,
    resolver: Arc<BridgeCertResolver>,
) -> Result<(ServerConfig, PeerSlot)> {
    let peer = PeerSlot::default();
    let verifier = Arc::new(BridgeClientVerifier {
        context: Arc::clone(context),
        provider: Arc::clone(provider),
        peer: Arc::clone(&peer),
    });
    let config = ServerConfig::builder_with_provider(Arc::clone(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| CertForgeError::TrustError(e.to_string()))?
        .with_client_cert_verifier(verifier)
        .with_cert_resolver(resolver);
    Ok((config, peer))
}

/// A client config whose server check and client certificate come from
/// `context`.
///
/// The returned slot belongs to the config: every connection made from it
/// writes its peer there. Use it for a single connection, or use
/// [`BridgeConnector`] to get a slot per connection.
pub fn client_config(context: Arc<TrustContext>) -> Result<(ClientConfig, PeerSlot)> {
    let resolver = Arc::new(BridgeCertResolver::new(Arc::clone(&context)));
    build_client_config(&context, &ring_provider(), resolver)
}

/// A server config whose certificate and client check come from `context`.
///
/// Like [`client_config`], the slot is shared by every connection of the
/// config; [`BridgeAcceptor`] keeps one per connection.
pub fn server_config(context: Arc<TrustContext>) -> Result<(ServerConfig, PeerSlot)> {
    let resolver = Arc::new(BridgeCertResolver::new(Arc::clone(&context)));
    build_server_config(&context, &ring_provider(), resolver)
}

/// Opens client connections that each record their own server certificate.
///
/// Connections share the context and the converted client identity.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    context: Arc<TrustContext>,
    provider: Arc<CryptoProvider>,
    resolver: Arc<BridgeCertResolver>,
}

impl BridgeConnector {
    pub fn new(context: Arc<TrustContext>) -> Self {
        Self {
            resolver: Arc::new(BridgeCertResolver::new(Arc::clone(&context))),
            provider: ring_provider(),
            context,
        }
    }

    pub fn connect(
        &self,
        server_name: ServerName<'static>,
    ) -> Result<(ClientConnection, PeerSlot)> {
        let (config, peer) =
            build_client_config(&self.context, &self.provider, Arc::clone(&self.resolver))?;
        let connection = ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| CertForgeError::TrustError(e.to_string()))?;
        Ok((connection, peer))
    }
}

/// Accepts server connections that each record their own client certificate.
#[derive(Debug, Clone)]
pub struct BridgeAcceptor {
    context: Arc<TrustContext>,
    provider: Arc<CryptoProvider>,
    resolver: Arc<BridgeCertResolver>,
}

impl BridgeAcceptor {
    pub fn new(context: Arc<TrustContext>) -> Self {
        Self {
            resolver: Arc::new(BridgeCertResolver::new(Arc::clone(&context))),
            provider: ring_provider(),
            context,
        }
    }

    pub fn accept(&self) -> Result<(ServerConnection, PeerSlot)> {
        let (config, peer) =
            build_server_config(&self.context, &self.provider, Arc::clone(&self.resolver))?;
        let connection = ServerConnection::new(Arc::new(config))
            .map_err(|e| CertForgeError::TrustError(e.to_string()))?;
        Ok((connection, peer))
    }
}
