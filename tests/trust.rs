mod util;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use certforge::cert::Certificate;
use certforge::error::{CertForgeError, Result};
use certforge::key::KeyAlgorithm;
use certforge::tls::store::{CertStore, Purpose, StoreContext, X509Store};
use certforge::tls::{HandshakeState, Identity, Role, TrustContext, VerifyFlag};

fn peer_chain() -> Vec<Vec<u8>> {
    vec![util::fixture_cert().to_der().unwrap()]
}

fn fixture_identity() -> Identity {
    Identity::new(util::fixture_cert(), util::rsa_key()).unwrap()
}

#[test]
fn untrusted_chain_is_rejected_and_recorded() {
    let ctx = TrustContext::builder()
        .verify_mode(VerifyFlag::Peer)
        .cert_store(Arc::new(X509Store::new()))
        .build();
    let mut verifier = ctx.peer_verifier(Role::Client);

    let err = verifier.check_peer_chain(&peer_chain()).unwrap_err();
    assert_eq!(
        err,
        CertForgeError::TrustError("certificate verify failed".to_string())
    );
    assert_eq!(verifier.state(), HandshakeState::Rejected);
    assert_eq!(
        verifier.peer_certificate().unwrap().subject().to_string(),
        "CN=fixture.example.com,O=Example Corp,C=US"
    );
}

#[test]
fn no_verify_mode_accepts_anything() {
    let ctx = TrustContext::builder().build();
    let mut verifier = ctx.peer_verifier(Role::Server);
    verifier.check_peer_chain(&peer_chain()).unwrap();
    assert_eq!(verifier.state(), HandshakeState::Verified);
    assert_eq!(verifier.peer_certificate(), Some(&util::fixture_cert()));
}

#[test]
fn missing_peer_certificate() {
    let ctx = TrustContext::builder()
        .verify_mode(VerifyFlag::Peer | VerifyFlag::FailIfNoPeerCert)
        .build();
    let mut verifier = ctx.peer_verifier(Role::Server);
    let err = verifier.check_peer_chain::<Vec<u8>>(&[]).unwrap_err();
    assert_eq!(
        err,
        CertForgeError::TrustError("no peer certificate".to_string())
    );
    assert!(verifier.peer_certificate().is_none());
}

#[test]
fn trusted_anchor_verifies() {
    let mut store = X509Store::new();
    store.add_file(util::fixture_path("cert.pem")).unwrap();
    let ctx = TrustContext::builder()
        .verify_mode(VerifyFlag::Peer)
        .cert_store(Arc::new(store))
        .build();
    let mut verifier = ctx.peer_verifier(Role::Client);
    verifier.check_peer_chain(&peer_chain()).unwrap();
    assert_eq!(verifier.state(), HandshakeState::Verified);
}

#[test]
fn ca_file_hint_makes_chain_verify() {
    let ctx = TrustContext::builder()
        .verify_mode(VerifyFlag::Peer)
        .ca_file(util::fixture_path("cert.pem"))
        .build();
    let mut verifier = ctx.peer_verifier(Role::Client);
    verifier.check_peer_chain(&peer_chain()).unwrap();
}

#[test]
fn ca_path_hint_makes_chain_verify() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("anchor.pem"), util::CERT_PEM).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a certificate").unwrap();
    std::fs::write(dir.path().join("binary.der"), [0xffu8, 0xfe, 0x00]).unwrap();

    let ctx = TrustContext::builder()
        .verify_mode(VerifyFlag::Peer)
        .ca_path(dir.path())
        .build();
    let mut verifier = ctx.peer_verifier(Role::Client);
    verifier.check_peer_chain(&peer_chain()).unwrap();

    let mut store = X509Store::new();
    assert_eq!(store.add_path(dir.path()).unwrap(), 1);
}

#[test]
fn unreadable_ca_hint_is_not_fatal_by_itself() {
    let ctx = TrustContext::builder()
        .verify_mode(VerifyFlag::Peer)
        .ca_file("/nonexistent/ca.pem")
        .build();
    let mut verifier = ctx.peer_verifier(Role::Client);
    // the load failure is only logged; the chain is still judged, and fails
    assert_eq!(
        verifier.check_peer_chain(&peer_chain()).unwrap_err(),
        CertForgeError::TrustError("certificate verify failed".to_string())
    );
}

#[test]
fn chain_through_generated_intermediate() {
    let root_key = util::rsa_key();
    let leaf_key = util::other_rsa_key();
    let root = util::issue_ca("CN=Test Root", "CN=Test Root", &root_key, &root_key);
    let intermediate =
        util::issue_ca("CN=Test Intermediate", "CN=Test Root", &root_key, &root_key);
    let leaf = util::issue("CN=leaf.test", "CN=Test Intermediate", &leaf_key, &root_key);

    let mut store = X509Store::new();
    store.add_certificate(root);
    let ctx = TrustContext::builder()
        .verify_mode(VerifyFlag::Peer)
        .cert_store(Arc::new(store))
        .build();

    let chain = vec![leaf.to_der().unwrap(), intermediate.to_der().unwrap()];
    ctx.peer_verifier(Role::Client).check_peer_chain(&chain).unwrap();

    let leaf_only = vec![leaf.to_der().unwrap()];
    assert!(
        ctx.peer_verifier(Role::Client)
            .check_peer_chain(&leaf_only)
            .is_err()
    );
}

#[test]
fn end_entity_cannot_issue_for_others() {
    let root_key = util::rsa_key();
    let other_key = util::other_rsa_key();
    let root = util::issue_ca("CN=Test Root", "CN=Test Root", &root_key, &root_key);
    let plain = util::issue("CN=plain-leaf", "CN=Test Root", &other_key, &root_key);
    let forged = util::issue("CN=forged", "CN=plain-leaf", &other_key, &other_key);

    let mut store = X509Store::new();
    store.add_certificate(root);
    let ctx = TrustContext::builder()
        .verify_mode(VerifyFlag::Peer)
        .cert_store(Arc::new(store))
        .build();

    let chain = vec![forged.to_der().unwrap(), plain.to_der().unwrap()];
    let mut verifier = ctx.peer_verifier(Role::Client);
    assert_eq!(
        verifier.check_peer_chain(&chain).unwrap_err(),
        CertForgeError::TrustError("certificate verify failed".to_string())
    );

    // the end-entity itself is still trusted
    ctx.peer_verifier(Role::Client)
        .check_peer_chain(&vec![plain.to_der().unwrap()])
        .unwrap();
}

#[test]
fn chooser_runs_once_across_threads() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let ctx = Arc::new(
        TrustContext::builder()
            .certificate_chooser(Arc::new(move || -> Result<Identity> {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(fixture_identity())
            }))
            .build(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            std::thread::spawn(move || ctx.identity().map(|id| id.certificate.serial().clone()))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(rsa::BigUint::from(4660u32)));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(ctx.certificate_chain().unwrap().len(), 1);
    assert_eq!(ctx.private_key().unwrap().algorithm(), KeyAlgorithm::Rsa);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn explicit_identity_wins_over_chooser() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let ctx = TrustContext::builder()
        .identity(fixture_identity())
        .certificate_chooser(Arc::new(move || -> Result<Identity> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(CertForgeError::InvalidInput("unused".to_string()))
        }))
        .build();
    assert!(ctx.identity().is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn key_type_negotiation() {
    let ctx = TrustContext::builder().identity(fixture_identity()).build();
    assert_eq!(
        ctx.choose_client_key_type(&["EC", "rsa"]),
        Some(KeyAlgorithm::Rsa)
    );
    assert_eq!(ctx.choose_client_key_type(&["EC", "DSA"]), None);
    assert_eq!(ctx.choose_server_key_type("RSA"), Some(KeyAlgorithm::Rsa));
    assert_eq!(ctx.choose_server_key_type("DSA"), None);

    let dsa_ctx = TrustContext::builder()
        .identity(
            Identity::new(
                Certificate::from_pem(util::DSA_CERT_PEM).unwrap(),
                util::dsa_key(),
            )
            .unwrap(),
        )
        .build();
    assert_eq!(dsa_ctx.choose_server_key_type("dsa"), Some(KeyAlgorithm::Dsa));

    let empty = TrustContext::builder().build();
    assert_eq!(empty.choose_client_key_type(&["RSA"]), None);
}

#[test]
fn identity_rejects_mismatched_key() {
    assert!(matches!(
        Identity::new(util::fixture_cert(), util::other_rsa_key()),
        Err(CertForgeError::InvalidInput(_))
    ));
}

/// Records what the bridge asked of the store.
#[derive(Debug, Default)]
struct RecordingStore {
    calls: Arc<Mutex<Vec<String>>>,
    verdict: bool,
}

struct RecordingContext<'a> {
    store: &'a RecordingStore,
}

impl CertStore for RecordingStore {
    fn init<'a>(
        &'a self,
        leaf: &'a Certificate,
        chain: &'a [Certificate],
    ) -> Result<Box<dyn StoreContext + 'a>> {
        self.calls.lock().unwrap().push(format!(
            "init {} {}",
            leaf.subject().common_name().unwrap_or_default(),
            chain.len()
        ));
        Ok(Box::new(RecordingContext { store: self }))
    }
}

impl StoreContext for RecordingContext<'_> {
    fn set_purpose(&mut self, purpose: Purpose) {
        self.store
            .calls
            .lock()
            .unwrap()
            .push(format!("purpose {purpose:?}"));
    }

    fn set_depth(&mut self, depth: usize) {
        self.store.calls.lock().unwrap().push(format!("depth {depth}"));
    }

    fn load_verify_locations(
        &mut self,
        ca_file: Option<&Path>,
        _ca_path: Option<&Path>,
    ) -> Result<()> {
        self.store.calls.lock().unwrap().push("locations".to_string());
        match ca_file {
            Some(_) => Err(CertForgeError::IoError("no such file".to_string())),
            None => Ok(()),
        }
    }

    fn verify_certificate(&mut self) -> Result<bool> {
        self.store.calls.lock().unwrap().push("verify".to_string());
        Ok(self.store.verdict)
    }
}

#[test]
fn bridge_drives_a_custom_store() {
    let store = Arc::new(RecordingStore {
        calls: Arc::default(),
        verdict: true,
    });
    let calls = Arc::clone(&store.calls);
    let ctx = TrustContext::builder()
        .verify_mode(VerifyFlag::Peer)
        .cert_store(store)
        .ca_file("ca.pem")
        .verify_depth(4)
        .build();

    ctx.peer_verifier(Role::Server)
        .check_peer_chain(&peer_chain())
        .unwrap();
    ctx.peer_verifier(Role::Client)
        .check_peer_chain(&peer_chain())
        .unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            "init fixture.example.com 1",
            "purpose SslClient",
            "depth 4",
            "locations",
            "verify",
            "init fixture.example.com 1",
            "purpose SslServer",
            "depth 4",
            "locations",
            "verify",
        ]
    );
}

#[test]
fn store_verdict_false_is_rejection() {
    let ctx = TrustContext::builder()
        .verify_mode(VerifyFlag::Peer)
        .cert_store(Arc::new(RecordingStore::default()))
        .build();
    let mut verifier = ctx.peer_verifier(Role::Client);
    assert!(verifier.check_peer_chain(&peer_chain()).is_err());
    assert_eq!(verifier.state(), HandshakeState::Rejected);
}

#[test]
fn fail_if_no_peer_alone_does_not_verify() {
    let ctx = TrustContext::builder()
        .verify_mode(VerifyFlag::FailIfNoPeerCert)
        .cert_store(Arc::new(RecordingStore::default()))
        .build();
    ctx.peer_verifier(Role::Server)
        .check_peer_chain(&peer_chain())
        .unwrap();
}
