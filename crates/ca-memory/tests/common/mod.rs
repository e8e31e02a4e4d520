use std::{path::PathBuf, sync::Once};

use ca_memory::{
    consts::DEFAULT_INTERMEDIATE_TTL,
    keys::rsa::{KeySize, SigningKey},
    upstream::UpstreamAuthority,
};
use rsa::{RsaPublicKey, pkcs1v15::VerifyingKey, pkcs8::DecodePublicKey};
use sha2::Sha256;
use signature::Verifier;
use tracing_subscriber::EnvFilter;
use x509_cert::{
    Certificate,
    der::{Decode, Encode},
};

static INIT_TRACING: Once = Once::new();

/// Routes the engine's tracing output through the test harness. Set
/// `RUST_LOG=debug` to see it.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Reads a PEM fixture and returns the DER bytes inside its armor.
pub fn read_pem_fixture(name: &str) -> Vec<u8> {
    let pem = std::fs::read(fixture_path(name)).expect("failed to read fixture");
    let (label, der) = x509_cert::der::pem::decode_vec(&pem).expect("fixture is not valid PEM");
    assert_eq!(label, "CERTIFICATE");
    der
}

pub fn upstream_from_fixtures() -> UpstreamAuthority {
    let cert = std::fs::read_to_string(fixture_path("upstream/cert.pem")).unwrap();
    let key = std::fs::read_to_string(fixture_path("upstream/private_key.pem")).unwrap();
    UpstreamAuthority::from_pem(&cert, &key, DEFAULT_INTERMEDIATE_TTL)
        .expect("failed to load upstream authority")
}

/// A workload CSR as a SPIFFE agent would send it.
pub fn workload_csr() -> Vec<u8> {
    let key = SigningKey::new(KeySize::Rsa1024).unwrap();
    ca_memory::csr::create_csr("C=US,O=SPIFFE,CN=workload", &["spiffe://localhost"], &key)
        .expect("failed to create workload CSR")
}

/// Checks that `certificate` was signed by the key of `issuer`.
pub fn signed_by(certificate: &Certificate, issuer: &Certificate) -> bool {
    let spki = issuer
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .unwrap();
    let public_key = RsaPublicKey::from_public_key_der(&spki).unwrap();
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);

    let Some(raw_signature) = certificate.signature.as_bytes() else {
        return false;
    };
    let Ok(signature) = rsa::pkcs1v15::Signature::try_from(raw_signature) else {
        return false;
    };

    let tbs = certificate.tbs_certificate.to_der().unwrap();
    verifying_key.verify(&tbs, &signature).is_ok()
}

/// Checks that `certificate` names `issuer` as its issuer and was signed by
/// the key of that same `issuer`.
pub fn issued_by(certificate: &Certificate, issuer: &Certificate) -> bool {
    certificate.tbs_certificate.issuer == issuer.tbs_certificate.subject
        && signed_by(certificate, issuer)
}

pub fn parse_certificate(der: &[u8]) -> Certificate {
    Certificate::from_der(der).expect("failed to parse certificate")
}
