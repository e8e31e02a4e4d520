//! The CA engine: one piece of mutable cryptographic state behind a single
//! reader/writer lock.
//!
//! The engine moves through the following states:
//!
//! ```text
//! Unconfigured -> Configured -> CsrPending -> Bootstrapped -> (SignCsr)
//!                                   ^              |
//!                                   +--------------+  GenerateCsr
//! ```
//!
//! Every [`CaEngine::generate_csr`] call creates a new key generation. A
//! certificate loaded via [`CaEngine::load_certificate`] is bound to the key
//! generation whose public key it carries. [`CaEngine::sign_csr`] only signs
//! while the loaded certificate is bound to the current generation.
use std::{
    fmt::Display,
    sync::{
        PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, info, instrument, warn};
use x509_cert::{
    Certificate,
    der::{Decode, Encode},
};

use crate::{
    cert_builder::{CertificateBuilder, CreateCertificateError},
    config::{self, CaConfig},
    consts::CA_CSR_SUBJECT,
    csr::{self, CreateCsrError, VerifiedCsr, VerifyCsrError},
    keys::rsa::{self, SigningKey},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid configuration"))]
    InvalidConfiguration { source: config::Error },

    #[snafu(display("the engine has not been configured"))]
    NotConfigured,

    #[snafu(display("failed to generate the CA signing key"))]
    KeyGeneration { source: rsa::Error },

    #[snafu(display("failed to create the CA certificate signing request"))]
    CreateCsr { source: CreateCsrError },

    #[snafu(display("invalid intermediate certificate"))]
    InvalidCertificate { source: x509_cert::der::Error },

    #[snafu(display("invalid certificate signing request"))]
    InvalidCsr { source: VerifyCsrError },

    #[snafu(display("the engine is not ready to sign: {reason}"))]
    NotReady { reason: NotReadyReason },

    #[snafu(display("failed to sign workload certificate"))]
    SignCertificate { source: CreateCertificateError },

    #[snafu(display("failed to serialize workload certificate as DER"))]
    SerializeCertificate { source: x509_cert::der::Error },
}

/// The coarse error taxonomy reported to callers of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing, malformed or unsupported configuration.
    Configuration,

    /// Entropy or crypto backend failure while creating the CA key or CSR.
    KeyGeneration,

    /// Malformed or unparseable intermediate certificate.
    InvalidCertificate,

    /// Malformed or self-inconsistent workload CSR.
    InvalidCsr,

    /// Signing attempted without a certificate bound to the current key.
    NotReady,

    /// Crypto backend failure while assembling a workload certificate.
    Signing,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration { .. } | Self::NotConfigured => ErrorKind::Configuration,
            Self::KeyGeneration { .. } | Self::CreateCsr { .. } => ErrorKind::KeyGeneration,
            Self::InvalidCertificate { .. } => ErrorKind::InvalidCertificate,
            Self::InvalidCsr { .. } => ErrorKind::InvalidCsr,
            Self::NotReady { .. } => ErrorKind::NotReady,
            Self::SignCertificate { .. } | Self::SerializeCertificate { .. } => ErrorKind::Signing,
        }
    }
}

/// Why [`CaEngine::sign_csr`] refused to sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotReadyReason {
    NotConfigured,
    NoSigningKey,
    NoIntermediateCertificate,

    /// The loaded certificate does not carry the public key of any key
    /// generated by the engine.
    CertificateKeyMismatch,

    /// The loaded certificate belongs to a key which has since been replaced
    /// by a newer CSR.
    KeyRotated,
}

impl Display for NotReadyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "the engine has not been configured"),
            Self::NoSigningKey => write!(f, "no CSR has been generated yet"),
            Self::NoIntermediateCertificate => write!(f, "no certificate has been loaded yet"),
            Self::CertificateKeyMismatch => {
                write!(f, "the loaded certificate does not match the CA key")
            }
            Self::KeyRotated => write!(
                f,
                "the CA key was rotated after the certificate was loaded, load a certificate for \
                the latest CSR"
            ),
        }
    }
}

/// Static identity of the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: &'static str,
    pub version: &'static str,
}

/// The keypair of the engine together with the CSR it was generated for.
#[derive(Debug)]
struct CaKeyPair {
    generation: u64,
    signing_key: SigningKey,
    public_key_info: Vec<u8>,
    csr: Vec<u8>,
}

#[derive(Debug)]
struct Intermediate {
    der: Vec<u8>,
    certificate: Certificate,

    /// The key generation whose public key the certificate carries, if any.
    key_generation: Option<u64>,
}

#[derive(Debug, Default)]
struct State {
    config: Option<CaConfig>,
    key_pair: Option<CaKeyPair>,
    intermediate: Option<Intermediate>,
}

/// An in-memory certificate authority.
///
/// All operations take `&self` and can be called from many threads at once.
/// Mutating operations take the state lock exclusively, signing and fetching
/// share it. Each mutation replaces whole fields while holding the write
/// lock, so readers always observe a consistent key/certificate pair.
#[derive(Debug, Default)]
pub struct CaEngine {
    state: RwLock<State>,
    key_generations: AtomicU64,
}

impl CaEngine {
    /// Creates an empty, unconfigured engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine configured with [`CaConfig::default`].
    pub fn with_default() -> Self {
        let engine = Self::new();
        engine.configure(CaConfig::default());
        engine
    }

    /// Replaces the complete configuration of the engine.
    #[instrument(skip(self))]
    pub fn configure(&self, config: CaConfig) {
        info!(
            trust_domain = %config.trust_domain,
            ttl = %config.ttl,
            key_size = %config.key_size,
            "configuring CA engine"
        );

        self.write_state().config = Some(config);
    }

    /// Parses the JSON configuration payload and applies it, see
    /// [`CaConfig::from_json`].
    pub fn configure_from_json(&self, payload: &str) -> Result<()> {
        let config = CaConfig::from_json(payload).context(InvalidConfigurationSnafu)?;
        self.configure(config);
        Ok(())
    }

    /// Returns the current configuration, if any.
    pub fn config(&self) -> Option<CaConfig> {
        self.read_state().config.clone()
    }

    pub fn plugin_info(&self) -> PluginInfo {
        PluginInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Generates a fresh keypair and a DER-encoded CSR for the configured
    /// trust domain. The previous keypair and CSR are discarded.
    ///
    /// The key is generated without holding the state lock. The new keypair
    /// and CSR are swapped in together afterwards.
    #[instrument(skip(self))]
    pub fn generate_csr(&self) -> Result<Vec<u8>> {
        let config = self.config().context(NotConfiguredSnafu)?;

        let signing_key = SigningKey::new(config.key_size).context(KeyGenerationSnafu)?;
        let public_key_info = signing_key
            .public_key_info_der()
            .context(KeyGenerationSnafu)?;

        let spiffe_id = config.trust_domain.spiffe_id();
        let csr = csr::create_csr(CA_CSR_SUBJECT, &[spiffe_id.as_str()], &signing_key)
            .context(CreateCsrSnafu)?;

        let generation = self.key_generations.fetch_add(1, Ordering::Relaxed) + 1;
        self.write_state().key_pair = Some(CaKeyPair {
            generation,
            signing_key,
            public_key_info,
            csr: csr.clone(),
        });

        info!(
            csr.spiffe_id = %spiffe_id,
            key.generation = generation,
            key.size = %config.key_size,
            "generated CA keypair and certificate signing request"
        );

        Ok(csr)
    }

    /// Returns the most recently generated CSR, if any.
    pub fn pending_csr(&self) -> Option<Vec<u8>> {
        self.read_state()
            .key_pair
            .as_ref()
            .map(|key_pair| key_pair.csr.clone())
    }

    /// Validates and stores a DER-encoded intermediate certificate.
    ///
    /// Any well-formed X.509 certificate is accepted. If it does not carry
    /// the engine's current public key it is stored nevertheless, but
    /// [`Self::sign_csr`] refuses to sign until a matching certificate is
    /// loaded. On error the stored state is left untouched.
    #[instrument(skip_all, fields(certificate.len = certificate.len()))]
    pub fn load_certificate(&self, certificate: &[u8]) -> Result<()> {
        let parsed = Certificate::from_der(certificate).context(InvalidCertificateSnafu)?;
        let public_key_info = parsed
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .context(InvalidCertificateSnafu)?;

        let mut state = self.write_state();
        let key_generation = state
            .key_pair
            .as_ref()
            .filter(|key_pair| key_pair.public_key_info == public_key_info)
            .map(|key_pair| key_pair.generation);

        match key_generation {
            Some(generation) => info!(
                certificate.subject = %parsed.tbs_certificate.subject,
                certificate.issuer = %parsed.tbs_certificate.issuer,
                key.generation = generation,
                "loaded intermediate certificate"
            ),
            None => warn!(
                certificate.subject = %parsed.tbs_certificate.subject,
                certificate.issuer = %parsed.tbs_certificate.issuer,
                "loaded intermediate certificate does not carry the current CA public key, \
                signing stays disabled until a matching certificate is loaded"
            ),
        }

        state.intermediate = Some(Intermediate {
            der: certificate.to_vec(),
            certificate: parsed,
            key_generation,
        });

        Ok(())
    }

    /// Returns the stored intermediate certificate, or an empty vector if
    /// none has been loaded yet.
    pub fn fetch_certificate(&self) -> Vec<u8> {
        self.read_state()
            .intermediate
            .as_ref()
            .map(|intermediate| intermediate.der.clone())
            .unwrap_or_default()
    }

    /// Verifies the DER-encoded workload `csr` and issues a leaf certificate
    /// for it, signed by the engine's key and issued under the subject of the
    /// intermediate certificate. Returns the DER-encoded certificate.
    ///
    /// The certificate and key are read under one shared lock, so a
    /// concurrent [`Self::generate_csr`] can never pair a certificate with a
    /// foreign key.
    #[instrument(skip_all, fields(csr.len = csr.len()))]
    pub fn sign_csr(&self, csr: &[u8]) -> Result<Vec<u8>> {
        let state = self.read_state();

        let config = state.config.as_ref().context(NotReadySnafu {
            reason: NotReadyReason::NotConfigured,
        })?;
        let key_pair = state.key_pair.as_ref().context(NotReadySnafu {
            reason: NotReadyReason::NoSigningKey,
        })?;
        let intermediate = state.intermediate.as_ref().context(NotReadySnafu {
            reason: NotReadyReason::NoIntermediateCertificate,
        })?;
        let bound_generation = intermediate.key_generation.context(NotReadySnafu {
            reason: NotReadyReason::CertificateKeyMismatch,
        })?;
        ensure!(
            bound_generation == key_pair.generation,
            NotReadySnafu {
                reason: NotReadyReason::KeyRotated,
            }
        );

        let request = VerifiedCsr::from_der(csr).context(InvalidCsrSnafu)?;
        let certificate = CertificateBuilder::start_builder()
            .request(&request)
            .issuer(&intermediate.certificate)
            .signing_key(&key_pair.signing_key)
            .validity(config.ttl)
            .build()
            .context(SignCertificateSnafu)?;
        drop(state);

        debug!(
            certificate.subject = %certificate.tbs_certificate.subject,
            certificate.serial = %certificate.tbs_certificate.serial_number,
            "signed workload certificate"
        );

        certificate.to_der().context(SerializeCertificateSnafu)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use ca_shared::time::Duration;

    use super::*;
    use crate::{config::TrustDomain, keys::rsa::KeySize, upstream::UpstreamAuthority};

    fn small_config() -> CaConfig {
        CaConfig::new(
            TrustDomain::new("example.com").unwrap(),
            Duration::from_hours_unchecked(1),
            KeySize::Rsa1024,
        )
        .unwrap()
    }

    fn upstream() -> UpstreamAuthority {
        UpstreamAuthority::builder()
            .key_size(KeySize::Rsa1024)
            .build()
            .expect("failed to build upstream authority")
    }

    fn workload_csr() -> Vec<u8> {
        let key = SigningKey::new(KeySize::Rsa1024).unwrap();
        csr::create_csr("C=US,O=SPIFFE,CN=workload", &["spiffe://localhost"], &key).unwrap()
    }

    fn not_ready_reason(err: Error) -> NotReadyReason {
        match err {
            Error::NotReady { reason } => reason,
            err => panic!("expected not ready error, got {err}"),
        }
    }

    #[test]
    fn generate_csr_requires_configuration() {
        let engine = CaEngine::new();
        let err = engine.generate_csr().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn pending_csr_tracks_latest_csr() {
        let engine = CaEngine::new();
        engine.configure(small_config());
        assert!(engine.pending_csr().is_none());

        let first = engine.generate_csr().unwrap();
        assert_eq!(engine.pending_csr(), Some(first.clone()));

        let second = engine.generate_csr().unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.pending_csr(), Some(second));
    }

    #[test]
    fn sign_csr_not_ready_reasons() {
        let engine = CaEngine::new();
        let upstream = upstream();
        let wcsr = workload_csr();

        let err = engine.sign_csr(&wcsr).unwrap_err();
        assert_eq!(not_ready_reason(err), NotReadyReason::NotConfigured);

        engine.configure(small_config());
        let err = engine.sign_csr(&wcsr).unwrap_err();
        assert_eq!(not_ready_reason(err), NotReadyReason::NoSigningKey);

        let csr = engine.generate_csr().unwrap();
        let err = engine.sign_csr(&wcsr).unwrap_err();
        assert_eq!(not_ready_reason(err), NotReadyReason::NoIntermediateCertificate);

        // A well-formed certificate for somebody else's key.
        engine
            .load_certificate(&upstream.certificate().to_der().unwrap())
            .unwrap();
        let err = engine.sign_csr(&wcsr).unwrap_err();
        assert_eq!(not_ready_reason(err), NotReadyReason::CertificateKeyMismatch);

        engine
            .load_certificate(&upstream.sign_csr(&csr).unwrap())
            .unwrap();
        engine.sign_csr(&wcsr).expect("bound certificate must sign");

        engine.generate_csr().unwrap();
        let err = engine.sign_csr(&wcsr).unwrap_err();
        assert_eq!(not_ready_reason(err), NotReadyReason::KeyRotated);
    }

    #[test]
    fn failed_load_keeps_previous_certificate() {
        let engine = CaEngine::new();
        engine.configure(small_config());
        let upstream = upstream();

        let csr = engine.generate_csr().unwrap();
        let intermediate = upstream.sign_csr(&csr).unwrap();
        engine.load_certificate(&intermediate).unwrap();

        let err = engine
            .load_certificate(&intermediate[..intermediate.len() - 1])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCertificate);
        assert_eq!(engine.fetch_certificate(), intermediate);
        engine
            .sign_csr(&workload_csr())
            .expect("engine must still be able to sign");
    }

    #[test]
    fn unrepresentable_ttl_fails_instead_of_panicking() {
        let engine = CaEngine::new();
        let upstream = upstream();

        // The fields are public, so the range check of `CaConfig::new` can
        // be bypassed.
        engine.configure(CaConfig {
            ttl: Duration::from_secs(u64::MAX),
            ..small_config()
        });

        let csr = engine.generate_csr().unwrap();
        engine
            .load_certificate(&upstream.sign_csr(&csr).unwrap())
            .unwrap();

        let err = engine.sign_csr(&workload_csr()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Signing);
    }

    #[test]
    fn invalid_workload_csr() {
        let engine = CaEngine::new();
        engine.configure(small_config());
        let upstream = upstream();

        let csr = engine.generate_csr().unwrap();
        engine
            .load_certificate(&upstream.sign_csr(&csr).unwrap())
            .unwrap();

        let err = engine.sign_csr(b"garbage").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCsr);
    }

    #[test]
    fn plugin_info() {
        let info = CaEngine::new().plugin_info();
        assert_eq!(info.name, "ca-memory");
        assert!(!info.version.is_empty());
    }
}
