//! An in-memory upstream certificate authority.
//!
//! The engine itself never signs its own CSR. In production an external
//! upstream authority does that. [`UpstreamAuthority`] plays that role for
//! bootstrapping development setups and tests: it holds a root certificate and
//! key, and turns a CSR generated by the engine into a signed intermediate
//! certificate which can then be handed to
//! [`CaEngine::load_certificate`](crate::CaEngine::load_certificate).
use bon::Builder;
use ca_shared::time::Duration;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, info, instrument};
use x509_cert::{
    Certificate,
    builder::{Builder, CertificateBuilder, Profile},
    der::{Encode, referenced::OwnedToRef},
    ext::pkix::AuthorityKeyIdentifier,
    name::Name,
    serial_number::SerialNumber,
};

use crate::{
    cert_builder::{self, CertificateKind},
    consts::{DEFAULT_INTERMEDIATE_TTL, DEFAULT_UPSTREAM_SUBJECT, DEFAULT_UPSTREAM_VALIDITY},
    csr::{VerifiedCsr, VerifyCsrError},
    keys::rsa::{self, KeySize, SigningKey},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Defines all error variants which can occur when creating or using an
/// [`UpstreamAuthority`].
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid validity"))]
    ParseValidity {
        source: cert_builder::ValidityError,
    },

    #[snafu(display("failed to parse \"{subject}\" as subject"))]
    ParseSubject {
        source: x509_cert::der::Error,
        subject: String,
    },

    #[snafu(display("failed to create signing key pair"))]
    CreateSigningKeyPair { source: rsa::Error },

    #[snafu(display("failed to retrieve the public key info of the signing key pair"))]
    RetrievePublicKeyInfo { source: rsa::Error },

    #[snafu(display("failed to parse AuthorityKeyIdentifier"))]
    ParseAuthorityKeyIdentifier { source: x509_cert::der::Error },

    #[snafu(display("failed to create certificate builder"))]
    CreateCertificateBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to add certificate extension"))]
    AddCertificateExtension { source: x509_cert::builder::Error },

    #[snafu(display("failed to build certificate"))]
    BuildCertificate { source: x509_cert::builder::Error },

    #[snafu(display("failed to read PEM-encoded certificate chain"))]
    ReadChain { source: x509_cert::der::Error },

    #[snafu(display("the PEM-encoded certificate chain is empty"))]
    EmptyChain,

    #[snafu(display("failed to deserialize private key from PEM"))]
    DeserializeKeyFromPem { source: rsa::Error },

    #[snafu(display("failed to encode the public key info of the certificate"))]
    EncodePublicKeyInfo { source: x509_cert::der::Error },

    #[snafu(display("the private key does not belong to the certificate {subject}"))]
    KeyMismatch { subject: Name },

    #[snafu(display("invalid certificate signing request"))]
    InvalidCsr { source: VerifyCsrError },

    #[snafu(display("failed to sign intermediate certificate"))]
    SignIntermediate {
        source: cert_builder::CreateCertificateError,
    },

    #[snafu(display("failed to serialize intermediate certificate as DER"))]
    SerializeCertificate { source: x509_cert::der::Error },
}

/// A certificate authority which signs the CSRs of [`CaEngine`](crate::CaEngine)s
/// and returns intermediate CA certificates.
///
/// Use [`UpstreamAuthority::builder`] to create a new self-signed root, or
/// [`UpstreamAuthority::from_pem`] to load an existing one.
#[derive(Debug)]
pub struct UpstreamAuthority {
    certificate: Certificate,
    signing_key: SigningKey,
    intermediate_ttl: Duration,
}

impl UpstreamAuthority {
    /// Use this function in combination with [`UpstreamAuthorityBuilder`] to create new
    /// self-signed upstream authorities.
    pub fn builder() -> UpstreamAuthorityBuilderBuilder<'static> {
        UpstreamAuthorityBuilder::start_builder()
    }

    /// Creates an [`UpstreamAuthority`] from a PEM-encoded certificate (chain)
    /// and a PEM-encoded PKCS8 RSA private key.
    ///
    /// Only the first certificate of the chain is used. The private key must
    /// belong to that certificate.
    #[instrument(skip(certificate_pem, private_key_pem))]
    pub fn from_pem(
        certificate_pem: &str,
        private_key_pem: &str,
        intermediate_ttl: Duration,
    ) -> Result<Self> {
        debug!("reading upstream certificate chain from PEM");
        let certificate = Certificate::load_pem_chain(certificate_pem.as_bytes())
            .context(ReadChainSnafu)?
            .into_iter()
            .next()
            .context(EmptyChainSnafu)?;

        let signing_key =
            SigningKey::from_pkcs8_pem(private_key_pem).context(DeserializeKeyFromPemSnafu)?;

        let certificate_spki = certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .context(EncodePublicKeyInfoSnafu)?;
        let key_spki = signing_key
            .public_key_info()
            .context(RetrievePublicKeyInfoSnafu)?
            .to_der()
            .context(EncodePublicKeyInfoSnafu)?;

        ensure!(
            certificate_spki == key_spki,
            KeyMismatchSnafu {
                subject: certificate.tbs_certificate.subject.clone(),
            }
        );

        Ok(Self {
            certificate,
            signing_key,
            intermediate_ttl,
        })
    }

    /// Verifies the DER-encoded `csr` and issues an intermediate CA
    /// certificate for it. Returns the DER-encoded certificate.
    #[instrument(name = "upstream_sign_csr", skip_all)]
    pub fn sign_csr(&self, csr: &[u8]) -> Result<Vec<u8>> {
        let request = VerifiedCsr::from_der(csr).context(InvalidCsrSnafu)?;

        let certificate = cert_builder::CertificateBuilder::start_builder()
            .request(&request)
            .issuer(&self.certificate)
            .signing_key(&self.signing_key)
            .validity(self.intermediate_ttl)
            .kind(CertificateKind::Intermediate)
            .build()
            .context(SignIntermediateSnafu)?;

        info!(
            intermediate.subject = %certificate.tbs_certificate.subject,
            intermediate.serial = %certificate.tbs_certificate.serial_number,
            "signed intermediate certificate"
        );

        certificate.to_der().context(SerializeCertificateSnafu)
    }

    /// Returns the root certificate of this authority.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

/// This builder builds self-signed upstream authorities of type [`UpstreamAuthority`].
///
/// It has many default values, notably;
///
/// - A default validity of [`DEFAULT_UPSTREAM_VALIDITY`]
/// - A default subject of [`DEFAULT_UPSTREAM_SUBJECT`]
/// - A default intermediate ttl of [`DEFAULT_INTERMEDIATE_TTL`]
/// - A randomly generated serial number
/// - In case no `signing_key` was provided, a fresh RSA key of `key_size` bits
///   will be created.
///
/// Example code to construct an upstream authority:
///
/// ```no_run
/// use ca_memory::upstream::UpstreamAuthority;
///
/// let upstream = UpstreamAuthority::builder()
///     .subject("CN=Upstream CA")
///     .build()
///     .expect("failed to build upstream authority");
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct UpstreamAuthorityBuilder<'a> {
    /// Required subject of the root certificate, usually starts with `CN=`.
    #[builder(default = DEFAULT_UPSTREAM_SUBJECT)]
    subject: &'a str,

    /// Validity/lifetime of the root certificate.
    #[builder(default = DEFAULT_UPSTREAM_VALIDITY)]
    validity: Duration,

    /// Validity/lifetime of the intermediate certificates signed by the
    /// authority.
    #[builder(default = DEFAULT_INTERMEDIATE_TTL)]
    intermediate_ttl: Duration,

    /// Size of the generated RSA key. Ignored if a `signing_key` is provided.
    #[builder(default)]
    key_size: KeySize,

    /// Cryptographic keypair used to sign the root and all intermediates.
    ///
    /// If not specified a random keypair will be generated.
    signing_key: Option<SigningKey>,
}

impl<S> UpstreamAuthorityBuilderBuilder<'_, S>
where
    S: upstream_authority_builder_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub fn build(self) -> Result<UpstreamAuthority> {
        self.finish_builder().build()
    }
}

impl UpstreamAuthorityBuilder<'_> {
    #[instrument(
        name = "build_upstream_authority",
        skip(self),
        fields(subject = self.subject),
    )]
    pub fn build(self) -> Result<UpstreamAuthority> {
        let validity =
            cert_builder::validity_from_now(self.validity).context(ParseValiditySnafu)?;
        let subject: Name = self.subject.parse().context(ParseSubjectSnafu {
            subject: self.subject,
        })?;
        let signing_key = match self.signing_key {
            Some(signing_key) => signing_key,
            None => SigningKey::new(self.key_size).context(CreateSigningKeyPairSnafu)?,
        };

        // By choosing a random serial number we can make the reasonable assumption that we generate
        // a unique serial for each CA.
        let serial_number = SerialNumber::from(rand::random::<u64>());

        let spki = signing_key
            .public_key_info()
            .context(RetrievePublicKeyInfoSnafu)?;

        // The root profile adds BasicConstraints (critical, CA = true), the
        // SubjectKeyIdentifier and KeyUsage with KeyCertSign and CRLSign, but
        // no AuthorityKeyIdentifier. We add it manually, derived from the
        // 160-bit SHA-1 hash of the subject public key (RFC 5280, section
        // 4.2.1.2).
        let aki = AuthorityKeyIdentifier::try_from(spki.owned_to_ref())
            .context(ParseAuthorityKeyIdentifierSnafu)?;

        debug!(
            ca.subject = %subject,
            ca.not_after = %validity.not_after,
            ca.not_before = %validity.not_before,
            ca.serial = %serial_number,
            ca.public_key.size = signing_key.key_size(),
            "creating upstream certificate authority"
        );
        let mut builder = CertificateBuilder::new(
            Profile::Root,
            serial_number,
            validity,
            subject,
            spki,
            signing_key.signing_key(),
        )
        .context(CreateCertificateBuilderSnafu)?;

        builder
            .add_extension(&aki)
            .context(AddCertificateExtensionSnafu)?;
        let certificate = builder
            .build::<::rsa::pkcs1v15::Signature>()
            .context(BuildCertificateSnafu)?;

        Ok(UpstreamAuthority {
            certificate,
            signing_key,
            intermediate_ttl: self.intermediate_ttl,
        })
    }
}
