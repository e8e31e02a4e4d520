use std::time::{SystemTime, UNIX_EPOCH};

use bon::Builder;
use ca_shared::time::Duration;
use const_oid::db::rfc5280::{ID_KP_CLIENT_AUTH, ID_KP_SERVER_AUTH};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, instrument, warn};
use x509_cert::{
    Certificate,
    builder::{Builder, Profile},
    ext::pkix::ExtendedKeyUsage,
    serial_number::SerialNumber,
    time::{Time, Validity},
};

use crate::{
    consts::{DEFAULT_TTL, MAX_NOT_AFTER_UNIX_SECS},
    csr::VerifiedCsr,
    keys::rsa::SigningKey,
};

#[derive(Debug, Snafu)]
pub enum ValidityError {
    #[snafu(display("a validity of {validity} starting now overflows the system clock"))]
    ClockOverflow { validity: Duration },

    #[snafu(display("a validity of {validity} starting now ends after the year 9999"))]
    BeyondMaxTime { validity: Duration },

    #[snafu(display("failed to encode validity time"))]
    EncodeTime { source: x509_cert::der::Error },
}

/// Returns the point in time `validity` from now, if it can be expressed
/// both by the system clock and as an X.509 `GeneralizedTime`.
pub fn not_after_from_now(validity: Duration) -> Result<SystemTime, ValidityError> {
    not_after_from(SystemTime::now(), validity)
}

fn not_after_from(start: SystemTime, validity: Duration) -> Result<SystemTime, ValidityError> {
    let not_after = start
        .checked_add(*validity)
        .context(ClockOverflowSnafu { validity })?;

    let max_not_after = UNIX_EPOCH
        .checked_add(std::time::Duration::from_secs(MAX_NOT_AFTER_UNIX_SECS))
        .context(ClockOverflowSnafu { validity })?;
    ensure!(not_after <= max_not_after, BeyondMaxTimeSnafu { validity });

    Ok(not_after)
}

/// Non-panicking counterpart of [`Validity::from_now`].
pub fn validity_from_now(validity: Duration) -> Result<Validity, ValidityError> {
    let not_before = SystemTime::now();
    let not_after = not_after_from(not_before, validity)?;

    Ok(Validity {
        not_before: Time::try_from(not_before).context(EncodeTimeSnafu)?,
        not_after: Time::try_from(not_after).context(EncodeTimeSnafu)?,
    })
}

/// Defines all error variants which can occur when creating a certificate
#[derive(Debug, Snafu)]
pub enum CreateCertificateError {
    #[snafu(display("invalid validity"))]
    ParseValidity { source: ValidityError },

    #[snafu(display("failed to create certificate builder"))]
    CreateCertificateBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to add certificate extension"))]
    AddCertificateExtension { source: x509_cert::builder::Error },

    #[snafu(display("failed to build certificate"))]
    BuildCertificate { source: x509_cert::builder::Error },
}

/// The kind of certificate issued for a [`VerifiedCsr`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CertificateKind {
    /// A workload (end-entity) certificate with `CA:FALSE`, usable for TLS
    /// client and server authentication.
    #[default]
    Leaf,

    /// An intermediate CA certificate with `CA:TRUE` and a path length of
    /// zero, as issued by an upstream authority to the engine.
    Intermediate,
}

/// This builder issues certificates for a [`VerifiedCsr`].
///
/// The subject and public key are taken from the request. The issuer name is
/// the subject of the `issuer` certificate, and the certificate is signed by
/// `signing_key`, which must be the key bound to the `issuer` certificate.
/// Subject alternative names requested in the CSR are copied verbatim.
///
/// This builder has many default values, notably;
///
/// - A default validity of [`DEFAULT_TTL`]
/// - A randomly generated serial number
/// - A [`CertificateKind::Leaf`] profile
///
/// Example code to sign a workload CSR:
///
/// ```no_run
/// # use ca_memory::{cert_builder::CertificateBuilder, csr::VerifiedCsr, keys::rsa::SigningKey};
/// # fn sign(csr: &[u8], issuer: &x509_cert::Certificate, key: &SigningKey) {
/// let request = VerifiedCsr::from_der(csr).expect("invalid CSR");
/// let certificate = CertificateBuilder::start_builder()
///     .request(&request)
///     .issuer(issuer)
///     .signing_key(key)
///     .build()
///     .expect("failed to build certificate");
/// # }
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct CertificateBuilder<'a> {
    /// The verified request providing subject, public key and SANs.
    request: &'a VerifiedCsr,

    /// Validity/lifetime of the certificate, starting now.
    ///
    /// If not specified the default of [`DEFAULT_TTL`] will be used.
    #[builder(default = DEFAULT_TTL)]
    validity: Duration,

    /// Which certificate profile to apply.
    #[builder(default)]
    kind: CertificateKind,

    /// The certificate of the issuing CA.
    issuer: &'a Certificate,

    /// The private key matching the public key of the `issuer` certificate.
    signing_key: &'a SigningKey,
}

impl<S> CertificateBuilderBuilder<'_, S>
where
    S: certificate_builder_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub fn build(self) -> Result<Certificate, CreateCertificateError> {
        self.finish_builder().build()
    }
}

impl CertificateBuilder<'_> {
    #[instrument(
        name = "build_certificate",
        skip(self),
        fields(subject = %self.request.subject(), kind = ?self.kind),
    )]
    pub fn build(self) -> Result<Certificate, CreateCertificateError> {
        let validity = validity_from_now(self.validity).context(ParseValiditySnafu)?;
        let issuer = self.issuer.tbs_certificate.subject.clone();

        // By choosing a random serial number we can make the reasonable assumption that we generate
        // a unique serial for each certificate.
        let serial_number = SerialNumber::from(rand::random::<u64>());

        let issuer_not_after = self.issuer.tbs_certificate.validity.not_after.to_system_time();
        if validity.not_after.to_system_time() > issuer_not_after {
            warn!(
                certificate.not_after = %validity.not_after,
                issuer.not_after = %self.issuer.tbs_certificate.validity.not_after,
                "the certificate outlives its issuer"
            );
        }

        let profile = match self.kind {
            CertificateKind::Leaf => Profile::Leaf {
                issuer: issuer.clone(),
                enable_key_agreement: true,
                enable_key_encipherment: true,
            },
            CertificateKind::Intermediate => Profile::SubCA {
                issuer: issuer.clone(),
                path_len_constraint: Some(0),
            },
        };

        debug!(
            certificate.subject = %self.request.subject(),
            certificate.not_after = %validity.not_after,
            certificate.not_before = %validity.not_before,
            certificate.serial = %serial_number,
            certificate.san = ?self.request.subject_alt_name(),
            certificate.signed_by.issuer = %issuer,
            "creating and signing certificate"
        );
        let mut builder = x509_cert::builder::CertificateBuilder::new(
            profile,
            serial_number,
            validity,
            self.request.subject().clone(),
            self.request.public_key_info().clone(),
            self.signing_key.signing_key(),
        )
        .context(CreateCertificateBuilderSnafu)?;

        // The leaf certificate can be used for WWW client and server
        // authentication. This is a base requirement for TLS certs.
        if self.kind == CertificateKind::Leaf {
            builder
                .add_extension(&ExtendedKeyUsage(vec![
                    ID_KP_CLIENT_AUTH,
                    ID_KP_SERVER_AUTH,
                ]))
                .context(AddCertificateExtensionSnafu)?;
        }

        if let Some(subject_alt_name) = self.request.subject_alt_name() {
            builder
                .add_extension(subject_alt_name)
                .context(AddCertificateExtensionSnafu)?;
        }

        builder
            .build::<rsa::pkcs1v15::Signature>()
            .context(BuildCertificateSnafu)
    }
}
