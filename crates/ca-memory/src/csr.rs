//! Contains functions to create PKCS#10 certificate signing requests (CSRs)
//! and to parse and verify the CSRs the engine is asked to sign.
//!
//! A CSR is only ever used after its self-signature has been checked against
//! the public key it carries, see [`VerifiedCsr::from_der`].
//!
//! Supported signature algorithms of incoming CSRs are:
//!
//! - `sha256WithRSAEncryption`, `sha384WithRSAEncryption` and
//!   `sha512WithRSAEncryption` (PKCS#1 v1.5)
//! - `ecdsa-with-SHA256` over the NIST P-256 curve
use const_oid::{
    AssociatedOid,
    db::{
        rfc5280::ID_CE_SUBJECT_ALT_NAME,
        rfc5912::{
            ECDSA_WITH_SHA_256, SHA_256_WITH_RSA_ENCRYPTION, SHA_384_WITH_RSA_ENCRYPTION,
            SHA_512_WITH_RSA_ENCRYPTION,
        },
    },
};
use rsa::{RsaPublicKey, pkcs8::DecodePublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::Verifier;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, instrument};
use x509_cert::{
    builder::{Builder, RequestBuilder},
    der::{Decode, Encode, asn1::Ia5String},
    ext::{
        Extension,
        pkix::{SubjectAltName, name::GeneralName},
    },
    name::Name,
    request::{CertReq, CertReqInfo, ExtensionReq},
    spki::{ObjectIdentifier, SubjectPublicKeyInfoOwned},
};

use crate::keys::rsa::SigningKey;

/// Defines all error variants which can occur when creating a CSR.
#[derive(Debug, Snafu)]
pub enum CreateCsrError {
    #[snafu(display("failed to parse {subject:?} as subject"))]
    ParseSubject {
        source: x509_cert::der::Error,
        subject: String,
    },

    #[snafu(display("failed to parse URI SAN {uri:?} as a Ia5 string"))]
    ParseUriSan {
        source: x509_cert::der::Error,
        uri: String,
    },

    #[snafu(display("failed to create request builder"))]
    CreateRequestBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to add extension request"))]
    AddRequestExtension { source: x509_cert::builder::Error },

    #[snafu(display("failed to build certificate signing request"))]
    BuildRequest { source: x509_cert::builder::Error },

    #[snafu(display("failed to serialize certificate signing request as DER"))]
    SerializeRequest { source: x509_cert::der::Error },
}

/// Defines all error variants which render a CSR invalid.
#[derive(Debug, Snafu)]
pub enum VerifyCsrError {
    #[snafu(display("failed to decode certificate signing request from DER"))]
    DecodeRequest { source: x509_cert::der::Error },

    #[snafu(display("failed to re-encode the signed request info"))]
    EncodeRequestInfo { source: x509_cert::der::Error },

    #[snafu(display("failed to encode the subject public key info"))]
    EncodePublicKeyInfo { source: x509_cert::der::Error },

    #[snafu(display("the signature bit string is not octet aligned"))]
    MalformedSignature,

    #[snafu(display("unsupported signature algorithm {algorithm}"))]
    UnsupportedSignatureAlgorithm { algorithm: ObjectIdentifier },

    #[snafu(display("failed to decode the embedded RSA public key"))]
    DecodeRsaPublicKey { source: x509_cert::spki::Error },

    #[snafu(display("failed to decode the embedded P-256 public key"))]
    DecodeEcdsaPublicKey { source: x509_cert::spki::Error },

    #[snafu(display("failed to decode the request signature"))]
    DecodeSignature { source: signature::Error },

    #[snafu(display("the request signature does not match the embedded public key"))]
    VerifySignature { source: signature::Error },

    #[snafu(display("failed to decode the extension request attribute"))]
    DecodeExtensionRequest { source: x509_cert::der::Error },

    #[snafu(display("failed to decode the requested subject alternative names"))]
    DecodeSubjectAltName { source: x509_cert::der::Error },
}

/// Creates a DER-encoded CSR for `subject`, requesting the given URI subject
/// alternative names, signed with the SHA-256 PKCS#1 v1.5 scheme.
#[instrument(name = "create_csr", skip(signing_key))]
pub fn create_csr(
    subject: &str,
    uri_sans: &[&str],
    signing_key: &SigningKey,
) -> Result<Vec<u8>, CreateCsrError> {
    let subject: Name = subject.parse().context(ParseSubjectSnafu { subject })?;
    let sans = uri_sans
        .iter()
        .map(|uri| {
            Ok(GeneralName::UniformResourceIdentifier(
                Ia5String::new(uri).context(ParseUriSanSnafu { uri: *uri })?,
            ))
        })
        .collect::<Result<Vec<_>, CreateCsrError>>()?;

    let mut builder =
        RequestBuilder::new(subject, signing_key.signing_key()).context(CreateRequestBuilderSnafu)?;

    if !sans.is_empty() {
        builder
            .add_extension(&SubjectAltName(sans))
            .context(AddRequestExtensionSnafu)?;
    }

    let request = builder
        .build::<rsa::pkcs1v15::Signature>()
        .context(BuildRequestSnafu)?;

    request.to_der().context(SerializeRequestSnafu)
}

/// A certificate signing request whose self-signature has been verified.
///
/// Only the subject, the public key and the subject alternative names are
/// retained. All other requested extensions are dropped, so that a requester
/// can never ask for e.g. `CA:TRUE`.
#[derive(Debug)]
pub struct VerifiedCsr {
    subject: Name,
    public_key_info: SubjectPublicKeyInfoOwned,
    subject_alt_name: Option<SubjectAltName>,
}

impl VerifiedCsr {
    /// Decodes a DER-encoded CSR and verifies its signature against the
    /// public key embedded in the request itself.
    #[instrument(name = "verify_csr", skip_all, fields(csr.len = csr.len()))]
    pub fn from_der(csr: &[u8]) -> Result<Self, VerifyCsrError> {
        let request = CertReq::from_der(csr).context(DecodeRequestSnafu)?;
        verify_signature(&request)?;

        let subject_alt_name = requested_extensions(&request.info)?
            .iter()
            .find(|extension| extension.extn_id == ID_CE_SUBJECT_ALT_NAME)
            .map(|extension| SubjectAltName::from_der(extension.extn_value.as_bytes()))
            .transpose()
            .context(DecodeSubjectAltNameSnafu)?;

        debug!(
            csr.subject = %request.info.subject,
            csr.signature_algorithm = %request.algorithm.oid,
            csr.san = ?subject_alt_name,
            "verified certificate signing request"
        );

        Ok(Self {
            subject: request.info.subject,
            public_key_info: request.info.public_key,
            subject_alt_name,
        })
    }

    pub fn subject(&self) -> &Name {
        &self.subject
    }

    pub fn public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        &self.public_key_info
    }

    pub fn subject_alt_name(&self) -> Option<&SubjectAltName> {
        self.subject_alt_name.as_ref()
    }
}

fn verify_signature(request: &CertReq) -> Result<(), VerifyCsrError> {
    let message = request.info.to_der().context(EncodeRequestInfoSnafu)?;
    let public_key = request
        .info
        .public_key
        .to_der()
        .context(EncodePublicKeyInfoSnafu)?;
    let signature = request
        .signature
        .as_bytes()
        .context(MalformedSignatureSnafu)?;

    match request.algorithm.oid {
        oid if oid == SHA_256_WITH_RSA_ENCRYPTION => {
            verify_rsa::<Sha256>(&public_key, &message, signature)
        }
        oid if oid == SHA_384_WITH_RSA_ENCRYPTION => {
            verify_rsa::<Sha384>(&public_key, &message, signature)
        }
        oid if oid == SHA_512_WITH_RSA_ENCRYPTION => {
            verify_rsa::<Sha512>(&public_key, &message, signature)
        }
        oid if oid == ECDSA_WITH_SHA_256 => verify_p256(&public_key, &message, signature),
        algorithm => UnsupportedSignatureAlgorithmSnafu { algorithm }.fail(),
    }
}

fn verify_rsa<D>(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), VerifyCsrError>
where
    D: Digest + AssociatedOid,
{
    let public_key =
        RsaPublicKey::from_public_key_der(public_key).context(DecodeRsaPublicKeySnafu)?;
    let verifying_key = rsa::pkcs1v15::VerifyingKey::<D>::new(public_key);
    let signature =
        rsa::pkcs1v15::Signature::try_from(signature).context(DecodeSignatureSnafu)?;

    verifying_key
        .verify(message, &signature)
        .context(VerifySignatureSnafu)
}

fn verify_p256(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), VerifyCsrError> {
    let verifying_key = p256::ecdsa::VerifyingKey::from_public_key_der(public_key)
        .context(DecodeEcdsaPublicKeySnafu)?;
    let signature = p256::ecdsa::Signature::from_der(signature).context(DecodeSignatureSnafu)?;

    verifying_key
        .verify(message, &signature)
        .context(VerifySignatureSnafu)
}

/// Collects all extensions requested via the PKCS#9 extensionRequest attribute.
fn requested_extensions(info: &CertReqInfo) -> Result<Vec<Extension>, VerifyCsrError> {
    let mut extensions = Vec::new();

    for attribute in info
        .attributes
        .iter()
        .filter(|attribute| attribute.oid == ExtensionReq::OID)
    {
        for value in attribute.values.iter() {
            let value = value.to_der().context(DecodeExtensionRequestSnafu)?;
            let extension_req =
                ExtensionReq::from_der(&value).context(DecodeExtensionRequestSnafu)?;
            extensions.extend(extension_req.0);
        }
    }

    Ok(extensions)
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;
    use x509_cert::der::asn1::BitString;

    use super::*;
    use crate::keys::rsa::KeySize;

    fn uri_sans(csr: &VerifiedCsr) -> Vec<String> {
        csr.subject_alt_name()
            .map(|san| {
                san.0
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn create_and_verify_csr() {
        let key = SigningKey::new(KeySize::Rsa1024).unwrap();
        let csr = create_csr("C=US,O=SPIFFE,CN=workload", &["spiffe://localhost"], &key).unwrap();

        let verified = VerifiedCsr::from_der(&csr).expect("CSR must verify");
        assert_eq!(
            verified.subject(),
            &"C=US,O=SPIFFE,CN=workload".parse::<Name>().unwrap()
        );
        assert_eq!(verified.public_key_info(), &key.public_key_info().unwrap());
        assert_eq!(uri_sans(&verified), ["spiffe://localhost"]);
    }

    #[test]
    fn csr_without_sans() {
        let key = SigningKey::new(KeySize::Rsa1024).unwrap();
        let csr = create_csr("CN=plain", &[], &key).unwrap();

        let verified = VerifiedCsr::from_der(&csr).unwrap();
        assert!(verified.subject_alt_name().is_none());
    }

    #[test]
    fn verify_ecdsa_csr() {
        let signing_key = p256::ecdsa::SigningKey::random(&mut OsRng);
        let mut builder =
            RequestBuilder::new("CN=ecdsa-workload".parse().unwrap(), &signing_key).unwrap();
        builder
            .add_extension(&SubjectAltName(vec![GeneralName::UniformResourceIdentifier(
                Ia5String::new("spiffe://localhost/ecdsa").unwrap(),
            )]))
            .unwrap();
        let csr = builder
            .build::<p256::ecdsa::DerSignature>()
            .unwrap()
            .to_der()
            .unwrap();

        let verified = VerifiedCsr::from_der(&csr).expect("ECDSA CSR must verify");
        assert_eq!(uri_sans(&verified), ["spiffe://localhost/ecdsa"]);
    }

    #[test]
    fn reject_tampered_signature() {
        let key = SigningKey::new(KeySize::Rsa1024).unwrap();
        let csr = create_csr("CN=workload", &["spiffe://localhost"], &key).unwrap();

        let mut request = CertReq::from_der(&csr).unwrap();
        let mut signature = request.signature.raw_bytes().to_vec();
        signature[0] ^= 0xff;
        request.signature = BitString::from_bytes(&signature).unwrap();

        let err = VerifiedCsr::from_der(&request.to_der().unwrap()).unwrap_err();
        assert!(matches!(err, VerifyCsrError::VerifySignature { .. }));
    }

    #[test]
    fn reject_swapped_public_key() {
        let key = SigningKey::new(KeySize::Rsa1024).unwrap();
        let other_key = SigningKey::new(KeySize::Rsa1024).unwrap();
        let csr = create_csr("CN=workload", &[], &key).unwrap();

        let mut request = CertReq::from_der(&csr).unwrap();
        request.info.public_key = other_key.public_key_info().unwrap();

        let err = VerifiedCsr::from_der(&request.to_der().unwrap()).unwrap_err();
        assert!(matches!(err, VerifyCsrError::VerifySignature { .. }));
    }

    #[test]
    fn reject_malformed_der() {
        let key = SigningKey::new(KeySize::Rsa1024).unwrap();
        let csr = create_csr("CN=workload", &[], &key).unwrap();

        for input in [&[][..], &b"definitely not DER"[..], &csr[..csr.len() / 2]] {
            let err = VerifiedCsr::from_der(input).unwrap_err();
            assert!(matches!(err, VerifyCsrError::DecodeRequest { .. }));
        }
    }
}
