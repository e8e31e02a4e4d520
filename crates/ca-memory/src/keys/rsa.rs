//! Abstraction layer around the [`rsa`] crate. This module provides types
//! which abstract away the generation of RSA keys used for signing of CSRs
//! and certificates.
use std::fmt::Display;

use rand_core::{CryptoRngCore, OsRng};
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePrivateKey, EncodePublicKey},
    traits::PublicKeyParts,
};
use snafu::{ResultExt, Snafu};
use tracing::instrument;
use x509_cert::{der::Decode, spki::SubjectPublicKeyInfoOwned};

/// All RSA modulus sizes (in bits) the engine accepts.
pub const SUPPORTED_KEY_SIZES: [usize; 4] = [1024, 2048, 3072, 4096];

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create RSA key with {key_size} bits"))]
    CreateKey {
        source: rsa::Error,
        key_size: KeySize,
    },

    #[snafu(display("failed to deserialize the signing (private) key from PEM-encoded PKCS8"))]
    DeserializeSigningKey { source: rsa::pkcs8::Error },

    #[snafu(display("failed to serialize the verifying (public) key as DER-encoded SPKI"))]
    SerializeVerifyingKey { source: x509_cert::spki::Error },

    #[snafu(display("failed to decode SPKI from DER"))]
    DecodeSpkiFromDer { source: x509_cert::der::Error },
}

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display(
    "unsupported RSA key size {key_size}, expected one of {SUPPORTED_KEY_SIZES:?}"
))]
pub struct UnsupportedKeySizeError {
    key_size: u64,
}

/// The RSA modulus size of a generated key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeySize {
    Rsa1024,
    #[default]
    Rsa2048,
    Rsa3072,
    Rsa4096,
}

impl KeySize {
    pub const fn bits(self) -> usize {
        match self {
            Self::Rsa1024 => 1024,
            Self::Rsa2048 => 2048,
            Self::Rsa3072 => 3072,
            Self::Rsa4096 => 4096,
        }
    }
}

impl TryFrom<u64> for KeySize {
    type Error = UnsupportedKeySizeError;

    fn try_from(key_size: u64) -> Result<Self, Self::Error> {
        match key_size {
            1024 => Ok(Self::Rsa1024),
            2048 => Ok(Self::Rsa2048),
            3072 => Ok(Self::Rsa3072),
            4096 => Ok(Self::Rsa4096),
            _ => UnsupportedKeySizeSnafu { key_size }.fail(),
        }
    }
}

impl Display for KeySize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bits())
    }
}

#[derive(Debug)]
pub struct SigningKey {
    verifying_key: RsaPublicKey,
    signing_key: rsa::pkcs1v15::SigningKey<sha2::Sha256>,
}

impl SigningKey {
    /// Generates a new RSA key with the default random-number generator
    /// [`OsRng`].
    ///
    /// It should be noted that the generation of the key takes longer for
    /// larger key sizes. The generation of an RSA key with a key size of
    /// `4096` can take up to multiple seconds.
    #[instrument(name = "create_rsa_signing_key")]
    pub fn new(key_size: KeySize) -> Result<Self> {
        let mut csprng = OsRng;
        Self::new_with_rng(&mut csprng, key_size)
    }

    /// Generates a new RSA key with a custom random-number generator.
    #[instrument(name = "create_rsa_signing_key_custom_rng", skip(rng))]
    pub fn new_with_rng<Rng>(rng: &mut Rng, key_size: KeySize) -> Result<Self>
    where
        Rng: CryptoRngCore + ?Sized,
    {
        let private_key =
            RsaPrivateKey::new(rng, key_size.bits()).context(CreateKeySnafu { key_size })?;

        Ok(Self::from_private_key(private_key))
    }

    /// Creates a signing key pair from the PEM-encoded PKCS8 private key.
    #[instrument(name = "create_rsa_signing_key_from_pkcs8_pem", skip(input))]
    pub fn from_pkcs8_pem(input: &str) -> Result<Self> {
        let private_key =
            RsaPrivateKey::from_pkcs8_pem(input).context(DeserializeSigningKeySnafu)?;

        Ok(Self::from_private_key(private_key))
    }

    fn from_private_key(private_key: RsaPrivateKey) -> Self {
        let verifying_key = RsaPublicKey::from(&private_key);
        let signing_key = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(private_key);

        Self {
            verifying_key,
            signing_key,
        }
    }

    /// Returns the signing (private) key half of the keypair.
    pub fn signing_key(&self) -> &rsa::pkcs1v15::SigningKey<sha2::Sha256> {
        &self.signing_key
    }

    /// The modulus length in bits.
    pub fn key_size(&self) -> usize {
        self.verifying_key.size() * 8
    }

    /// Returns the public half of the keypair as it is embedded into CSRs and
    /// certificates.
    pub fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let spki_der = self.public_key_info_der()?;
        SubjectPublicKeyInfoOwned::from_der(&spki_der).context(DecodeSpkiFromDerSnafu)
    }

    /// Returns the DER-encoded SPKI of the keypair.
    pub fn public_key_info_der(&self) -> Result<Vec<u8>> {
        let spki_der = self
            .verifying_key
            .to_public_key_der()
            .context(SerializeVerifyingKeySnafu)?;

        Ok(spki_der.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1024, KeySize::Rsa1024)]
    #[case(2048, KeySize::Rsa2048)]
    #[case(3072, KeySize::Rsa3072)]
    #[case(4096, KeySize::Rsa4096)]
    fn supported_key_sizes(#[case] bits: u64, #[case] expected: KeySize) {
        let key_size = KeySize::try_from(bits).expect("key size must be supported");
        assert_eq!(key_size, expected);
        assert_eq!(key_size.bits() as u64, bits);
    }

    #[rstest]
    #[case(0)]
    #[case(512)]
    #[case(2047)]
    #[case(8192)]
    fn unsupported_key_sizes(#[case] bits: u64) {
        assert_eq!(
            KeySize::try_from(bits),
            Err(UnsupportedKeySizeError { key_size: bits })
        );
    }

    #[test]
    fn generated_key_has_requested_size() {
        let key = SigningKey::new(KeySize::Rsa1024).unwrap();
        assert_eq!(key.key_size(), 1024);

        let spki = key.public_key_info().unwrap();
        assert_eq!(spki.algorithm.oid, const_oid::db::rfc5912::RSA_ENCRYPTION);
    }

    #[test]
    fn key_from_pkcs8_pem() {
        let pem = include_str!("../../tests/fixtures/upstream/private_key.pem");
        let key = SigningKey::from_pkcs8_pem(pem).unwrap();
        assert_eq!(key.key_size(), 2048);
    }

    #[test]
    fn key_from_garbage_pem() {
        let err = SigningKey::from_pkcs8_pem("not a key").unwrap_err();
        assert!(matches!(err, Error::DeserializeSigningKey { .. }));
    }
}
