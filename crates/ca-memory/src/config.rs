//! Parsing and validation of the configuration payload handed to the engine
//! by its host.
//!
//! The payload is a JSON document with exactly three recognized keys:
//!
//! ```json
//! {"trust_domain": "example.com", "ttl": "1h", "key_size": 2048}
//! ```
//!
//! Unrecognized keys are ignored.
use std::fmt::Display;

use ca_shared::time::Duration;
use serde::Deserialize;
use snafu::{ResultExt, Snafu, ensure};
use tracing::instrument;

use crate::{
    cert_builder::{self, ValidityError},
    consts::{DEFAULT_KEY_SIZE, DEFAULT_TRUST_DOMAIN, DEFAULT_TTL},
    keys::rsa::{KeySize, UnsupportedKeySizeError},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to deserialize configuration"))]
    DeserializeConfiguration { source: serde_json::Error },

    #[snafu(display("invalid trust domain"))]
    InvalidTrustDomain { source: TrustDomainError },

    #[snafu(display("the ttl must be greater than zero"))]
    ZeroTtl,

    #[snafu(display("the ttl {ttl} cannot be expressed as a certificate validity"))]
    TtlOutOfRange { source: ValidityError, ttl: Duration },

    #[snafu(display("invalid key size"))]
    InvalidKeySize { source: UnsupportedKeySizeError },
}

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum TrustDomainError {
    #[snafu(display("the trust domain must not be empty"))]
    Empty,

    #[snafu(display(
        "the trust domain {trust_domain:?} contains the invalid character {character:?}"
    ))]
    InvalidCharacter { trust_domain: String, character: char },
}

/// The logical namespace under which identities issued by the engine are
/// scoped, e.g. `example.com`.
///
/// The value ends up as the authority of a `spiffe://` URI, so it must be a
/// non-empty string consisting of ASCII letters, digits, `.`, `-` and `_`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustDomain(String);

impl TrustDomain {
    pub fn new(trust_domain: impl Into<String>) -> Result<Self, TrustDomainError> {
        let trust_domain = trust_domain.into();
        ensure!(!trust_domain.is_empty(), EmptySnafu);

        if let Some(character) = trust_domain
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(*c, '.' | '-' | '_')))
        {
            return InvalidCharacterSnafu {
                trust_domain,
                character,
            }
            .fail();
        }

        Ok(Self(trust_domain))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The SPIFFE ID of the trust domain itself, e.g. `spiffe://example.com`.
    pub fn spiffe_id(&self) -> String {
        format!("spiffe://{}", self.0)
    }
}

impl Display for TrustDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The raw payload as it is received from the host.
#[derive(Debug, Deserialize)]
struct ConfigurationPayload {
    trust_domain: String,
    ttl: Duration,
    key_size: u64,
}

/// The validated configuration of a [`CaEngine`](crate::CaEngine).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaConfig {
    /// The trust domain the engine issues identities for.
    pub trust_domain: TrustDomain,

    /// Default validity period of signed workload certificates.
    pub ttl: Duration,

    /// Bit length of the RSA keys generated for the engine's CSRs.
    pub key_size: KeySize,
}

impl CaConfig {
    /// Parses and validates the JSON configuration payload.
    #[instrument(name = "parse_ca_config", skip(payload))]
    pub fn from_json(payload: &str) -> Result<Self> {
        let payload: ConfigurationPayload =
            serde_json::from_str(payload).context(DeserializeConfigurationSnafu)?;

        let trust_domain = TrustDomain::new(payload.trust_domain).context(InvalidTrustDomainSnafu)?;
        let key_size = KeySize::try_from(payload.key_size).context(InvalidKeySizeSnafu)?;

        Self::new(trust_domain, payload.ttl, key_size)
    }

    pub fn new(trust_domain: TrustDomain, ttl: Duration, key_size: KeySize) -> Result<Self> {
        ensure!(!ttl.is_zero(), ZeroTtlSnafu);
        cert_builder::not_after_from_now(ttl).context(TtlOutOfRangeSnafu { ttl })?;

        Ok(Self {
            trust_domain,
            ttl,
            key_size,
        })
    }
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            trust_domain: TrustDomain(DEFAULT_TRUST_DOMAIN.to_owned()),
            ttl: DEFAULT_TTL,
            key_size: DEFAULT_KEY_SIZE,
        }
    }
}
