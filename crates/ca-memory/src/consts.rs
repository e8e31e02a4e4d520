use ca_shared::time::Duration;

use crate::keys::rsa::KeySize;

/// The trust domain used by [`CaEngine::with_default`](crate::CaEngine::with_default).
pub const DEFAULT_TRUST_DOMAIN: &str = "localhost";

/// The default validity of signed workload certificates of one hour (3600 seconds).
pub const DEFAULT_TTL: Duration = Duration::from_hours_unchecked(1);

/// The default RSA key size of the engine's own keypair.
pub const DEFAULT_KEY_SIZE: KeySize = KeySize::Rsa2048;

/// The subject of every CSR generated by the engine. The trust domain is
/// carried in the URI SAN instead.
pub const CA_CSR_SUBJECT: &str = "C=US,O=SPIFFE";

/// The default subject of a self-signed [`UpstreamAuthority`](crate::upstream::UpstreamAuthority).
pub const DEFAULT_UPSTREAM_SUBJECT: &str = "CN=Upstream CA,O=SPIFFE,C=US";

/// The default validity of a self-signed upstream root of one year.
pub const DEFAULT_UPSTREAM_VALIDITY: Duration = Duration::from_days_unchecked(365);

/// The default validity of intermediate certificates signed by the upstream
/// authority of one day.
pub const DEFAULT_INTERMEDIATE_TTL: Duration = Duration::from_days_unchecked(1);

/// `9999-12-31T23:59:59Z`, the latest point in time an X.509 `GeneralizedTime`
/// can express, in seconds since the Unix epoch.
pub const MAX_NOT_AFTER_UNIX_SECS: u64 = 253_402_300_799;
