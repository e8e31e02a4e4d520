//! Contains primitives to create private keys, which are used to sign the
//! certificate signing request of the CA and the workload certificates it
//! issues.
//!
//! The engine only works with RSA keys. In order to work with RSA keys, this
//! crate requires the [`rsa`] dependency.
//!
//! ```no_run
//! use ca_memory::keys::rsa::{KeySize, SigningKey};
//! let key = SigningKey::new(KeySize::Rsa2048).unwrap();
//! ```
//!
//! It should be noted, that the crate is currently vulnerable to the recently
//! discovered Marvin attack. The `openssl` crate is also impacted by this. See:
//!
//! - <https://people.redhat.com/~hkario/marvin/>
//! - <https://rustsec.org/advisories/RUSTSEC-2023-0071.html>
//! - <https://github.com/RustCrypto/RSA/issues/19>
pub mod rsa;
