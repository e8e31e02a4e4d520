//! An in-memory server certificate authority.
//!
//! The [`CaEngine`] holds the CA's keypair, its pending certificate signing
//! request and the intermediate certificate an upstream authority signed for
//! it. Nothing is persisted, a restarted engine has to go through the
//! bootstrap again:
//!
//! 1. [`CaEngine::configure`] with a trust domain, a ttl and a key size.
//! 2. [`CaEngine::generate_csr`] creates a fresh keypair and a CSR.
//! 3. The CSR is signed externally, for example by an
//!    [`UpstreamAuthority`](upstream::UpstreamAuthority).
//! 4. [`CaEngine::load_certificate`] stores the signed intermediate.
//! 5. [`CaEngine::sign_csr`] issues workload certificates.
//!
//! ```no_run
//! use ca_memory::{CaEngine, upstream::UpstreamAuthority};
//!
//! let upstream = UpstreamAuthority::builder().build().unwrap();
//! let engine = CaEngine::with_default();
//!
//! let csr = engine.generate_csr().unwrap();
//! let intermediate = upstream.sign_csr(&csr).unwrap();
//! engine.load_certificate(&intermediate).unwrap();
//! ```
pub mod cert_builder;
pub mod config;
pub mod consts;
pub mod csr;
pub mod engine;
pub mod keys;
pub mod plugin;
pub mod upstream;

pub use engine::{CaEngine, Error, ErrorKind, NotReadyReason};
