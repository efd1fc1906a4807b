//! ACME automatic certificate management
//!
//! # Architecture
//!
//! - [`AcmeClient`] - Orchestrates issuance and renewal, owns the account
//!   session and the renewal schedule
//! - [`AcmeProvider`] - Seam to the ACME wire protocol; [`InstantAcmeProvider`]
//!   is the `instant-acme` implementation
//! - [`CertificateStorage`] - Persists `cert.pem`, `key.pem`, `ca.pem` and
//!   transient HTTP-01 artifacts
//! - [`Http01Responses`] - In-memory HTTP-01 responses for in-process serving
//!
//! # Challenge Flow
//!
//! 1. [`AcmeClient`] opens (once) an account session and creates an order
//! 2. For each pending authorization the configured challenge is fulfilled:
//!    HTTP-01 writes `.well-known/acme-challenge/<token>` under the certificate
//!    directory; DNS-01 reports the TXT record and waits a settle period
//! 3. Challenges are marked ready and the order is polled until validated
//! 4. HTTP-01 artifacts are removed
//! 5. A fresh key and CSR finalize the order; the chain is persisted
//! 6. Observers receive `on_obtained` (and `on_renewed` for renewals)

mod challenge;
mod client;
mod error;
mod instant;
mod provider;
mod scheduler;
mod storage;

pub use challenge::{
    dns_record_name, DnsChallengeRecord, Http01Responses, ACME_CHALLENGE_PREFIX,
};
pub use client::{AcmeClient, RenewalObserver, RenewalOutcome};
pub use error::{AcmeError, StorageError};
pub use instant::InstantAcmeProvider;
pub use provider::{
    directory_url, AcmeOrder, AcmeProvider, AcmeSession, Authorization, Challenge,
    CHALLENGE_TIMEOUT, DEFAULT_TIMEOUT, LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING,
};
pub use storage::{CertificatePaths, CertificateStorage, CA_FILE, CERT_FILE, KEY_FILE};
