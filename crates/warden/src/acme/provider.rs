//! ACME provider seam
//!
//! The orchestration in [`AcmeClient`](super::AcmeClient) only needs a small
//! slice of the protocol: open an account session, place an order, list its
//! authorizations, mark challenges ready, wait and finalize. Those steps are
//! expressed as traits so the wire protocol stays behind one implementation
//! ([`InstantAcmeProvider`](super::InstantAcmeProvider)) and tests can script
//! a CA in memory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use certwarden_config::AcmeChallengeType;

use super::error::AcmeError;

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Default timeout for ACME operations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for challenge validation
pub const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Directory URL for the staging or production environment
pub fn directory_url(staging: bool) -> &'static str {
    if staging {
        LETSENCRYPT_STAGING
    } else {
        LETSENCRYPT_PRODUCTION
    }
}

/// Something that can open ACME account sessions
#[async_trait]
pub trait AcmeProvider: Send + Sync {
    /// Bind to a directory and create (or load) the account for `email`
    async fn open_session(
        &self,
        directory_url: &str,
        email: &str,
    ) -> Result<Arc<dyn AcmeSession>, AcmeError>;
}

/// An account bound to one ACME directory
#[async_trait]
pub trait AcmeSession: Send + Sync {
    /// Submit a new order for `domains`
    async fn new_order(&self, domains: &[String]) -> Result<Box<dyn AcmeOrder>, AcmeError>;
}

/// A certificate order in progress
#[async_trait]
pub trait AcmeOrder: Send {
    /// Authorizations the CA requires for this order
    async fn authorizations(&mut self) -> Result<Vec<Authorization>, AcmeError>;

    /// Tell the CA a challenge response is in place
    async fn set_challenge_ready(&mut self, challenge_url: &str) -> Result<(), AcmeError>;

    /// Poll until every authorization is validated
    async fn wait_ready(&mut self, timeout: Duration) -> Result<(), AcmeError>;

    /// Submit the CSR and return the issued PEM chain, leaf first
    async fn finalize(&mut self, csr_der: &[u8], timeout: Duration) -> Result<String, AcmeError>;
}

/// One domain the CA wants proof of control for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Domain being authorized
    pub domain: String,
    /// Already validated (e.g. by an earlier order); nothing to fulfil
    pub valid: bool,
    /// Challenges offered for this domain
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    /// The offered challenge of the given type
    pub fn challenge(&self, kind: AcmeChallengeType) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.kind == kind)
    }
}

/// A challenge offered by the CA, with the responses precomputed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub kind: AcmeChallengeType,
    /// Token, as it appears in the HTTP-01 path
    pub token: String,
    /// URL to post readiness to
    pub url: String,
    /// Key authorization (HTTP-01 response body)
    pub key_authorization: String,
    /// Base64url SHA-256 digest of the key authorization (DNS-01 TXT value)
    pub dns_value: String,
}
