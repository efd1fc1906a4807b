//! ACME challenge bookkeeping
//!
//! HTTP-01 responses are tracked in memory so an in-process plain-HTTP
//! listener can answer `/.well-known/acme-challenge/<token>`; the on-disk copy
//! is handled by [`CertificateStorage`](super::CertificateStorage). DNS-01
//! records are described here and handed to the operator.

use std::fmt;

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Label prepended to the domain for DNS-01 TXT records
pub const DNS_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Key authorizations published for in-flight HTTP-01 challenges
///
/// Cloning shares the underlying table, so a plain-HTTP responder can hold
/// one copy while the orchestrator publishes into another.
#[derive(Debug, Clone, Default)]
pub struct Http01Responses {
    by_token: Arc<DashMap<String, String>>,
}

impl Http01Responses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, token: &str, key_authorization: &str) {
        debug!(token, "Publishing HTTP-01 key authorization");
        self.by_token
            .insert(token.to_owned(), key_authorization.to_owned());
    }

    pub fn retract(&self, token: &str) {
        if self.by_token.remove(token).is_some() {
            debug!(token, "Retracted HTTP-01 key authorization");
        }
    }

    /// Body to answer a GET for `request_path` with
    ///
    /// Only paths of the form `/.well-known/acme-challenge/<token>` with a
    /// non-empty token that has been published yield a body.
    pub fn respond(&self, request_path: &str) -> Option<String> {
        let token = request_path
            .strip_prefix(ACME_CHALLENGE_PREFIX)
            .filter(|token| !token.is_empty() && !token.contains('/'))?;
        let body = self.by_token.get(token).map(|entry| entry.value().clone());
        trace!(token, hit = body.is_some(), "HTTP-01 lookup");
        body
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    pub fn clear(&self) {
        self.by_token.clear();
    }
}

/// A TXT record the operator must publish for DNS-01 validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsChallengeRecord {
    /// Domain being validated, as ordered
    pub domain: String,
    /// Fully qualified record name
    pub name: String,
    /// TXT record value
    pub value: String,
}

impl DnsChallengeRecord {
    pub fn new(domain: &str, value: impl Into<String>) -> Self {
        Self {
            domain: domain.to_string(),
            name: dns_record_name(domain),
            value: value.into(),
        }
    }
}

impl fmt::Display for DnsChallengeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} TXT \"{}\"", self.name, self.value)
    }
}

/// `_acme-challenge.<domain>`, with any wildcard label removed
pub fn dns_record_name(domain: &str) -> String {
    let base = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{}.{}", DNS_CHALLENGE_LABEL, base)
}
