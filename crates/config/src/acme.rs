//! ACME issuance and renewal configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// ACME challenge type used to prove control of a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AcmeChallengeType {
    /// Response served at `/.well-known/acme-challenge/<token>` over plain HTTP
    #[default]
    #[serde(rename = "http-01")]
    Http01,
    /// TXT record published at `_acme-challenge.<domain>`
    #[serde(rename = "dns-01")]
    Dns01,
}

impl AcmeChallengeType {
    /// Protocol identifier, as used by ACME servers
    pub fn as_str(&self) -> &'static str {
        match self {
            AcmeChallengeType::Http01 => "http-01",
            AcmeChallengeType::Dns01 => "dns-01",
        }
    }
}

impl fmt::Display for AcmeChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Certificate issuance and renewal settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct AcmeConfig {
    /// Contact email registered with the ACME account
    #[validate(email(message = "ACME account email must be a valid address"))]
    pub email: String,

    /// Domains to certify; the first one becomes the common name
    #[validate(length(min = 1, message = "At least one domain is required"))]
    pub domains: Vec<String>,

    /// Directory receiving `cert.pem`, `key.pem` and `ca.pem`
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,

    /// Use the staging directory instead of production
    #[serde(default)]
    pub staging: bool,

    /// Run the background renewal scheduler
    #[serde(default = "default_auto_renew")]
    pub auto_renew: bool,

    /// Seconds between renewal eligibility checks
    #[serde(default = "default_renewal_check_interval")]
    #[validate(range(min = 60, message = "Renewal check interval must be at least 60 seconds"))]
    pub renewal_check_interval_secs: u64,

    /// Renew once the certificate has this many days left, or fewer
    #[serde(default = "default_renewal_threshold_days")]
    pub renewal_threshold_days: u32,

    /// Challenge type to fulfil for each authorization
    #[serde(default)]
    pub challenge_type: AcmeChallengeType,

    /// Seconds to wait after announcing a DNS-01 record before validation
    #[serde(default = "default_dns_settle")]
    pub dns_settle_secs: u64,

    /// Optional file holding persisted account credentials
    #[serde(default)]
    pub account_credentials: Option<PathBuf>,
}

impl AcmeConfig {
    /// Build a configuration with defaults for everything but the account and domains
    pub fn new(email: impl Into<String>, domains: Vec<String>) -> Self {
        Self {
            email: email.into(),
            domains,
            cert_dir: default_cert_dir(),
            staging: false,
            auto_renew: default_auto_renew(),
            renewal_check_interval_secs: default_renewal_check_interval(),
            renewal_threshold_days: default_renewal_threshold_days(),
            challenge_type: AcmeChallengeType::default(),
            dns_settle_secs: default_dns_settle(),
            account_credentials: None,
        }
    }

    /// Renewal check interval as a `Duration`
    pub fn renewal_check_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_check_interval_secs)
    }

    /// DNS-01 settle period as a `Duration`
    pub fn dns_settle(&self) -> Duration {
        Duration::from_secs(self.dns_settle_secs)
    }

    /// Common name for the certificate request
    pub fn common_name(&self) -> Option<&str> {
        self.domains.first().map(String::as_str)
    }
}

pub(crate) fn default_cert_dir() -> PathBuf {
    PathBuf::from("./certs")
}

pub(crate) fn default_auto_renew() -> bool {
    true
}

/// 24 hours
pub(crate) fn default_renewal_check_interval() -> u64 {
    24 * 60 * 60
}

pub(crate) fn default_renewal_threshold_days() -> u32 {
    30
}

pub(crate) fn default_dns_settle() -> u64 {
    60
}
