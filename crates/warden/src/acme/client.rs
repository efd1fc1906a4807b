//! Certificate issuance and renewal orchestration
//!
//! [`AcmeClient`] drives one order end to end: session setup (once per
//! client), order creation, challenge fulfilment for every pending
//! authorization, finalization with a fresh key, and persistence. Results are
//! reported both to the caller and to registered [`RenewalObserver`]s.

use std::sync::Arc;
use std::time::Instant;

use certwarden_config::{AcmeChallengeType, AcmeConfig};
use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::challenge::{DnsChallengeRecord, Http01Responses};
use super::error::AcmeError;
use super::instant::InstantAcmeProvider;
use super::provider::{
    directory_url, AcmeOrder, AcmeProvider, AcmeSession, Authorization, CHALLENGE_TIMEOUT,
    DEFAULT_TIMEOUT,
};
use super::scheduler::RenewalTask;
use super::storage::{CertificatePaths, CertificateStorage};
use crate::error::CertError;
use crate::inspect::{inspect, CertificateMetadata};

/// Receives issuance events
///
/// All methods default to no-ops; implement the ones of interest.
pub trait RenewalObserver: Send + Sync {
    /// A certificate was issued and written
    fn on_obtained(&self, _paths: &CertificatePaths) {}

    /// A renewal completed; follows `on_obtained` for the same issuance
    fn on_renewed(&self, _paths: &CertificatePaths) {}

    /// Issuance or renewal failed; the same error is returned to the caller
    fn on_error(&self, _error: &AcmeError) {}

    /// A DNS-01 TXT record must be published before validation proceeds
    fn on_dns_challenge(&self, _record: &DnsChallengeRecord) {}
}

impl RenewalObserver for () {}

/// What a renewal eligibility check did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// No certificate existed; one was issued
    Obtained(CertificatePaths),
    /// The certificate was within the renewal threshold and was replaced
    Renewed(CertificatePaths),
    /// The certificate is still comfortably valid
    Skipped { days_left: i64 },
}

/// ACME orchestrator for one set of domains
///
/// The account session is opened on first use and reused for the lifetime
/// of the client.
pub struct AcmeClient {
    config: AcmeConfig,
    provider: Arc<dyn AcmeProvider>,
    session: OnceCell<Arc<dyn AcmeSession>>,
    storage: CertificateStorage,
    http01: Http01Responses,
    observers: RwLock<Vec<Arc<dyn RenewalObserver>>>,
    pub(super) renewal_task: Mutex<Option<RenewalTask>>,
}

impl AcmeClient {
    /// Client backed by an explicit provider
    pub fn new(config: AcmeConfig, provider: Arc<dyn AcmeProvider>) -> Self {
        let storage = CertificateStorage::new(config.cert_dir.clone());
        Self {
            config,
            provider,
            session: OnceCell::new(),
            storage,
            http01: Http01Responses::new(),
            observers: RwLock::new(Vec::new()),
            renewal_task: Mutex::new(None),
        }
    }

    /// Client talking to Let's Encrypt through `instant-acme`
    pub fn from_config(config: AcmeConfig) -> Self {
        let mut provider = InstantAcmeProvider::new();
        if let Some(path) = &config.account_credentials {
            provider = provider.with_credentials_file(path);
        }
        Self::new(config, Arc::new(provider))
    }

    /// Register an observer for issuance events
    pub fn add_observer(&self, observer: Arc<dyn RenewalObserver>) {
        self.observers.write().push(observer);
    }

    pub fn with_observer(self, observer: Arc<dyn RenewalObserver>) -> Self {
        self.add_observer(observer);
        self
    }

    pub fn config(&self) -> &AcmeConfig {
        &self.config
    }

    pub fn storage(&self) -> &CertificateStorage {
        &self.storage
    }

    /// Pending HTTP-01 responses, for serving from an in-process listener
    pub fn http01_responses(&self) -> &Http01Responses {
        &self.http01
    }

    /// Metadata of the certificate currently on disk
    pub fn certificate_info(&self) -> Result<CertificateMetadata, CertError> {
        inspect(self.storage.cert_path())
    }

    /// Issue a certificate for the configured domains and persist it
    pub async fn obtain_certificates(&self) -> Result<CertificatePaths, AcmeError> {
        match self.issue().await {
            Ok(paths) => {
                self.notify(|o| o.on_obtained(&paths));
                Ok(paths)
            }
            Err(e) => {
                error!(domains = ?self.config.domains, error = %e, "Certificate issuance failed");
                self.notify(|o| o.on_error(&e));
                Err(e)
            }
        }
    }

    /// Re-issue the certificate; identical to obtaining, plus `on_renewed`
    pub async fn renew_certificates(&self) -> Result<CertificatePaths, AcmeError> {
        let paths = self.obtain_certificates().await?;
        info!(cert_path = %paths.cert.display(), "Certificate renewed");
        self.notify(|o| o.on_renewed(&paths));
        Ok(paths)
    }

    /// Obtain if missing, renew if within the threshold, otherwise nothing
    pub async fn check_renewal(&self) -> Result<RenewalOutcome, AcmeError> {
        if !self.storage.has_certificate() {
            info!(
                cert_path = %self.storage.cert_path().display(),
                "No certificate found, obtaining one"
            );
            return Ok(RenewalOutcome::Obtained(self.obtain_certificates().await?));
        }

        let metadata = self.certificate_info()?;
        let threshold = i64::from(self.config.renewal_threshold_days);

        if metadata.days_until_expiration <= threshold {
            info!(
                days_left = metadata.days_until_expiration,
                threshold_days = threshold,
                "Certificate needs renewal"
            );
            Ok(RenewalOutcome::Renewed(self.renew_certificates().await?))
        } else {
            debug!(
                days_left = metadata.days_until_expiration,
                "Certificate is still valid"
            );
            Ok(RenewalOutcome::Skipped {
                days_left: metadata.days_until_expiration,
            })
        }
    }

    fn notify(&self, event: impl Fn(&dyn RenewalObserver)) {
        for observer in self.observers.read().iter() {
            event(observer.as_ref());
        }
    }

    async fn session(&self) -> Result<Arc<dyn AcmeSession>, AcmeError> {
        let session = self
            .session
            .get_or_try_init(|| async {
                let url = directory_url(self.config.staging);
                self.provider.open_session(url, &self.config.email).await
            })
            .await?;
        Ok(Arc::clone(session))
    }

    async fn issue(&self) -> Result<CertificatePaths, AcmeError> {
        if self.config.domains.is_empty() {
            return Err(AcmeError::NoDomains);
        }

        let start = Instant::now();
        let session = self.session().await?;

        info!(
            domains = ?self.config.domains,
            challenge_type = %self.config.challenge_type,
            "Creating certificate order"
        );
        let mut order = session.new_order(&self.config.domains).await?;
        let authorizations = order.authorizations().await?;

        self.validate(order.as_mut(), &authorizations).await?;

        let (chain, key_pem) = self.finalize(order.as_mut()).await?;
        let paths = self.storage.save_bundle(&chain, &key_pem)?;

        info!(
            domains = ?self.config.domains,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Certificate issued successfully"
        );

        Ok(paths)
    }

    /// Fulfil every pending authorization and wait for the CA to accept them
    ///
    /// HTTP-01 artifacts are removed afterwards whether or not validation
    /// succeeded.
    async fn validate(
        &self,
        order: &mut dyn AcmeOrder,
        authorizations: &[Authorization],
    ) -> Result<(), AcmeError> {
        let mut tokens = Vec::new();
        let result = self.fulfil(order, authorizations, &mut tokens).await;

        for token in &tokens {
            self.http01.retract(token);
            self.storage.remove_challenge(token);
        }

        result
    }

    async fn fulfil(
        &self,
        order: &mut dyn AcmeOrder,
        authorizations: &[Authorization],
        tokens: &mut Vec<String>,
    ) -> Result<(), AcmeError> {
        let kind = self.config.challenge_type;

        for authz in authorizations {
            if authz.valid {
                debug!(domain = %authz.domain, "Authorization already valid");
                continue;
            }

            let challenge = authz
                .challenge(kind)
                .ok_or_else(|| AcmeError::NoChallenge {
                    domain: authz.domain.clone(),
                    kind: kind.as_str(),
                })?;

            match kind {
                AcmeChallengeType::Http01 => {
                    tokens.push(challenge.token.clone());
                    self.http01
                        .publish(&challenge.token, &challenge.key_authorization);
                    let path = self
                        .storage
                        .write_challenge(&challenge.token, &challenge.key_authorization)?;
                    debug!(
                        domain = %authz.domain,
                        path = %path.display(),
                        "HTTP-01 challenge response in place"
                    );
                }
                AcmeChallengeType::Dns01 => {
                    let record = DnsChallengeRecord::new(&authz.domain, &challenge.dns_value);
                    warn!(
                        domain = %authz.domain,
                        record = %record.name,
                        value = %record.value,
                        settle_secs = self.config.dns_settle_secs,
                        "Publish this DNS TXT record to complete the DNS-01 challenge"
                    );
                    self.notify(|o| o.on_dns_challenge(&record));
                    tokio::time::sleep(self.config.dns_settle()).await;
                }
            }

            order
                .set_challenge_ready(&challenge.url)
                .await
                .map_err(|e| for_domain(e, &authz.domain))?;
        }

        order.wait_ready(CHALLENGE_TIMEOUT).await
    }

    async fn finalize(&self, order: &mut dyn AcmeOrder) -> Result<(String, String), AcmeError> {
        info!("Finalizing certificate order");

        let cert_key = rcgen::KeyPair::generate()
            .map_err(|e| AcmeError::Finalization(format!("Failed to generate key: {}", e)))?;

        let mut params = rcgen::CertificateParams::new(self.config.domains.clone())
            .map_err(|e| AcmeError::Finalization(format!("Failed to create CSR params: {}", e)))?;
        params.distinguished_name = rcgen::DistinguishedName::new();
        if let Some(common_name) = self.config.common_name() {
            params
                .distinguished_name
                .push(rcgen::DnType::CommonName, common_name);
        }

        let csr = params
            .serialize_request(&cert_key)
            .map_err(|e| AcmeError::Finalization(format!("Failed to serialize CSR: {}", e)))?
            .der()
            .to_vec();

        let chain = order.finalize(&csr, DEFAULT_TIMEOUT).await?;
        Ok((chain, cert_key.serialize_pem()))
    }
}

/// Attach the domain to a validation error the provider could not attribute
fn for_domain(error: AcmeError, domain: &str) -> AcmeError {
    match error {
        AcmeError::ChallengeValidation { message, .. } => AcmeError::ChallengeValidation {
            domain: domain.to_string(),
            message,
        },
        other => other,
    }
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("config", &self.config)
            .field("has_session", &self.session.initialized())
            .field("auto_renewing", &self.renewal_task.lock().is_some())
            .finish()
    }
}
