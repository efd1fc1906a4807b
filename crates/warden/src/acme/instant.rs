//! `instant-acme` backed provider

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use certwarden_config::AcmeChallengeType;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use tracing::{debug, info, trace, warn};

use super::error::{AcmeError, StorageError};
use super::provider::{AcmeOrder, AcmeProvider, AcmeSession, Authorization, Challenge};

/// Provider talking to a real ACME directory through `instant-acme`
///
/// When a credentials file is configured, the account is loaded from it if
/// present and saved to it after creation, so restarts reuse the account.
#[derive(Debug, Clone, Default)]
pub struct InstantAcmeProvider {
    credentials_path: Option<PathBuf>,
}

impl InstantAcmeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist account credentials at `path` (written with mode 0600)
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    fn load_credentials(path: &Path) -> Result<Option<AccountCredentials>, AcmeError> {
        if !path.exists() {
            trace!(path = %path.display(), "No stored ACME credentials found");
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(StorageError::from)?;
        let credentials = serde_json::from_str(&content).map_err(|e| {
            AcmeError::AccountCreation(format!("Failed to deserialize credentials: {}", e))
        })?;
        debug!(path = %path.display(), "Loaded ACME credentials");
        Ok(Some(credentials))
    }

    fn save_credentials(path: &Path, credentials: &AccountCredentials) -> Result<(), AcmeError> {
        let json = serde_json::to_string_pretty(credentials).map_err(StorageError::from)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(StorageError::from)?;
        }
        fs::write(path, json).map_err(StorageError::from)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map_err(StorageError::from)?;
        }

        info!(path = %path.display(), "Saved ACME credentials");
        Ok(())
    }
}

#[async_trait]
impl AcmeProvider for InstantAcmeProvider {
    async fn open_session(
        &self,
        directory_url: &str,
        email: &str,
    ) -> Result<Arc<dyn AcmeSession>, AcmeError> {
        if let Some(path) = &self.credentials_path {
            if let Some(credentials) = Self::load_credentials(path)? {
                info!("Loading existing ACME account from storage");
                let account = Account::from_credentials(credentials)
                    .await
                    .map_err(|e| AcmeError::AccountCreation(e.to_string()))?;
                return Ok(Arc::new(InstantSession { account }));
            }
        }

        info!(email = %email, directory = %directory_url, "Creating new ACME account");

        let contact = format!("mailto:{}", email);
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[&contact],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory_url,
            None,
        )
        .await
        .map_err(|e| AcmeError::AccountCreation(e.to_string()))?;

        if let Some(path) = &self.credentials_path {
            Self::save_credentials(path, &credentials)?;
        }

        info!("ACME account created successfully");
        Ok(Arc::new(InstantSession { account }))
    }
}

struct InstantSession {
    account: Account,
}

#[async_trait]
impl AcmeSession for InstantSession {
    async fn new_order(&self, domains: &[String]) -> Result<Box<dyn AcmeOrder>, AcmeError> {
        let identifiers: Vec<Identifier> =
            domains.iter().map(|d| Identifier::Dns(d.clone())).collect();

        let order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;

        Ok(Box::new(InstantOrder { order }))
    }
}

struct InstantOrder {
    order: Order,
}

/// Order status reduced to what the polling loops act on
enum Progress {
    Ready,
    Valid,
    Invalid,
    Waiting,
}

impl InstantOrder {
    async fn progress(&mut self) -> Result<Progress, AcmeError> {
        let state = self.order.refresh().await?;
        Ok(match state.status {
            OrderStatus::Ready => Progress::Ready,
            OrderStatus::Valid => Progress::Valid,
            OrderStatus::Invalid => Progress::Invalid,
            _ => Progress::Waiting,
        })
    }
}

#[async_trait]
impl AcmeOrder for InstantOrder {
    async fn authorizations(&mut self) -> Result<Vec<Authorization>, AcmeError> {
        let authorizations = self.order.authorizations().await.map_err(|e| {
            AcmeError::OrderCreation(format!("Failed to get authorizations: {}", e))
        })?;

        let mut result = Vec::with_capacity(authorizations.len());
        for authz in &authorizations {
            #[allow(unreachable_patterns)]
            let domain = match &authz.identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => continue,
            };

            debug!(domain = %domain, status = ?authz.status, "Processing authorization");

            let challenges = authz
                .challenges
                .iter()
                .filter_map(|challenge| {
                    let kind = if challenge.r#type == ChallengeType::Http01 {
                        AcmeChallengeType::Http01
                    } else if challenge.r#type == ChallengeType::Dns01 {
                        AcmeChallengeType::Dns01
                    } else {
                        return None;
                    };
                    let key_authorization = self.order.key_authorization(challenge);
                    Some(Challenge {
                        kind,
                        token: challenge.token.clone(),
                        url: challenge.url.clone(),
                        key_authorization: key_authorization.as_str().to_string(),
                        dns_value: key_authorization.dns_value(),
                    })
                })
                .collect();

            result.push(Authorization {
                domain,
                valid: authz.status == AuthorizationStatus::Valid,
                challenges,
            });
        }

        Ok(result)
    }

    async fn set_challenge_ready(&mut self, challenge_url: &str) -> Result<(), AcmeError> {
        debug!(challenge_url = %challenge_url, "Setting challenge ready");
        self.order
            .set_challenge_ready(challenge_url)
            .await
            .map_err(|e| AcmeError::ChallengeValidation {
                domain: "unknown".to_string(),
                message: e.to_string(),
            })
    }

    async fn wait_ready(&mut self, timeout: Duration) -> Result<(), AcmeError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.progress().await? {
                Progress::Ready => {
                    info!("Order is ready for finalization");
                    return Ok(());
                }
                Progress::Valid => {
                    info!("Order is already valid (certificate issued)");
                    return Ok(());
                }
                Progress::Invalid => {
                    warn!("Order became invalid");
                    return Err(AcmeError::ChallengeValidation {
                        domain: "unknown".to_string(),
                        message: "Order became invalid".to_string(),
                    });
                }
                Progress::Waiting => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(AcmeError::Timeout(
                            "Timed out waiting for order to become ready".to_string(),
                        ));
                    }
                    trace!("Order not ready yet, waiting...");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    async fn finalize(&mut self, csr_der: &[u8], timeout: Duration) -> Result<String, AcmeError> {
        self.order
            .finalize(csr_der)
            .await
            .map_err(|e| AcmeError::Finalization(format!("Failed to finalize order: {}", e)))?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.progress().await? {
                Progress::Valid => {
                    let chain = self.order.certificate().await.map_err(|e| {
                        AcmeError::Finalization(format!("Failed to get certificate: {}", e))
                    })?;
                    return chain.ok_or_else(|| {
                        AcmeError::Finalization("No certificate in response".to_string())
                    });
                }
                Progress::Invalid => {
                    return Err(AcmeError::Finalization("Order became invalid".to_string()));
                }
                Progress::Ready | Progress::Waiting => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(AcmeError::Timeout(
                            "Timed out waiting for certificate".to_string(),
                        ));
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
