//! Background certificate renewal scheduler
//!
//! Checks renewal eligibility once at start and then on the configured
//! interval. Each client owns at most one schedule.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::client::{AcmeClient, RenewalOutcome};

/// A running schedule owned by an [`AcmeClient`]
pub(crate) struct RenewalTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RenewalTask {
    fn stop(self) {
        self.cancel.cancel();
        // The task exits on its own once an in-flight check completes.
        drop(self.handle);
    }
}

impl AcmeClient {
    /// Start the background renewal schedule
    ///
    /// Returns `false` without doing anything when the schedule is already
    /// running. Must be called from within a Tokio runtime.
    pub fn start_auto_renewal(self: &Arc<Self>) -> bool {
        let mut slot = self.renewal_task.lock();
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            debug!("Auto-renewal already running");
            return false;
        }

        let interval = self.config().renewal_check_interval();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::downgrade(self), interval, cancel.clone()));

        info!(
            check_interval_secs = interval.as_secs(),
            threshold_days = self.config().renewal_threshold_days,
            "Starting certificate renewal scheduler"
        );

        *slot = Some(RenewalTask { cancel, handle });
        true
    }

    /// Cancel the schedule; returns `false` when it was not running
    ///
    /// A check already in progress runs to completion.
    pub fn stop_auto_renewal(&self) -> bool {
        match self.renewal_task.lock().take() {
            Some(task) => {
                task.stop();
                info!("Stopped certificate renewal scheduler");
                true
            }
            None => false,
        }
    }

    /// True while a schedule is active
    pub fn is_auto_renewing(&self) -> bool {
        self.renewal_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    async fn scheduled_check(&self) {
        debug!("Running scheduled certificate renewal check");

        match self.check_renewal().await {
            Ok(RenewalOutcome::Obtained(paths)) => {
                info!(cert_path = %paths.cert.display(), "Initial certificate obtained");
            }
            Ok(RenewalOutcome::Renewed(paths)) => {
                info!(cert_path = %paths.cert.display(), "Scheduled renewal completed");
            }
            Ok(RenewalOutcome::Skipped { days_left }) => {
                debug!(days_left, "No renewal needed");
            }
            Err(e) => {
                error!(error = %e, "Certificate renewal check failed");
            }
        }
    }
}

impl Drop for AcmeClient {
    fn drop(&mut self) {
        if let Some(task) = self.renewal_task.get_mut().take() {
            task.stop();
        }
    }
}

async fn run(client: Weak<AcmeClient>, interval: Duration, cancel: CancellationToken) {
    loop {
        match client.upgrade() {
            Some(client) => client.scheduled_check().await,
            None => break,
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!("Certificate renewal scheduler exited");
}
