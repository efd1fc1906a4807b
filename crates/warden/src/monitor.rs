//! Certificate expiration monitoring
//!
//! A monitor polls a [`CertificateSource`] on a fixed schedule and feeds each
//! reading to an [`ExpiryTracker`]. The tracker fires an alert when the
//! certificate enters the warning or critical band and stays quiet while it
//! remains there. A rise past the warning threshold (typically a renewal)
//! re-arms both alerts. An expired certificate alerts on every poll.

use std::sync::Arc;
use std::time::Duration;

use certwarden_config::MonitorConfig;
use parking_lot::{Mutex, ReentrantMutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::error::CertError;
use crate::inspect::{CertificateMetadata, CertificateSource};

/// Errors raised when starting a monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Thresholds or schedule are unusable
    #[error("Invalid monitor configuration: {0}")]
    InvalidConfig(#[from] validator::ValidationErrors),
}

// ============================================================================
// Hysteresis State Machine
// ============================================================================

/// Alert band the tracker currently reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryState {
    #[default]
    Normal,
    Warning,
    Critical,
    Expired,
}

/// An alert emitted by a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAlert {
    /// Entered the warning band
    Warning { days_left: i64 },
    /// Entered the critical band
    Critical { days_left: i64 },
    /// The certificate has expired (fires on every observation)
    Expired,
}

/// Pure hysteresis state machine over successive certificate readings
///
/// Each band keeps its own latch. The critical latch is released as soon as
/// a reading lies outside the critical band; the warning latch only once the
/// certificate is beyond the warning threshold, so dropping into critical and
/// climbing back into the warning band does not repeat the warning.
#[derive(Debug, Clone)]
pub struct ExpiryTracker {
    warning_days: i64,
    critical_days: i64,
    warning_active: bool,
    critical_active: bool,
    expired: bool,
}

impl ExpiryTracker {
    pub fn new(warning_threshold_days: u32, critical_threshold_days: u32) -> Self {
        Self {
            warning_days: i64::from(warning_threshold_days),
            critical_days: i64::from(critical_threshold_days),
            warning_active: false,
            critical_active: false,
            expired: false,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.warning_threshold_days, config.critical_threshold_days)
    }

    pub fn state(&self) -> ExpiryState {
        if self.expired {
            ExpiryState::Expired
        } else if self.critical_active {
            ExpiryState::Critical
        } else if self.warning_active {
            ExpiryState::Warning
        } else {
            ExpiryState::Normal
        }
    }

    pub fn warning_active(&self) -> bool {
        self.warning_active
    }

    pub fn critical_active(&self) -> bool {
        self.critical_active
    }

    /// Apply one reading and return the alert it triggers, if any
    pub fn observe(&mut self, days_left: i64, is_expired: bool) -> Option<ExpiryAlert> {
        self.expired = is_expired;

        if is_expired {
            self.critical_active = false;
            return Some(ExpiryAlert::Expired);
        }

        if days_left <= self.critical_days {
            if self.critical_active {
                return None;
            }
            self.critical_active = true;
            return Some(ExpiryAlert::Critical { days_left });
        }
        self.critical_active = false;

        if days_left <= self.warning_days {
            if self.warning_active {
                return None;
            }
            self.warning_active = true;
            return Some(ExpiryAlert::Warning { days_left });
        }

        self.warning_active = false;
        None
    }
}

// ============================================================================
// Observer
// ============================================================================

/// Receives expiration alerts
///
/// All methods default to no-ops. Callbacks run without the monitor's state
/// lock held, so they may query or re-check the monitor they observe.
pub trait ExpiryObserver: Send + Sync {
    fn on_warning(&self, _days_left: i64, _metadata: &CertificateMetadata) {}

    fn on_critical(&self, _days_left: i64, _metadata: &CertificateMetadata) {}

    /// Defaults to `on_critical` with zero days left
    fn on_expired(&self, metadata: &CertificateMetadata) {
        self.on_critical(0, metadata);
    }
}

impl ExpiryObserver for () {}

// ============================================================================
// Monitor
// ============================================================================

struct Shared {
    source: Arc<dyn CertificateSource>,
    observer: Arc<dyn ExpiryObserver>,
    tracker: Mutex<ExpiryTracker>,
    /// Serializes polls so alerts reach the observer in transition order
    dispatch: ReentrantMutex<()>,
}

impl Shared {
    fn poll(&self) -> Result<Option<ExpiryAlert>, CertError> {
        let _ordered = self.dispatch.lock();
        let metadata = self.source.inspect()?;

        let (alert, state) = {
            let mut tracker = self.tracker.lock();
            let alert = tracker.observe(metadata.days_until_expiration, metadata.is_expired);
            (alert, tracker.state())
        };

        match alert {
            Some(ExpiryAlert::Warning { days_left }) => {
                warn!(
                    certificate = %self.source.describe(),
                    days_left,
                    not_after = %metadata.not_after,
                    "Certificate expires soon"
                );
                self.observer.on_warning(days_left, &metadata);
            }
            Some(ExpiryAlert::Critical { days_left }) => {
                error!(
                    certificate = %self.source.describe(),
                    days_left,
                    not_after = %metadata.not_after,
                    "Certificate expiry is critical"
                );
                self.observer.on_critical(days_left, &metadata);
            }
            Some(ExpiryAlert::Expired) => {
                error!(
                    certificate = %self.source.describe(),
                    not_after = %metadata.not_after,
                    "Certificate has expired"
                );
                self.observer.on_expired(&metadata);
            }
            None => {
                debug!(
                    certificate = %self.source.describe(),
                    days_left = metadata.days_until_expiration,
                    state = ?state,
                    "Certificate expiry checked"
                );
            }
        }

        Ok(alert)
    }

    fn poll_logged(&self) {
        if let Err(e) = self.poll() {
            error!(
                certificate = %self.source.describe(),
                error = %e,
                "Certificate expiry check failed"
            );
        }
    }
}

/// Starts expiration monitors
pub struct ExpiryMonitor;

impl ExpiryMonitor {
    /// Validate `config`, poll once immediately, then poll on the schedule
    ///
    /// A failing initial poll is logged like any other; the schedule still
    /// starts. Must be called from within a Tokio runtime.
    pub fn start(
        source: Arc<dyn CertificateSource>,
        config: MonitorConfig,
        observer: Arc<dyn ExpiryObserver>,
    ) -> Result<MonitorHandle, MonitorError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            source,
            observer,
            tracker: Mutex::new(ExpiryTracker::from_config(&config)),
            dispatch: ReentrantMutex::new(()),
        });

        info!(
            certificate = %shared.source.describe(),
            warning_days = config.warning_threshold_days,
            critical_days = config.critical_threshold_days,
            poll_interval_secs = config.poll_interval_secs,
            "Starting certificate expiry monitor"
        );

        shared.poll_logged();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(schedule(
            Arc::clone(&shared),
            config.poll_interval(),
            cancel.clone(),
        ));

        Ok(MonitorHandle {
            shared,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }
}

async fn schedule(shared: Arc<Shared>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        shared.poll_logged();
    }
}

/// Control handle for a running monitor
///
/// Dropping the handle stops the schedule.
pub struct MonitorHandle {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorHandle {
    /// Poll now, with the same transition rules as a scheduled poll
    pub fn check(&self) -> Result<Option<ExpiryAlert>, CertError> {
        self.shared.poll()
    }

    /// Inspect the certificate without touching the alert state
    pub fn info(&self) -> Result<CertificateMetadata, CertError> {
        self.shared.source.inspect()
    }

    /// Current alert band
    pub fn state(&self) -> ExpiryState {
        self.shared.tracker.lock().state()
    }

    /// Cancel the schedule; later calls do nothing
    pub fn stop(&self) {
        if self.task.lock().take().is_some() {
            self.cancel.cancel();
            info!(
                certificate = %self.shared.source.describe(),
                "Stopped certificate expiry monitor"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("certificate", &self.shared.source.describe())
            .field("state", &self.state())
            .finish()
    }
}
