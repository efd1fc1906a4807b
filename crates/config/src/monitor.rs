//! Expiration monitor configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Thresholds and schedule for certificate expiration monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "crate::validation::validate_monitor_thresholds"))]
pub struct MonitorConfig {
    /// Days before expiry at which a warning is raised
    #[serde(default = "default_warning_threshold_days")]
    pub warning_threshold_days: u32,

    /// Days before expiry at which a critical alert is raised
    ///
    /// Must be strictly below `warning_threshold_days`.
    #[serde(default = "default_critical_threshold_days")]
    pub critical_threshold_days: u32,

    /// Seconds between scheduled polls
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 1, message = "Poll interval must be at least one second"))]
    pub poll_interval_secs: u64,
}

impl MonitorConfig {
    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            warning_threshold_days: default_warning_threshold_days(),
            critical_threshold_days: default_critical_threshold_days(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

pub(crate) fn default_warning_threshold_days() -> u32 {
    30
}

pub(crate) fn default_critical_threshold_days() -> u32 {
    7
}

/// Twelve hours
pub(crate) fn default_poll_interval() -> u64 {
    12 * 60 * 60
}
