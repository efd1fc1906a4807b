//! Configuration validation functions
//!
//! Field and schema validators referenced from the `#[validate(...)]`
//! attributes on the configuration types.

use std::borrow::Cow;
use std::net::IpAddr;

use crate::MonitorConfig;

/// Validate that a bind address is a literal IP address
pub fn validate_ip_addr(addr: &str) -> Result<(), validator::ValidationError> {
    addr.parse::<IpAddr>().map(|_| ()).map_err(|_| {
        let mut err = validator::ValidationError::new("invalid_ip_address");
        err.message = Some(Cow::Owned(format!(
            "Invalid bind address '{}'. Expected an IP address such as '0.0.0.0' or '::'",
            addr
        )));
        err
    })
}

/// The critical band must sit strictly inside the warning band
pub fn validate_monitor_thresholds(
    config: &MonitorConfig,
) -> Result<(), validator::ValidationError> {
    if config.critical_threshold_days < config.warning_threshold_days {
        return Ok(());
    }

    let mut err = validator::ValidationError::new("critical_not_below_warning");
    err.message = Some(Cow::Owned(format!(
        "critical threshold ({} days) must be lower than warning threshold ({} days)",
        config.critical_threshold_days, config.warning_threshold_days
    )));
    Err(err)
}
