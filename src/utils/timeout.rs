//! Timeout validation for browser operations

use std::time::Duration;

use crate::ConfigError;

/// Maximum timeout for page navigation (5 minutes)
/// Covers slow-loading sites, heavy SPAs, and network delays
pub const MAX_NAVIGATION_TIMEOUT_SECS: u64 = 300;

/// Maximum time to poll for a ready DOM (2 minutes)
pub const MAX_READY_TIMEOUT_SECS: u64 = 120;

/// Validate the per-navigation timeout
///
/// # Returns
/// * `Ok(Duration)` - Validated Duration object
/// * `Err(ConfigError)` - If zero or above MAX_NAVIGATION_TIMEOUT_SECS
pub fn validate_navigation_timeout(secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 || secs > MAX_NAVIGATION_TIMEOUT_SECS {
        return Err(ConfigError::Invalid(format!(
            "navigation_timeout_secs must be between 1 and {} ({} minutes). Received: {}",
            MAX_NAVIGATION_TIMEOUT_SECS,
            MAX_NAVIGATION_TIMEOUT_SECS / 60,
            secs
        )));
    }

    Ok(Duration::from_secs(secs))
}

/// Validate the DOM-ready polling window
pub fn validate_ready_timeout(secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 || secs > MAX_READY_TIMEOUT_SECS {
        return Err(ConfigError::Invalid(format!(
            "ready_timeout_secs must be between 1 and {}. Received: {}",
            MAX_READY_TIMEOUT_SECS, secs
        )));
    }

    Ok(Duration::from_secs(secs))
}
