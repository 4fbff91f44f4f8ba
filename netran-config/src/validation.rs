// netran-config/src/validation.rs
//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use std::net::IpAddr;

use validator::ValidationError;

/// Validate a capture device filter: an interface name or an IP address.
pub fn validate_device_filter(filter: &str) -> Result<(), ValidationError> {
    if filter.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    // Linux names are short; pcap names on other platforms carry paths and GUIDs.
    let re = regex::Regex::new(r"^[A-Za-z0-9_.:\-\\{}]{1,256}$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(filter) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_device_filter"))
    }
}

/// Validate that the accounting destination is a concrete address.
pub fn validate_destination(addr: &IpAddr) -> Result<(), ValidationError> {
    if addr.is_unspecified() || addr.is_multicast() {
        Err(ValidationError::new("invalid_destination"))
    } else {
        Ok(())
    }
}

/// Validate a default log level.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new("^(trace|debug|info|warn|error|off)$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(&level.to_lowercase()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}
