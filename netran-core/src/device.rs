//! Capture device descriptions and filter matching.

use std::net::IpAddr;

use serde::Serialize;

/// A capture device as reported by a [`crate::DeviceLookup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub description: Option<String>,
    pub addresses: Vec<IpAddr>,
    pub loopback: bool,
    pub up: bool,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            addresses: Vec::new(),
            loopback: false,
            up: true,
        }
    }

    pub fn with_address(mut self, addr: IpAddr) -> Self {
        self.addresses.push(addr);
        self
    }

    pub fn has_address(&self, addr: &IpAddr) -> bool {
        self.addresses.contains(addr)
    }

    /// A filter matches by device name or by one of the device's addresses.
    pub fn matches(&self, filter: &str) -> bool {
        if self.name == filter {
            return true;
        }
        match filter.parse::<IpAddr>() {
            Ok(addr) => self.has_address(&addr),
            Err(_) => false,
        }
    }
}

/// Picks a device from `devices`.
///
/// Without a filter the first device that is up and not a loopback wins. An
/// IP address assigned to no device yields `None`.
pub fn select_device(devices: &[DeviceInfo], filter: Option<&str>) -> Option<DeviceInfo> {
    match filter {
        Some(filter) => devices.iter().find(|d| d.matches(filter)).cloned(),
        None => devices.iter().find(|d| d.up && !d.loopback).cloned(),
    }
}
