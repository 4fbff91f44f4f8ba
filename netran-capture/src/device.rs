//! Device enumeration through libpcap.

use netran_core::device::select_device;
use netran_core::{DeviceInfo, DeviceLookup, PrimitiveError};

const ERR_LOOKUP: i32 = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct PcapDeviceLookup;

impl PcapDeviceLookup {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceLookup for PcapDeviceLookup {
    fn list(&self) -> Result<Vec<DeviceInfo>, PrimitiveError> {
        pcap::Device::list()
            .map(|devices| devices.into_iter().map(device_info).collect())
            .map_err(|e| PrimitiveError::new(ERR_LOOKUP, e.to_string()))
    }

    fn find(&self, filter: Option<&str>) -> Result<Option<DeviceInfo>, PrimitiveError> {
        if filter.is_some() {
            return Ok(select_device(&self.list()?, filter));
        }
        // libpcap's own notion of the default device comes first.
        match pcap::Device::lookup() {
            Ok(Some(device)) => Ok(Some(device_info(device))),
            Ok(None) => Ok(select_device(&self.list()?, None)),
            Err(e) => Err(PrimitiveError::new(ERR_LOOKUP, e.to_string())),
        }
    }
}

fn device_info(device: pcap::Device) -> DeviceInfo {
    DeviceInfo {
        addresses: device.addresses.iter().map(|a| a.addr).collect(),
        loopback: device.flags.is_loopback(),
        up: device.flags.is_up(),
        name: device.name,
        description: device.desc,
    }
}
