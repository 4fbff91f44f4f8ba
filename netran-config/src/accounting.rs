//! Traffic accounting configuration.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct AccountingConfig {
    /// Measurement peer whose traffic is accounted separately.
    #[validate(custom(function = validation::validate_destination))]
    #[serde(default = "default_destination")]
    pub destination: IpAddr,
}

fn default_destination() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
        }
    }
}
