//! ## netran-accounting::frame
//! Zero-copy extraction of IP endpoints from captured link-layer frames.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use netran_core::Datalink;
use thiserror::Error;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const SLL_HEADER_LEN: usize = 16;
const NULL_HEADER_LEN: usize = 4;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Insufficient data to parse {0} header")]
    InsufficientData(&'static str),
    #[error("Unsupported ethertype 0x{0:04x}")]
    UnsupportedEtherType(u16),
    #[error("Unsupported datalink type {0}")]
    UnsupportedDatalink(i32),
    #[error("Unknown IP version {0}")]
    UnknownIpVersion(u8),
}

/// Source and destination of one IP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpEndpoints {
    pub source: IpAddr,
    pub destination: IpAddr,
}

/// Frame parser for a single link type.
#[derive(Debug, Clone, Copy)]
pub struct FrameParser {
    datalink: Datalink,
}

impl FrameParser {
    pub fn new(datalink: Datalink) -> Self {
        Self { datalink }
    }

    pub fn datalink(&self) -> Datalink {
        self.datalink
    }

    /// Parses the link header and the IP header behind it.
    pub fn parse(&self, frame: &[u8]) -> Result<IpEndpoints, FrameError> {
        let packet = match self.datalink {
            Datalink::ETHERNET => ethernet_payload(frame)?,
            Datalink::LINUX_SLL => {
                if frame.len() < SLL_HEADER_LEN {
                    return Err(FrameError::InsufficientData("linux cooked"));
                }
                let protocol = u16::from_be_bytes([frame[14], frame[15]]);
                ip_by_ethertype(protocol, &frame[SLL_HEADER_LEN..])?
            }
            Datalink::NULL => {
                // Address family is in host byte order; the IP version
                // nibble is enough to tell v4 from v6.
                if frame.len() < NULL_HEADER_LEN {
                    return Err(FrameError::InsufficientData("loopback"));
                }
                &frame[NULL_HEADER_LEN..]
            }
            Datalink::RAW | Datalink::RAW_ALT | Datalink::IPV4 | Datalink::IPV6 => frame,
            Datalink(other) => return Err(FrameError::UnsupportedDatalink(other)),
        };
        parse_ip(packet)
    }
}

fn ethernet_payload(frame: &[u8]) -> Result<&[u8], FrameError> {
    if frame.len() < ETHERNET_HEADER_LEN {
        return Err(FrameError::InsufficientData("ethernet"));
    }
    let mut ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    let mut offset = ETHERNET_HEADER_LEN;

    if ethertype == ETHERTYPE_VLAN {
        if frame.len() < ETHERNET_HEADER_LEN + VLAN_TAG_LEN {
            return Err(FrameError::InsufficientData("802.1Q"));
        }
        ethertype = u16::from_be_bytes([frame[16], frame[17]]);
        offset += VLAN_TAG_LEN;
    }
    ip_by_ethertype(ethertype, &frame[offset..])
}

fn ip_by_ethertype(ethertype: u16, payload: &[u8]) -> Result<&[u8], FrameError> {
    match ethertype {
        ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => Ok(payload),
        other => Err(FrameError::UnsupportedEtherType(other)),
    }
}

fn parse_ip(packet: &[u8]) -> Result<IpEndpoints, FrameError> {
    let version = packet
        .first()
        .map(|b| b >> 4)
        .ok_or(FrameError::InsufficientData("ip"))?;

    match version {
        4 => {
            if packet.len() < IPV4_MIN_HEADER_LEN {
                return Err(FrameError::InsufficientData("ipv4"));
            }
            let addr = |at: usize| {
                IpAddr::V4(Ipv4Addr::new(
                    packet[at],
                    packet[at + 1],
                    packet[at + 2],
                    packet[at + 3],
                ))
            };
            Ok(IpEndpoints {
                source: addr(12),
                destination: addr(16),
            })
        }
        6 => {
            if packet.len() < IPV6_HEADER_LEN {
                return Err(FrameError::InsufficientData("ipv6"));
            }
            let addr = |at: usize| {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&packet[at..at + 16]);
                IpAddr::V6(Ipv6Addr::from(octets))
            };
            Ok(IpEndpoints {
                source: addr(8),
                destination: addr(24),
            })
        }
        other => Err(FrameError::UnknownIpVersion(other)),
    }
}
