//! Network primitives shared by the route orchestration crates.
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`IpAddress`]: IPv4 and IPv6 addresses with scope classification
//! - [`IpPrefix`]: IP network prefixes with containment and a
//!   longest-last total order

mod ip;
mod mac;

pub use ip::{AddrScope, IpAddress, IpPrefix, Ipv4Address, Ipv6Address};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),
}
