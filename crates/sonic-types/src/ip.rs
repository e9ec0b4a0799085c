//! IP address and prefix types with safe parsing.

use crate::{MacAddress, ParseError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IPv4 address wrapper with additional SONiC-specific utilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ipv4Address(Ipv4Addr);

impl Ipv4Address {
    pub const UNSPECIFIED: Self = Ipv4Address(Ipv4Addr::UNSPECIFIED);
    pub const BROADCAST: Self = Ipv4Address(Ipv4Addr::BROADCAST);
    pub const LOCALHOST: Self = Ipv4Address(Ipv4Addr::LOCALHOST);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Address(Ipv4Addr::new(a, b, c, d))
    }

    pub const fn inner(&self) -> Ipv4Addr {
        self.0
    }

    pub const fn octets(&self) -> [u8; 4] {
        self.0.octets()
    }

    pub const fn to_bits(&self) -> u32 {
        u32::from_be_bytes(self.0.octets())
    }

    /// Returns true for 169.254.0.0/16.
    pub const fn is_link_local(&self) -> bool {
        self.to_bits() & 0xffff_0000 == 0xa9fe_0000
    }

    /// Returns true for 127.0.0.0/8.
    pub const fn is_loopback(&self) -> bool {
        self.to_bits() & 0xff00_0000 == 0x7f00_0000
    }

    /// Returns true for 224.0.0.0/4.
    pub const fn is_multicast(&self) -> bool {
        self.to_bits() & 0xf000_0000 == 0xe000_0000
    }

    /// Keeps the leading `prefix_len` bits and clears the rest.
    pub fn masked(&self, prefix_len: u8) -> Self {
        let mask = match prefix_len {
            0 => 0,
            len if len >= 32 => u32::MAX,
            len => u32::MAX << (32 - u32::from(len)),
        };
        Ipv4Address(Ipv4Addr::from(self.to_bits() & mask))
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv4Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Ipv4Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Ipv4Address(addr)
    }
}

impl From<Ipv4Address> for Ipv4Addr {
    fn from(addr: Ipv4Address) -> Self {
        addr.0
    }
}

/// An IPv6 address wrapper with additional SONiC-specific utilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ipv6Address(Ipv6Addr);

impl Ipv6Address {
    pub const UNSPECIFIED: Self = Ipv6Address(Ipv6Addr::UNSPECIFIED);
    pub const LOCALHOST: Self = Ipv6Address(Ipv6Addr::LOCALHOST);

    #[allow(clippy::too_many_arguments)]
    pub const fn new(a: u16, b: u16, c: u16, d: u16, e: u16, f: u16, g: u16, h: u16) -> Self {
        Ipv6Address(Ipv6Addr::new(a, b, c, d, e, f, g, h))
    }

    pub const fn inner(&self) -> Ipv6Addr {
        self.0
    }

    pub const fn octets(&self) -> [u8; 16] {
        self.0.octets()
    }

    pub const fn segments(&self) -> [u16; 8] {
        self.0.segments()
    }

    pub const fn to_bits(&self) -> u128 {
        u128::from_be_bytes(self.0.octets())
    }

    /// Returns true if this is a link-local address (fe80::/10).
    pub fn is_link_local(&self) -> bool {
        let segments = self.segments();
        (segments[0] & 0xffc0) == 0xfe80
    }

    /// Returns true for ::1.
    pub fn is_loopback(&self) -> bool {
        self.0.is_loopback()
    }

    /// Returns true for ff00::/8.
    pub fn is_multicast(&self) -> bool {
        self.0.octets()[0] == 0xff
    }

    /// Keeps the leading `prefix_len` bits and clears the rest.
    pub fn masked(&self, prefix_len: u8) -> Self {
        let mask = match prefix_len {
            0 => 0,
            len if len >= 128 => u128::MAX,
            len => u128::MAX << (128 - u32::from(len)),
        };
        Ipv6Address(Ipv6Addr::from(self.to_bits() & mask))
    }

    /// Builds the `fe80::/64` link-local address whose interface identifier
    /// is the modified EUI-64 form of `mac`.
    pub fn link_local_from_mac(mac: &MacAddress) -> Self {
        let id = mac.eui64_interface_id();
        let mut octets = [0u8; 16];
        octets[0] = 0xfe;
        octets[1] = 0x80;
        octets[8..].copy_from_slice(&id);
        Ipv6Address(Ipv6Addr::from(octets))
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv6Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv6Addr>()
            .map(Ipv6Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv6Addr> for Ipv6Address {
    fn from(addr: Ipv6Addr) -> Self {
        Ipv6Address(addr)
    }
}

impl From<Ipv6Address> for Ipv6Addr {
    fn from(addr: Ipv6Address) -> Self {
        addr.0
    }
}

/// Scope of an address as seen by the routing stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrScope {
    Global,
    Link,
    Host,
    Multicast,
}

/// An IP address that can be either IPv4 or IPv6.
///
/// Ordering places every IPv4 address before every IPv6 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpAddress {
    V4(Ipv4Address),
    V6(Ipv6Address),
}

impl IpAddress {
    /// Returns true if this is an IPv4 address.
    pub const fn is_ipv4(&self) -> bool {
        matches!(self, IpAddress::V4(_))
    }

    /// Returns true if this is an IPv6 address.
    pub const fn is_ipv6(&self) -> bool {
        matches!(self, IpAddress::V6(_))
    }

    /// The unspecified address of the same family as `self`.
    pub const fn unspecified_like(&self) -> Self {
        match self {
            IpAddress::V4(_) => IpAddress::V4(Ipv4Address::UNSPECIFIED),
            IpAddress::V6(_) => IpAddress::V6(Ipv6Address::UNSPECIFIED),
        }
    }

    /// Returns true for 0.0.0.0 and ::.
    pub fn is_zero(&self) -> bool {
        match self {
            IpAddress::V4(addr) => *addr == Ipv4Address::UNSPECIFIED,
            IpAddress::V6(addr) => *addr == Ipv6Address::UNSPECIFIED,
        }
    }

    pub fn scope(&self) -> AddrScope {
        match self {
            IpAddress::V4(addr) if addr.is_link_local() => AddrScope::Link,
            IpAddress::V4(addr) if addr.is_loopback() => AddrScope::Host,
            IpAddress::V4(addr) if addr.is_multicast() => AddrScope::Multicast,
            IpAddress::V6(addr) if addr.is_link_local() => AddrScope::Link,
            IpAddress::V6(addr) if addr.is_loopback() => AddrScope::Host,
            IpAddress::V6(addr) if addr.is_multicast() => AddrScope::Multicast,
            _ => AddrScope::Global,
        }
    }

    pub fn is_link_local(&self) -> bool {
        self.scope() == AddrScope::Link
    }

    pub fn is_multicast(&self) -> bool {
        self.scope() == AddrScope::Multicast
    }

    /// Width of the address in bits.
    pub const fn max_prefix_len(&self) -> u8 {
        match self {
            IpAddress::V4(_) => 32,
            IpAddress::V6(_) => 128,
        }
    }

    /// Returns the address with all bits past `prefix_len` cleared.
    pub fn masked(&self, prefix_len: u8) -> Self {
        match self {
            IpAddress::V4(addr) => IpAddress::V4(addr.masked(prefix_len)),
            IpAddress::V6(addr) => IpAddress::V6(addr.masked(prefix_len)),
        }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::V4(addr) => addr.fmt(f),
            IpAddress::V6(addr) => addr.fmt(f),
        }
    }
}

impl FromStr for IpAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            s.parse::<Ipv6Address>().map(IpAddress::V6)
        } else {
            s.parse::<Ipv4Address>().map(IpAddress::V4)
        }
    }
}

impl From<Ipv4Address> for IpAddress {
    fn from(addr: Ipv4Address) -> Self {
        IpAddress::V4(addr)
    }
}

impl From<Ipv6Address> for IpAddress {
    fn from(addr: Ipv6Address) -> Self {
        IpAddress::V6(addr)
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress::V4(Ipv4Address(addr))
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress::V6(Ipv6Address(addr))
    }
}

/// An IP prefix in CIDR notation (e.g., 10.0.0.0/24 or 2001:db8::/32).
///
/// The address is kept as given; use [`IpPrefix::network`] for the masked
/// form. Prefixes order by length first, so in any sorted collection of
/// prefixes covering one address the last entry is the longest match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpPrefix {
    address: IpAddress,
    prefix_len: u8,
}

impl IpPrefix {
    pub const DEFAULT_V4: Self = IpPrefix {
        address: IpAddress::V4(Ipv4Address::UNSPECIFIED),
        prefix_len: 0,
    };

    pub const DEFAULT_V6: Self = IpPrefix {
        address: IpAddress::V6(Ipv6Address::UNSPECIFIED),
        prefix_len: 0,
    };

    /// Creates a new IP prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length is invalid for the address type
    /// (>32 for IPv4, >128 for IPv6).
    pub fn new(address: IpAddress, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = match address {
            IpAddress::V4(_) => 32,
            IpAddress::V6(_) => 128,
        };

        if prefix_len > max_len {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum {} for address type",
                prefix_len, max_len
            )));
        }

        Ok(IpPrefix {
            address,
            prefix_len,
        })
    }

    /// Returns the network address of this prefix.
    pub const fn address(&self) -> &IpAddress {
        &self.address
    }

    /// Returns the prefix length in bits.
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns true if this is an IPv4 prefix.
    pub const fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    /// Returns true if this is an IPv6 prefix.
    pub const fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }

    /// Returns true if this is a host route (/32 for IPv4, /128 for IPv6).
    pub const fn is_host_route(&self) -> bool {
        match self.address {
            IpAddress::V4(_) => self.prefix_len == 32,
            IpAddress::V6(_) => self.prefix_len == 128,
        }
    }

    /// Returns true if this is the default route (0.0.0.0/0 or ::/0).
    pub fn is_default(&self) -> bool {
        self.prefix_len == 0 && self.address.is_zero()
    }

    /// Same as [`IpPrefix::is_host_route`].
    pub const fn is_full_mask(&self) -> bool {
        self.is_host_route()
    }

    /// Returns the prefix with host bits cleared.
    pub fn network(&self) -> Self {
        IpPrefix {
            address: self.address.masked(self.prefix_len),
            prefix_len: self.prefix_len,
        }
    }

    /// Returns true if `addr` falls inside this prefix.
    pub fn contains(&self, addr: &IpAddress) -> bool {
        if self.address.is_ipv4() != addr.is_ipv4() {
            return false;
        }
        self.address.masked(self.prefix_len) == addr.masked(self.prefix_len)
    }

    /// Returns true if every address of `other` falls inside this prefix.
    pub fn covers(&self, other: &IpPrefix) -> bool {
        other.prefix_len >= self.prefix_len && self.contains(&other.address)
    }
}

impl PartialOrd for IpPrefix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IpPrefix {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prefix_len
            .cmp(&other.prefix_len)
            .then_with(|| self.address.cmp(&other.address))
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s
            .rsplit_once('/')
            .ok_or_else(|| ParseError::InvalidIpPrefix(s.to_string()))?;

        let address: IpAddress = addr_str.parse()?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        IpPrefix::new(address, prefix_len)
    }
}
