//! Next-hop key and related types.
//!
//! A next-hop represents a single forwarding destination. Its identity is
//! the IP address (or the interface-only marker), the egress interface, the
//! MPLS label stack, the overlay VNI and router MAC, and the SRv6 segment
//! data. Weight travels with the key but is not part of its identity.

use sonic_types::{IpAddress, Ipv4Address, MacAddress};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Flags indicating next-hop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NextHopFlags(u32);

impl NextHopFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Interface is down.
    pub const IF_DOWN: Self = Self(1 << 0);
    /// This is a label next-hop.
    pub const LABEL: Self = Self(1 << 1);
    /// This is a VxLAN tunnel next-hop.
    pub const VXLAN_TUNNEL: Self = Self(1 << 2);
    /// This is an SRv6 next-hop.
    pub const SRV6: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Returns true if interface is down.
    pub fn is_if_down(&self) -> bool {
        self.0 & Self::IF_DOWN.0 != 0
    }

    pub fn is_label(&self) -> bool {
        self.0 & Self::LABEL.0 != 0
    }

    pub fn is_vxlan_tunnel(&self) -> bool {
        self.0 & Self::VXLAN_TUNNEL.0 != 0
    }

    pub fn is_srv6(&self) -> bool {
        self.0 & Self::SRV6.0 != 0
    }

    /// Sets or clears the interface down flag.
    pub fn set_if_down(&mut self, down: bool) {
        if down {
            self.0 |= Self::IF_DOWN.0;
        } else {
            self.0 &= !Self::IF_DOWN.0;
        }
    }
}

impl std::ops::BitOr for NextHopFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for NextHopFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A key identifying a single next-hop.
///
/// Next-hops can be:
/// - IP-based: an IP address with an interface alias
/// - Interface-only: an unspecified address with an interface (connected routes)
/// - MPLS: an IP-based next-hop imposing a label stack
/// - Overlay: a VxLAN tunnel endpoint with VNI and remote router MAC
/// - SRv6: an endpoint with segment list, source and optional VPN SID
#[derive(Debug, Clone)]
pub struct NextHopKey {
    ip_address: IpAddress,
    alias: String,
    labels: Vec<u32>,
    vni: u32,
    router_mac: Option<MacAddress>,
    srv6_segment: String,
    srv6_source: String,
    srv6_vpn_sid: String,
    /// Weight for weighted ECMP (0 = unweighted).
    weight: u32,
}

impl NextHopKey {
    /// Creates a new IP-based next-hop key.
    pub fn new(ip_address: IpAddress, alias: impl Into<String>) -> Self {
        Self {
            ip_address,
            alias: alias.into(),
            labels: Vec::new(),
            vni: 0,
            router_mac: None,
            srv6_segment: String::new(),
            srv6_source: String::new(),
            srv6_vpn_sid: String::new(),
            weight: 0,
        }
    }

    /// Creates a new interface-only next-hop key.
    pub fn interface_only(alias: impl Into<String>) -> Self {
        Self::new(IpAddress::V4(Ipv4Address::UNSPECIFIED), alias)
    }

    /// Creates an overlay next-hop for a remote VTEP.
    pub fn overlay(
        ip_address: IpAddress,
        alias: impl Into<String>,
        vni: u32,
        router_mac: MacAddress,
    ) -> Self {
        let mut nh = Self::new(ip_address, alias);
        nh.vni = vni;
        nh.router_mac = Some(router_mac);
        nh
    }

    /// Creates an SRv6 next-hop. The alias is left empty.
    pub fn srv6(
        ip_address: IpAddress,
        segment: impl Into<String>,
        source: impl Into<String>,
        vpn_sid: impl Into<String>,
    ) -> Self {
        let mut nh = Self::new(ip_address, "");
        nh.srv6_segment = segment.into();
        nh.srv6_source = source.into();
        nh.srv6_vpn_sid = vpn_sid.into();
        nh
    }

    pub fn with_labels(mut self, labels: Vec<u32>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// The same next-hop without its label stack.
    pub fn without_labels(&self) -> Self {
        let mut nh = self.clone();
        nh.labels.clear();
        nh
    }

    pub fn ip_address(&self) -> &IpAddress {
        &self.ip_address
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Returns the VNI (0 if not set).
    pub fn vni(&self) -> u32 {
        self.vni
    }

    pub fn router_mac(&self) -> Option<&MacAddress> {
        self.router_mac.as_ref()
    }

    pub fn srv6_segment(&self) -> &str {
        &self.srv6_segment
    }

    pub fn srv6_source(&self) -> &str {
        &self.srv6_source
    }

    pub fn srv6_vpn_sid(&self) -> &str {
        &self.srv6_vpn_sid
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Returns true if this is an interface-only next-hop.
    pub fn is_interface_nexthop(&self) -> bool {
        self.ip_address.is_zero() && !self.is_srv6()
    }

    /// Returns true if this is an overlay (VxLAN) next-hop.
    pub fn is_overlay(&self) -> bool {
        self.vni > 0
    }

    pub fn is_mpls(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn is_srv6(&self) -> bool {
        !self.srv6_segment.is_empty() || !self.srv6_source.is_empty() || !self.srv6_vpn_sid.is_empty()
    }

    #[allow(clippy::type_complexity)]
    fn identity(
        &self,
    ) -> (
        &IpAddress,
        &str,
        &[u32],
        u32,
        Option<&MacAddress>,
        &str,
        &str,
        &str,
    ) {
        (
            &self.ip_address,
            &self.alias,
            &self.labels,
            self.vni,
            self.router_mac.as_ref(),
            &self.srv6_segment,
            &self.srv6_source,
            &self.srv6_vpn_sid,
        )
    }
}

// Weight is not part of the identity: the same next-hop with different
// weights is the same next-hop.
impl PartialEq for NextHopKey {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for NextHopKey {}

impl PartialOrd for NextHopKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NextHopKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl Hash for NextHopKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for NextHopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_srv6() {
            write!(
                f,
                "srv6:{}|{}|{}|{}",
                self.ip_address, self.srv6_segment, self.srv6_source, self.srv6_vpn_sid
            )
        } else if self.is_interface_nexthop() {
            write!(f, "{}", self.alias)
        } else if self.is_overlay() {
            write!(f, "{}@{}|{}", self.ip_address, self.alias, self.vni)?;
            if let Some(mac) = &self.router_mac {
                write!(f, "|{}", mac)?;
            }
            Ok(())
        } else if self.is_mpls() {
            let labels: Vec<String> = self.labels.iter().map(u32::to_string).collect();
            write!(f, "{}@{}+{}", self.ip_address, self.alias, labels.join("/"))
        } else {
            write!(f, "{}@{}", self.ip_address, self.alias)
        }
    }
}

/// Error when parsing a NextHopKey.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid next-hop key: {message}")]
pub struct ParseNextHopKeyError {
    pub message: String,
}

impl ParseNextHopKeyError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

fn parse_ip(s: &str) -> Result<IpAddress, ParseNextHopKeyError> {
    s.parse()
        .map_err(|_| ParseNextHopKeyError::new(format!("Invalid IP address: {}", s)))
}

/// Parses an MPLS label stack such as `100/200`, optionally prefixed with
/// `push`.
pub fn parse_label_stack(s: &str) -> Result<Vec<u32>, ParseNextHopKeyError> {
    let s = s.trim();
    let s = s.strip_prefix("push").unwrap_or(s);
    if s.is_empty() {
        return Err(ParseNextHopKeyError::new("Empty label stack"));
    }
    s.split('/')
        .map(|label| {
            label
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|l| *l < (1 << 20))
                .ok_or_else(|| ParseNextHopKeyError::new(format!("Invalid label: {}", label)))
        })
        .collect()
}

impl FromStr for NextHopKey {
    type Err = ParseNextHopKeyError;

    /// Parses a next-hop key from string.
    ///
    /// Formats supported:
    /// - `ip@alias` - Standard next-hop
    /// - `ip@alias|vni[|mac]` - VxLAN tunnel next-hop
    /// - `ip@alias+label[/label...]` - MPLS next-hop
    /// - `srv6:ip|segment|source|vpn_sid` - SRv6 next-hop
    /// - `alias` - Interface-only next-hop
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(rest) = s.strip_prefix("srv6:") {
            let parts: Vec<&str> = rest.split('|').collect();
            if parts.len() != 4 {
                return Err(ParseNextHopKeyError::new(format!("Invalid SRv6 next-hop: {}", s)));
            }
            return Ok(Self::srv6(parse_ip(parts[0])?, parts[1], parts[2], parts[3]));
        }

        if let Some((ip_part, rest)) = s.split_once('@') {
            let ip = parse_ip(ip_part)?;

            if let Some((alias, overlay)) = rest.split_once('|') {
                let (vni_str, mac) = match overlay.split_once('|') {
                    Some((vni, mac)) => {
                        let mac: MacAddress = mac.parse().map_err(|_| {
                            ParseNextHopKeyError::new(format!("Invalid router MAC: {}", mac))
                        })?;
                        (vni, mac)
                    }
                    None => (overlay, MacAddress::ZERO),
                };
                let vni = vni_str
                    .parse()
                    .map_err(|_| ParseNextHopKeyError::new(format!("Invalid VNI: {}", vni_str)))?;
                return Ok(Self::overlay(ip, alias, vni, mac));
            }

            if let Some((alias, labels)) = rest.split_once('+') {
                return Ok(Self::new(ip, alias).with_labels(parse_label_stack(labels)?));
            }

            return Ok(Self::new(ip, rest));
        }

        if s.is_empty() {
            return Err(ParseNextHopKeyError::new("Empty next-hop"));
        }
        Ok(Self::interface_only(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::hash_map::DefaultHasher;
    use std::net::Ipv4Addr;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddress {
        IpAddress::V4(Ipv4Addr::new(a, b, c, d).into())
    }

    #[test]
    fn test_nexthop_key_new() {
        let nh = NextHopKey::new(v4(192, 168, 1, 1), "Ethernet0");
        assert_eq!(nh.ip_address(), &v4(192, 168, 1, 1));
        assert_eq!(nh.alias(), "Ethernet0");
        assert!(!nh.is_interface_nexthop());
        assert!(!nh.is_overlay());
        assert!(!nh.is_srv6());
        assert_eq!(nh.weight(), 0);
    }

    #[test]
    fn test_nexthop_key_interface_only() {
        let nh = NextHopKey::interface_only("Vlan100");
        assert!(nh.is_interface_nexthop());
        assert_eq!(nh.alias(), "Vlan100");
    }

    #[test]
    fn test_interface_labeled_and_overlay_are_distinct() {
        let plain = NextHopKey::new(v4(10, 0, 0, 1), "Ethernet0");
        let labeled = plain.clone().with_labels(vec![100]);
        let overlay = NextHopKey::overlay(v4(10, 0, 0, 1), "Ethernet0", 1000, MacAddress::ZERO);

        assert_ne!(plain, labeled);
        assert_ne!(plain, overlay);
        assert_ne!(labeled, overlay);
        assert_eq!(labeled.without_labels(), plain);
    }

    #[test]
    fn test_nexthop_key_display() {
        let nh = NextHopKey::new(v4(192, 168, 1, 1), "Ethernet0");
        assert_eq!(nh.to_string(), "192.168.1.1@Ethernet0");

        let mpls = nh.clone().with_labels(vec![100, 200]);
        assert_eq!(mpls.to_string(), "192.168.1.1@Ethernet0+100/200");

        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        let vxlan = NextHopKey::overlay(v4(10, 0, 0, 1), "Vxlan1", 1000, mac);
        assert_eq!(vxlan.to_string(), "10.0.0.1@Vxlan1|1000|00:11:22:33:44:55");

        let nh_intf = NextHopKey::interface_only("Vlan100");
        assert_eq!(nh_intf.to_string(), "Vlan100");

        let srv6 = NextHopKey::srv6(v4(0, 0, 0, 0), "fc00::1", "fc00::2", "");
        assert_eq!(srv6.to_string(), "srv6:0.0.0.0|fc00::1|fc00::2|");
    }

    #[test]
    fn test_nexthop_key_parse() {
        let nh: NextHopKey = "192.168.1.1@Ethernet0".parse().unwrap();
        assert_eq!(nh.ip_address(), &v4(192, 168, 1, 1));
        assert_eq!(nh.alias(), "Ethernet0");

        let nh_vni: NextHopKey = "10.0.0.1@Vxlan1|1000".parse().unwrap();
        assert_eq!(nh_vni.vni(), 1000);

        let nh_label: NextHopKey = "10.0.0.1@Ethernet0+push100/200".parse().unwrap();
        assert_eq!(nh_label.labels(), &[100, 200]);

        let nh_intf: NextHopKey = "Vlan100".parse().unwrap();
        assert!(nh_intf.is_interface_nexthop());

        let srv6: NextHopKey = "srv6:10.0.0.1|fc00::1|fc00::2|fd00::1".parse().unwrap();
        assert!(srv6.is_srv6());
        assert_eq!(srv6.srv6_vpn_sid(), "fd00::1");

        assert!("bogus@Ethernet0".parse::<NextHopKey>().is_err());
        assert!("10.0.0.1@Ethernet0+na".parse::<NextHopKey>().is_err());
    }

    #[test]
    fn test_label_stack_bounds() {
        assert_eq!(parse_label_stack("push1048575").unwrap(), vec![1048575]);
        assert!(parse_label_stack("1048576").is_err());
        assert!(parse_label_stack("").is_err());
    }

    #[test]
    fn test_nexthop_flags() {
        let mut flags = NextHopFlags::NONE;
        assert!(!flags.is_if_down());

        flags.set_if_down(true);
        assert!(flags.is_if_down());
        assert!(flags.contains(NextHopFlags::IF_DOWN));

        let combined = NextHopFlags::IF_DOWN | NextHopFlags::LABEL;
        assert!(combined.is_if_down());
        assert!(combined.is_label());
        assert!(!combined.is_srv6());
    }

    #[test]
    fn test_nexthop_identity_excludes_weight() {
        let nh1 = NextHopKey::new(v4(192, 168, 1, 1), "Ethernet0").with_weight(1);
        let nh2 = NextHopKey::new(v4(192, 168, 1, 1), "Ethernet0").with_weight(5);
        assert_eq!(nh1, nh2);

        let mut hasher1 = DefaultHasher::new();
        let mut hasher2 = DefaultHasher::new();
        nh1.hash(&mut hasher1);
        nh2.hash(&mut hasher2);
        assert_eq!(hasher1.finish(), hasher2.finish());
    }
}
