//! Route types and storage structures.

use sonic_sai::{RouteEntry, VirtualRouterOid};
use sonic_types::IpPrefix;
use std::collections::BTreeMap;
use std::fmt;

use super::nhg::NextHopGroupKey;

/// A key identifying a route (VRF ID + IP prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub vrf_id: VirtualRouterOid,
    pub prefix: IpPrefix,
}

impl RouteKey {
    pub fn new(vrf_id: VirtualRouterOid, prefix: IpPrefix) -> Self {
        Self { vrf_id, prefix }
    }

    /// Returns true if this is a default route (0.0.0.0/0 or ::/0).
    pub fn is_default_route(&self) -> bool {
        self.prefix.is_default()
    }

    /// The hardware route entry for this key.
    pub fn entry(&self) -> RouteEntry {
        RouteEntry::new(self.vrf_id, self.prefix)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.prefix, self.vrf_id)
    }
}

/// What a route currently points at.
///
/// Two equal values mean a SET would change nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteNhg {
    /// The next-hops. Empty for a blackhole.
    pub nhg_key: NextHopGroupKey,
    /// Index of a group owned by the external group owner.
    pub nhg_index: Option<String>,
    /// SRv6 PIC context index.
    pub context_index: Option<String>,
}

impl RouteNhg {
    pub fn new(nhg_key: NextHopGroupKey) -> Self {
        Self {
            nhg_key,
            nhg_index: None,
            context_index: None,
        }
    }

    pub fn with_nhg_index(mut self, index: impl Into<String>) -> Self {
        self.nhg_index = Some(index.into());
        self
    }

    pub fn with_context_index(mut self, index: impl Into<String>) -> Self {
        self.context_index = Some(index.into());
        self
    }

    /// Returns true if the group belongs to the external group owner.
    pub fn is_externally_owned(&self) -> bool {
        self.nhg_index.is_some()
    }

    pub fn has_context(&self) -> bool {
        self.context_index.is_some()
    }

    /// Returns true if this is a blackhole/dropped route.
    pub fn is_blackhole(&self) -> bool {
        self.nhg_key.is_empty() && self.nhg_index.is_none()
    }
}

/// Routes of one VRF, indexed by prefix.
pub type RouteTable = BTreeMap<IpPrefix, RouteNhg>;

/// Route tables indexed by VRF ID.
pub type RouteTables = BTreeMap<VirtualRouterOid, RouteTable>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::nexthop::NextHopKey;
    use pretty_assertions::assert_eq;

    fn vrf() -> VirtualRouterOid {
        VirtualRouterOid::from_raw_unchecked(0x3000000000002)
    }

    #[test]
    fn test_route_key_default_route() {
        let key = RouteKey::new(vrf(), IpPrefix::DEFAULT_V4);
        assert!(key.is_default_route());

        let key = RouteKey::new(vrf(), "10.0.0.0/24".parse().unwrap());
        assert!(!key.is_default_route());
        assert_eq!(key.entry().destination, key.prefix);
        assert_eq!(key.to_string(), "10.0.0.0/24@0x0003000000000002");
    }

    #[test]
    fn test_route_nhg_basic() {
        let nhg = RouteNhg::default();
        assert!(nhg.is_blackhole());
        assert!(!nhg.is_externally_owned());
        assert!(!nhg.has_context());
    }

    #[test]
    fn test_route_nhg_with_index() {
        let nhg = RouteNhg::new(NextHopGroupKey::new()).with_nhg_index("nhg_1");
        assert!(nhg.is_externally_owned());
        assert!(!nhg.is_blackhole());
    }

    #[test]
    fn test_route_nhg_equality_detects_no_op() {
        let nh: NextHopKey = "10.0.0.1@Ethernet0".parse().unwrap();
        let a = RouteNhg::new(NextHopGroupKey::single(nh.clone()));
        let b = RouteNhg::new(NextHopGroupKey::single(nh));
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_context_index("ctx1"));
    }

    #[test]
    fn test_route_tables_lpm_is_last() {
        let mut tables = RouteTables::new();
        let table = tables.entry(vrf()).or_default();
        table.insert("10.0.0.0/8".parse().unwrap(), RouteNhg::default());
        table.insert("10.1.0.0/16".parse().unwrap(), RouteNhg::default());
        table.insert(IpPrefix::DEFAULT_V4, RouteNhg::default());

        let (longest, _) = table.iter().next_back().unwrap();
        assert_eq!(longest.to_string(), "10.1.0.0/16");
    }
}
