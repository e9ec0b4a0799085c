//! Route entry API.
//!
//! Route entries are keyed objects (VRF + destination prefix) rather than
//! objects with an id, so every call is bulk and reports one status per
//! entry in request order.

use crate::error::SaiStatus;
use crate::types::{RawSaiObjectId, VirtualRouterOid};
use async_trait::async_trait;
use sonic_types::IpPrefix;
use std::fmt;

/// Route entry representing a destination prefix and VRF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteEntry {
    /// Virtual router (VRF) this route belongs to
    pub vr_id: VirtualRouterOid,
    /// Destination IP prefix
    pub destination: IpPrefix,
}

impl RouteEntry {
    pub fn new(vr_id: VirtualRouterOid, destination: IpPrefix) -> Self {
        Self { vr_id, destination }
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.destination, self.vr_id)
    }
}

/// Packet action of a route entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PacketAction {
    Drop,
    #[default]
    Forward,
    Trap,
}

/// Route entry attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteAttribute {
    PacketAction(PacketAction),
    /// Next hop, next-hop group, router interface or CPU port id.
    /// Null means no next hop.
    NextHopId(RawSaiObjectId),
    /// Prefix aggregation id used by SRv6 PIC contexts. Zero clears it.
    PrefixAggId(u32),
}

/// SAI route API.
#[async_trait]
pub trait RouteApi: Send + Sync {
    /// Creates route entries, one status per entry.
    async fn create_route_entries(
        &self,
        entries: &[(RouteEntry, Vec<RouteAttribute>)],
    ) -> Vec<SaiStatus>;

    /// Removes route entries, one status per entry.
    async fn remove_route_entries(&self, entries: &[RouteEntry]) -> Vec<SaiStatus>;

    /// Sets one attribute per listed entry, one status per entry.
    async fn set_route_entries_attribute(
        &self,
        entries: &[(RouteEntry, RouteAttribute)],
    ) -> Vec<SaiStatus>;

    async fn create_route_entry(
        &self,
        entry: &RouteEntry,
        attrs: Vec<RouteAttribute>,
    ) -> SaiStatus {
        self.create_route_entries(&[(*entry, attrs)])
            .await
            .into_iter()
            .next()
            .unwrap_or(SaiStatus::Failure)
    }

    async fn remove_route_entry(&self, entry: &RouteEntry) -> SaiStatus {
        self.remove_route_entries(&[*entry])
            .await
            .into_iter()
            .next()
            .unwrap_or(SaiStatus::Failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_route_entry_ordering_follows_vrf_then_prefix() {
        let vrf1 = VirtualRouterOid::from_raw_unchecked(1);
        let vrf2 = VirtualRouterOid::from_raw_unchecked(2);
        let wide: IpPrefix = "10.0.0.0/8".parse().unwrap();
        let narrow: IpPrefix = "10.1.0.0/16".parse().unwrap();

        let mut entries = vec![
            RouteEntry::new(vrf2, wide),
            RouteEntry::new(vrf1, narrow),
            RouteEntry::new(vrf1, wide),
        ];
        entries.sort();
        assert_eq!(
            entries,
            vec![
                RouteEntry::new(vrf1, wide),
                RouteEntry::new(vrf1, narrow),
                RouteEntry::new(vrf2, wide),
            ]
        );
    }

    #[test]
    fn test_default_packet_action_is_forward() {
        assert_eq!(PacketAction::default(), PacketAction::Forward);
    }
}
