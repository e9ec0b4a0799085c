//! Next-hop group types and the group table.
//!
//! Group entries live in a [`SyncMap`], so reference counts can only move
//! on groups that exist. A missing key is an error, never a fresh entry.

use sonic_orch_common::{HasRefCount, SyncMap, SyncMapError};
use sonic_sai::{NextHopGroupMemberOid, NextHopGroupOid};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

use super::nexthop::NextHopKey;

/// A key identifying a next-hop group (set of weighted next-hops).
///
/// Two keys are equal when they hold the same next-hops with the same
/// weights and the same overlay/SRv6 flags. Size 0 is a blackhole, size 1
/// a plain next-hop, and only larger keys get a group object.
#[derive(Debug, Clone, Default)]
pub struct NextHopGroupKey {
    nexthops: BTreeSet<NextHopKey>,
    overlay: bool,
    srv6: bool,
    srv6_vpn: bool,
}

impl NextHopGroupKey {
    /// Creates a new empty next-hop group key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a next-hop group key from a single next-hop.
    pub fn single(nexthop: NextHopKey) -> Self {
        Self::from_nexthops([nexthop])
    }

    /// Creates a next-hop group key from multiple next-hops.
    pub fn from_nexthops(nexthops: impl IntoIterator<Item = NextHopKey>) -> Self {
        Self {
            nexthops: nexthops.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Creates an overlay group key (VxLAN next-hops).
    pub fn overlay(nexthops: impl IntoIterator<Item = NextHopKey>) -> Self {
        Self {
            overlay: true,
            ..Self::from_nexthops(nexthops)
        }
    }

    /// Creates an SRv6 group key. The VPN flag is set when any member
    /// carries a VPN SID.
    pub fn srv6(nexthops: impl IntoIterator<Item = NextHopKey>) -> Self {
        let mut key = Self::from_nexthops(nexthops);
        key.srv6 = true;
        key.srv6_vpn = key.nexthops.iter().any(|nh| !nh.srv6_vpn_sid().is_empty());
        key
    }

    /// Adds a next-hop to the group.
    pub fn add(&mut self, nexthop: NextHopKey) {
        self.nexthops.insert(nexthop);
    }

    /// Removes a next-hop from the group.
    pub fn remove(&mut self, nexthop: &NextHopKey) -> bool {
        self.nexthops.remove(nexthop)
    }

    /// Returns true if the group contains the given next-hop.
    pub fn contains(&self, nexthop: &NextHopKey) -> bool {
        self.nexthops.contains(nexthop)
    }

    pub fn len(&self) -> usize {
        self.nexthops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nexthops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NextHopKey> {
        self.nexthops.iter()
    }

    pub fn nexthops(&self) -> &BTreeSet<NextHopKey> {
        &self.nexthops
    }

    /// The first next-hop in key order. For a size-1 key, its only member.
    pub fn first(&self) -> Option<&NextHopKey> {
        self.nexthops.iter().next()
    }

    /// Returns true if this is an ECMP group (more than one next-hop).
    pub fn is_ecmp(&self) -> bool {
        self.nexthops.len() > 1
    }

    pub fn is_overlay(&self) -> bool {
        self.overlay
    }

    pub fn is_srv6(&self) -> bool {
        self.srv6
    }

    pub fn is_srv6_vpn(&self) -> bool {
        self.srv6_vpn
    }

    /// Returns true if any next-hop is an interface-only next-hop.
    pub fn has_intf_next_hop(&self) -> bool {
        self.nexthops.iter().any(NextHopKey::is_interface_nexthop)
    }

    fn weighted(&self) -> impl Iterator<Item = (&NextHopKey, u32)> {
        self.nexthops.iter().map(|nh| (nh, nh.weight()))
    }
}

impl PartialEq for NextHopGroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NextHopGroupKey {}

impl PartialOrd for NextHopGroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NextHopGroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weighted()
            .cmp(other.weighted())
            .then_with(|| self.overlay.cmp(&other.overlay))
            .then_with(|| self.srv6.cmp(&other.srv6))
            .then_with(|| self.srv6_vpn.cmp(&other.srv6_vpn))
    }
}

impl Hash for NextHopGroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (nh, weight) in self.weighted() {
            nh.hash(state);
            weight.hash(state);
        }
        self.overlay.hash(state);
        self.srv6.hash(state);
        self.srv6_vpn.hash(state);
    }
}

impl fmt::Display for NextHopGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nexthops: Vec<_> = self.nexthops.iter().map(|nh| nh.to_string()).collect();
        write!(f, "{}", nexthops.join(","))
    }
}

/// Error when parsing a NextHopGroupKey.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid next-hop group key: {message}")]
pub struct ParseNextHopGroupKeyError {
    pub message: String,
}

impl FromStr for NextHopGroupKey {
    type Err = ParseNextHopGroupKeyError;

    /// Parses a next-hop group key from a comma-separated string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::new());
        }

        let nexthops = s
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<NextHopKey>()
                    .map_err(|e| ParseNextHopGroupKeyError {
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if nexthops.iter().all(NextHopKey::is_srv6) {
            Ok(Self::srv6(nexthops))
        } else if nexthops.iter().all(NextHopKey::is_overlay) {
            Ok(Self::overlay(nexthops))
        } else {
            Ok(Self::from_nexthops(nexthops))
        }
    }
}

/// Entry for a next-hop group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHopGroupMemberEntry {
    pub member_id: NextHopGroupMemberOid,
    /// Sequence ID for ordered ECMP (0 when unordered).
    pub seq_id: u32,
}

impl NextHopGroupMemberEntry {
    pub fn new(member_id: NextHopGroupMemberOid, seq_id: u32) -> Self {
        Self { member_id, seq_id }
    }
}

/// A programmed next-hop group.
///
/// `members` holds every logical member; a member whose next-hop is down
/// keeps its entry with a null member id. `installed_member_count` is the
/// number of members currently programmed in hardware.
#[derive(Debug, Clone)]
pub struct NextHopGroupEntry {
    id: NextHopGroupOid,
    ref_count: u32,
    members: BTreeMap<NextHopKey, NextHopGroupMemberEntry>,
    default_route_members: BTreeMap<NextHopKey, NextHopGroupMemberEntry>,
    installed_member_count: u32,
    eligible_for_default_route_swap: bool,
    default_route_swapped: bool,
}

impl NextHopGroupEntry {
    /// Reference count starts at 0; routes increment it after install.
    pub fn new(id: NextHopGroupOid) -> Self {
        Self {
            id,
            ref_count: 0,
            members: BTreeMap::new(),
            default_route_members: BTreeMap::new(),
            installed_member_count: 0,
            eligible_for_default_route_swap: false,
            default_route_swapped: false,
        }
    }

    pub fn id(&self) -> NextHopGroupOid {
        self.id
    }

    pub fn members(&self) -> &BTreeMap<NextHopKey, NextHopGroupMemberEntry> {
        &self.members
    }

    pub fn members_mut(&mut self) -> &mut BTreeMap<NextHopKey, NextHopGroupMemberEntry> {
        &mut self.members
    }

    pub fn default_route_members(&self) -> &BTreeMap<NextHopKey, NextHopGroupMemberEntry> {
        &self.default_route_members
    }

    pub fn default_route_members_mut(
        &mut self,
    ) -> &mut BTreeMap<NextHopKey, NextHopGroupMemberEntry> {
        &mut self.default_route_members
    }

    pub fn installed_member_count(&self) -> u32 {
        self.installed_member_count
    }

    pub fn member_installed(&mut self) {
        self.installed_member_count += 1;
    }

    pub fn member_uninstalled(&mut self) {
        self.installed_member_count = self.installed_member_count.saturating_sub(1);
    }

    pub fn set_installed_member_count(&mut self, count: u32) {
        self.installed_member_count = count;
    }

    pub fn is_eligible_for_default_route_swap(&self) -> bool {
        self.eligible_for_default_route_swap
    }

    pub fn set_eligible_for_default_route_swap(&mut self, eligible: bool) {
        self.eligible_for_default_route_swap = eligible;
    }

    /// True once members were swapped to the default route next-hops.
    /// There is no way back short of retiring the group.
    pub fn is_default_route_swapped(&self) -> bool {
        self.default_route_swapped
    }

    pub fn mark_default_route_swapped(&mut self) {
        self.default_route_swapped = true;
    }
}

impl HasRefCount for NextHopGroupEntry {
    fn increment_ref(&mut self) -> u32 {
        self.ref_count += 1;
        self.ref_count
    }

    fn decrement_ref(&mut self) -> Option<u32> {
        self.ref_count = self.ref_count.checked_sub(1)?;
        Some(self.ref_count)
    }

    fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

/// Next-hop groups owned by this engine, with the capacity gate.
#[derive(Debug, Clone)]
pub struct NextHopGroupTable {
    groups: SyncMap<NextHopGroupKey, NextHopGroupEntry>,
    max_count: usize,
}

impl NextHopGroupTable {
    pub fn new(max_count: usize) -> Self {
        Self {
            groups: SyncMap::new(),
            max_count,
        }
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Number of groups currently programmed by this table.
    pub fn count(&self) -> usize {
        self.groups.len()
    }

    /// Returns true if no further group fits, counting groups owned
    /// elsewhere.
    pub fn is_full(&self, external_count: usize) -> bool {
        self.count() + external_count >= self.max_count
    }

    pub fn contains(&self, key: &NextHopGroupKey) -> bool {
        self.groups.contains_key(key)
    }

    pub fn get(&self, key: &NextHopGroupKey) -> Option<&NextHopGroupEntry> {
        self.groups.get(key)
    }

    pub fn get_mut(&mut self, key: &NextHopGroupKey) -> Option<&mut NextHopGroupEntry> {
        self.groups.get_mut(key)
    }

    pub fn insert(&mut self, key: NextHopGroupKey, entry: NextHopGroupEntry) {
        self.groups.insert(key, entry);
    }

    pub fn remove(&mut self, key: &NextHopGroupKey) -> Option<NextHopGroupEntry> {
        self.groups.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NextHopGroupKey, &NextHopGroupEntry)> {
        self.groups.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&NextHopGroupKey, &mut NextHopGroupEntry)> {
        self.groups.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &NextHopGroupKey> {
        self.groups.keys()
    }

    pub fn increment_ref(&mut self, key: &NextHopGroupKey) -> Result<u32, SyncMapError> {
        self.groups.increment_ref(key)
    }

    pub fn decrement_ref(&mut self, key: &NextHopGroupKey) -> Result<u32, SyncMapError> {
        self.groups.decrement_ref(key)
    }

    pub fn ref_count(&self, key: &NextHopGroupKey) -> Option<u32> {
        self.groups.ref_count(key)
    }
}
