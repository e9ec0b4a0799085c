//! Next-hop registry and the next-hop to route reverse index.
//!
//! The registry is owned by the neighbor side of the daemon; RouteOrch only
//! reads handles and moves reference counts through it. [`NeighborTable`] is
//! the in-memory implementation used by the binary and the tests.

use log::{debug, info, warn};
use parking_lot::Mutex;
use sonic_orch_common::{HasRefCount, SyncMap, SyncMapError};
use sonic_sai::{NextHopOid, VirtualSwitch};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::nexthop::{NextHopFlags, NextHopKey};
use super::types::RouteKey;

/// Resolved next hops with hardware handles and reference counts.
pub trait NextHopRegistry: Send + Sync {
    fn has_next_hop(&self, nexthop: &NextHopKey) -> bool;

    fn next_hop_id(&self, nexthop: &NextHopKey) -> Option<NextHopOid>;

    fn is_next_hop_flag_set(&self, nexthop: &NextHopKey, flag: NextHopFlags) -> bool;

    /// Returns true if the plain IP neighbor behind `nexthop` is resolved,
    /// ignoring any label stack.
    fn is_neighbor_resolved(&self, nexthop: &NextHopKey) -> bool;

    /// Requests resolution of a neighbor. Never blocks.
    fn resolve_neighbor(&self, nexthop: &NextHopKey);

    /// Creates a labeled next hop on top of its resolved IP neighbor.
    fn add_mpls_next_hop(&self, nexthop: &NextHopKey) -> bool;

    fn remove_mpls_next_hop(&self, nexthop: &NextHopKey) -> bool;

    fn add_tunnel_next_hop(&self, nexthop: &NextHopKey) -> Option<NextHopOid>;

    fn remove_tunnel_next_hop(&self, nexthop: &NextHopKey) -> bool;

    fn increase_next_hop_ref_count(&self, nexthop: &NextHopKey) -> Result<u32, SyncMapError>;

    fn decrease_next_hop_ref_count(&self, nexthop: &NextHopKey) -> Result<u32, SyncMapError>;

    /// Returns 0 for unknown next hops.
    fn next_hop_ref_count(&self, nexthop: &NextHopKey) -> u32;
}

/// A resolved next hop.
#[derive(Debug, Clone)]
pub struct NeighborEntry {
    id: NextHopOid,
    ref_count: u32,
    flags: NextHopFlags,
}

impl NeighborEntry {
    pub fn new(id: NextHopOid, flags: NextHopFlags) -> Self {
        Self {
            id,
            ref_count: 0,
            flags,
        }
    }

    pub fn id(&self) -> NextHopOid {
        self.id
    }

    pub fn flags(&self) -> NextHopFlags {
        self.flags
    }
}

impl HasRefCount for NeighborEntry {
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

#[derive(Debug, Default)]
struct NeighborState {
    next_hops: SyncMap<NextHopKey, NeighborEntry>,
    resolve_requests: BTreeSet<NextHopKey>,
}

/// In-memory next-hop registry that mints handles from a [`VirtualSwitch`].
pub struct NeighborTable {
    switch: Arc<VirtualSwitch>,
    state: Mutex<NeighborState>,
}

impl NeighborTable {
    pub fn new(switch: Arc<VirtualSwitch>) -> Self {
        Self {
            switch,
            state: Mutex::new(NeighborState::default()),
        }
    }

    /// Resolves a neighbor, returning its handle. Re-adding a known next
    /// hop returns the existing handle.
    pub fn add_neighbor(&self, nexthop: NextHopKey) -> NextHopOid {
        let mut state = self.state.lock();
        state.resolve_requests.remove(&nexthop);
        if let Some(entry) = state.next_hops.get(&nexthop) {
            return entry.id();
        }
        let id = self.switch.create_next_hop();
        info!("NeighborTable: added next hop {} as {}", nexthop, id);
        state
            .next_hops
            .insert(nexthop, NeighborEntry::new(id, NextHopFlags::NONE));
        id
    }

    /// Removes a neighbor that nothing references any more.
    pub fn remove_neighbor(&self, nexthop: &NextHopKey) -> bool {
        let mut state = self.state.lock();
        match state.next_hops.ref_count(nexthop) {
            Some(0) => {
                state.next_hops.remove(nexthop);
                info!("NeighborTable: removed next hop {}", nexthop);
                true
            }
            Some(refs) => {
                warn!(
                    "NeighborTable: next hop {} still has {} references",
                    nexthop, refs
                );
                false
            }
            None => false,
        }
    }

    /// Flags or clears the interface-down state of a next hop.
    pub fn set_if_down(&self, nexthop: &NextHopKey, down: bool) -> bool {
        let mut state = self.state.lock();
        match state.next_hops.get_mut(nexthop) {
            Some(entry) => {
                entry.flags.set_if_down(down);
                debug!("NeighborTable: next hop {} if_down={}", nexthop, down);
                true
            }
            None => false,
        }
    }

    /// Gives a next hop a fresh handle, as happens when a neighbor moves.
    pub fn replace_next_hop_id(&self, nexthop: &NextHopKey) -> Option<NextHopOid> {
        let mut state = self.state.lock();
        let entry = state.next_hops.get_mut(nexthop)?;
        entry.id = self.switch.create_next_hop();
        Some(entry.id)
    }

    /// Next hops that were asked for but are not resolved.
    pub fn resolve_requests(&self) -> Vec<NextHopKey> {
        self.state.lock().resolve_requests.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().next_hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NextHopRegistry for NeighborTable {
    fn has_next_hop(&self, nexthop: &NextHopKey) -> bool {
        self.state.lock().next_hops.contains_key(nexthop)
    }

    fn next_hop_id(&self, nexthop: &NextHopKey) -> Option<NextHopOid> {
        self.state.lock().next_hops.get(nexthop).map(NeighborEntry::id)
    }

    fn is_next_hop_flag_set(&self, nexthop: &NextHopKey, flag: NextHopFlags) -> bool {
        self.state
            .lock()
            .next_hops
            .get(nexthop)
            .is_some_and(|e| e.flags().contains(flag))
    }

    fn is_neighbor_resolved(&self, nexthop: &NextHopKey) -> bool {
        self.state
            .lock()
            .next_hops
            .contains_key(&nexthop.without_labels())
    }

    fn resolve_neighbor(&self, nexthop: &NextHopKey) {
        let mut state = self.state.lock();
        if state.resolve_requests.insert(nexthop.clone()) {
            debug!("NeighborTable: resolve requested for {}", nexthop);
        }
    }

    fn add_mpls_next_hop(&self, nexthop: &NextHopKey) -> bool {
        let mut state = self.state.lock();
        if state.next_hops.contains_key(nexthop) {
            return true;
        }
        let base_flags = match state.next_hops.get(&nexthop.without_labels()) {
            Some(base) => base.flags(),
            None => return false,
        };
        let mut flags = NextHopFlags::LABEL;
        if base_flags.is_if_down() {
            flags |= NextHopFlags::IF_DOWN;
        }
        let id = self.switch.create_next_hop();
        debug!("NeighborTable: added labeled next hop {} as {}", nexthop, id);
        state
            .next_hops
            .insert(nexthop.clone(), NeighborEntry::new(id, flags));
        true
    }

    fn remove_mpls_next_hop(&self, nexthop: &NextHopKey) -> bool {
        let mut state = self.state.lock();
        match state.next_hops.get(nexthop) {
            Some(entry) if entry.flags.is_label() && entry.ref_count == 0 => {
                state.next_hops.remove(nexthop);
                debug!("NeighborTable: removed labeled next hop {}", nexthop);
                true
            }
            _ => false,
        }
    }

    fn add_tunnel_next_hop(&self, nexthop: &NextHopKey) -> Option<NextHopOid> {
        let mut state = self.state.lock();
        if let Some(entry) = state.next_hops.get(nexthop) {
            return Some(entry.id());
        }
        let id = self.switch.create_next_hop();
        debug!("NeighborTable: added tunnel next hop {} as {}", nexthop, id);
        state.next_hops.insert(
            nexthop.clone(),
            NeighborEntry::new(id, NextHopFlags::VXLAN_TUNNEL),
        );
        Some(id)
    }

    fn remove_tunnel_next_hop(&self, nexthop: &NextHopKey) -> bool {
        let mut state = self.state.lock();
        match state.next_hops.get(nexthop) {
            Some(entry) if entry.flags.is_vxlan_tunnel() && entry.ref_count == 0 => {
                state.next_hops.remove(nexthop);
                debug!("NeighborTable: removed tunnel next hop {}", nexthop);
                true
            }
            _ => false,
        }
    }

    fn increase_next_hop_ref_count(&self, nexthop: &NextHopKey) -> Result<u32, SyncMapError> {
        self.state.lock().next_hops.increment_ref(nexthop)
    }

    fn decrease_next_hop_ref_count(&self, nexthop: &NextHopKey) -> Result<u32, SyncMapError> {
        self.state.lock().next_hops.decrement_ref(nexthop)
    }

    fn next_hop_ref_count(&self, nexthop: &NextHopKey) -> u32 {
        self.state
            .lock()
            .next_hops
            .ref_count(nexthop)
            .unwrap_or(0)
    }
}

/// Routes pointing at exactly one next hop, indexed by that next hop.
///
/// Used to re-point those routes when a next hop's handle changes.
#[derive(Debug, Clone, Default)]
pub struct RoutesByNextHop {
    inner: BTreeMap<NextHopKey, BTreeSet<RouteKey>>,
}

impl RoutesByNextHop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, nexthop: NextHopKey, route: RouteKey) {
        self.inner.entry(nexthop).or_default().insert(route);
    }

    /// Removes one route. The next hop disappears with its last route.
    pub fn remove(&mut self, nexthop: &NextHopKey, route: &RouteKey) -> bool {
        let Some(routes) = self.inner.get_mut(nexthop) else {
            return false;
        };
        let removed = routes.remove(route);
        if routes.is_empty() {
            self.inner.remove(nexthop);
        }
        removed
    }

    pub fn routes(&self, nexthop: &NextHopKey) -> impl Iterator<Item = &RouteKey> {
        self.inner.get(nexthop).into_iter().flatten()
    }

    pub fn contains(&self, nexthop: &NextHopKey, route: &RouteKey) -> bool {
        self.inner.get(nexthop).is_some_and(|r| r.contains(route))
    }

    /// Number of next hops with at least one route.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
