//! Collaborators RouteOrch consults but does not own.
//!
//! Router interfaces, VRFs and state publication are always present; the
//! external group owner, fine-grained ECMP, overlay endpoints and SRv6 are
//! optional capabilities attached with the `RouteCollaborators::with_*` builders.
//! The in-memory tables here back the binary and the tests.

use log::{debug, info};
use parking_lot::Mutex;
use sonic_orch_common::{FieldValue, SyncMapError};
use sonic_sai::{RawSaiObjectId, RouterInterfaceOid, SaiStatus, VirtualRouterOid, VirtualSwitch};
use sonic_types::{IpAddress, IpPrefix};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::nexthop::NextHopKey;
use super::nhg::NextHopGroupKey;

/// Router interfaces by alias.
pub trait InterfaceDirectory: Send + Sync {
    fn router_intf_id(&self, alias: &str) -> Option<RouterInterfaceOid>;

    /// Alias of the interface whose subnet contains `ip`.
    fn router_intf_alias(&self, ip: &IpAddress) -> Option<String>;

    /// Returns true if `prefix` is one of the subnets configured on `alias`.
    fn is_prefix_subnet(&self, prefix: &IpPrefix, alias: &str) -> bool;

    fn increase_router_intf_ref_count(&self, alias: &str) -> Result<u32, SyncMapError>;

    fn decrease_router_intf_ref_count(&self, alias: &str) -> Result<u32, SyncMapError>;
}

/// VRFs by name and handle.
pub trait VrfDirectory: Send + Sync {
    fn vrf_id(&self, name: &str) -> Option<VirtualRouterOid>;

    fn vrf_name(&self, id: VirtualRouterOid) -> Option<String>;

    fn is_l3_vni(&self, vni: u32) -> bool;

    fn increase_vrf_ref_count(&self, id: VirtualRouterOid) -> Result<u32, SyncMapError>;

    fn decrease_vrf_ref_count(&self, id: VirtualRouterOid) -> Result<u32, SyncMapError>;
}

/// Operational state sink.
pub trait StatePublisher: Send + Sync {
    /// Publishes the programming result of a request. Empty `fields`
    /// removes the entry.
    fn publish(&self, table: &str, key: &str, fields: &[FieldValue], status: SaiStatus, replace: bool);

    /// Writes a state table entry unconditionally.
    fn set_state(&self, table: &str, key: &str, fields: &[FieldValue]);
}

/// A group owned outside RouteOrch, referenced by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalGroup {
    pub key: NextHopGroupKey,
    pub id: RawSaiObjectId,
    /// Temporary groups are replaced later; routes using them stay queued.
    pub is_temp: bool,
}

/// Owner of next-hop groups referenced by `nexthop_group` index.
pub trait ExternalGroupOwner: Send + Sync {
    fn group(&self, index: &str) -> Option<ExternalGroup>;

    fn increase_ref_count(&self, index: &str);

    fn decrease_ref_count(&self, index: &str);

    /// Groups this owner holds in hardware; they count against the shared
    /// group maximum.
    fn synced_group_count(&self) -> usize;
}

/// Result of programming a fine-grained group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FineGrainedNextHop {
    pub next_hop_id: RawSaiObjectId,
    /// False when the route already pointed at the same fine-grained
    /// object and only its members changed.
    pub id_changed: bool,
}

/// Fine-grained ECMP groups that claim whole prefixes.
pub trait FineGrainedGroupProvider: Send + Sync {
    fn is_route_fine_grained(&self, vrf_id: VirtualRouterOid, prefix: &IpPrefix, nexthops: &NextHopGroupKey) -> bool;

    fn set_fine_grained_group(
        &self,
        vrf_id: VirtualRouterOid,
        prefix: &IpPrefix,
        nexthops: &NextHopGroupKey,
    ) -> Option<FineGrainedNextHop>;

    fn contains_fine_grained_group(&self, vrf_id: VirtualRouterOid, prefix: &IpPrefix) -> bool;

    fn remove_fine_grained_group(&self, vrf_id: VirtualRouterOid, prefix: &IpPrefix) -> bool;

    fn valid_next_hop(&self, _nexthop: &NextHopKey) -> bool {
        true
    }

    fn invalid_next_hop(&self, _nexthop: &NextHopKey) -> bool {
        true
    }
}

/// Remote VXLAN tunnel endpoints used by overlay next hops.
pub trait OverlayEndpointManager: Send + Sync {
    fn create_remote_vtep(&self, vrf_id: VirtualRouterOid, nexthop: &NextHopKey) -> bool;

    fn remove_remote_vtep(&self, vrf_id: VirtualRouterOid, nexthop: &NextHopKey) -> bool;
}

/// SRv6 next hops, VPN state and PIC contexts.
pub trait Srv6NextHopProvider: Send + Sync {
    /// Programs (or references) the SRv6 objects behind `nexthops`,
    /// returning the handle for a single next hop.
    fn srv6_next_hops(&self, nexthops: &NextHopGroupKey) -> Option<RawSaiObjectId>;

    fn remove_srv6_next_hops(&self, nexthops: &[NextHopGroupKey]) -> bool;

    fn context_exists(&self, context_index: &str) -> bool;

    fn agg_id_for_next_hops(&self, nexthops: &NextHopGroupKey) -> u32;

    fn agg_id_for_context(&self, context_index: &str) -> u32;

    fn increase_context_ref_count(&self, context_index: &str);

    fn decrease_context_ref_count(&self, context_index: &str);
}

/// Who provides the forwarding object of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOwner {
    FineGrained,
    External(String),
    Local,
}

#[derive(Debug, Default)]
struct InterfaceEntry {
    id: Option<RouterInterfaceOid>,
    subnets: Vec<IpPrefix>,
    ref_count: u32,
}

/// In-memory router interface table.
pub struct InterfaceTable {
    switch: Arc<VirtualSwitch>,
    interfaces: Mutex<BTreeMap<String, InterfaceEntry>>,
}

impl InterfaceTable {
    pub fn new(switch: Arc<VirtualSwitch>) -> Self {
        Self {
            switch,
            interfaces: Mutex::new(BTreeMap::new()),
        }
    }

    /// Creates a router interface with the given subnets.
    pub fn add_interface(&self, alias: &str, subnets: Vec<IpPrefix>) -> RouterInterfaceOid {
        let mut interfaces = self.interfaces.lock();
        let entry = interfaces.entry(alias.to_string()).or_default();
        entry.subnets = subnets;
        *entry.id.get_or_insert_with(|| {
            let id = self.switch.create_router_interface();
            info!("InterfaceTable: created router interface {} as {}", alias, id);
            id
        })
    }

    pub fn ref_count(&self, alias: &str) -> u32 {
        self.interfaces
            .lock()
            .get(alias)
            .map(|e| e.ref_count)
            .unwrap_or(0)
    }
}

impl InterfaceDirectory for InterfaceTable {
    fn router_intf_id(&self, alias: &str) -> Option<RouterInterfaceOid> {
        self.interfaces.lock().get(alias).and_then(|e| e.id)
    }

    fn router_intf_alias(&self, ip: &IpAddress) -> Option<String> {
        self.interfaces
            .lock()
            .iter()
            .find(|(_, e)| e.subnets.iter().any(|s| s.contains(ip)))
            .map(|(alias, _)| alias.clone())
    }

    fn is_prefix_subnet(&self, prefix: &IpPrefix, alias: &str) -> bool {
        self.interfaces
            .lock()
            .get(alias)
            .is_some_and(|e| e.subnets.iter().any(|s| s.network() == prefix.network()))
    }

    fn increase_router_intf_ref_count(&self, alias: &str) -> Result<u32, SyncMapError> {
        let mut interfaces = self.interfaces.lock();
        let entry = interfaces.get_mut(alias).ok_or(SyncMapError::KeyNotFound)?;
        entry.ref_count += 1;
        Ok(entry.ref_count)
    }

    fn decrease_router_intf_ref_count(&self, alias: &str) -> Result<u32, SyncMapError> {
        let mut interfaces = self.interfaces.lock();
        let entry = interfaces.get_mut(alias).ok_or(SyncMapError::KeyNotFound)?;
        entry.ref_count = entry
            .ref_count
            .checked_sub(1)
            .ok_or(SyncMapError::RefCountUnderflow)?;
        Ok(entry.ref_count)
    }
}

#[derive(Debug, Default)]
struct VrfState {
    by_name: BTreeMap<String, VirtualRouterOid>,
    ref_counts: BTreeMap<VirtualRouterOid, u32>,
    l3_vnis: BTreeSet<u32>,
}

/// In-memory VRF table.
pub struct VrfTable {
    switch: Arc<VirtualSwitch>,
    state: Mutex<VrfState>,
}

impl VrfTable {
    pub fn new(switch: Arc<VirtualSwitch>) -> Self {
        Self {
            switch,
            state: Mutex::new(VrfState::default()),
        }
    }

    pub fn add_vrf(&self, name: &str) -> VirtualRouterOid {
        let mut state = self.state.lock();
        if let Some(id) = state.by_name.get(name) {
            return *id;
        }
        let id = self.switch.create_virtual_router();
        info!("VrfTable: created VRF {} as {}", name, id);
        state.by_name.insert(name.to_string(), id);
        state.ref_counts.insert(id, 0);
        id
    }

    /// Removes an unreferenced VRF.
    pub fn remove_vrf(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let Some(id) = state.by_name.get(name).copied() else {
            return false;
        };
        if state.ref_counts.get(&id).copied().unwrap_or(0) > 0 {
            debug!("VrfTable: VRF {} still referenced", name);
            return false;
        }
        state.by_name.remove(name);
        state.ref_counts.remove(&id);
        true
    }

    pub fn add_l3_vni(&self, vni: u32) {
        self.state.lock().l3_vnis.insert(vni);
    }

    pub fn ref_count(&self, id: VirtualRouterOid) -> u32 {
        self.state.lock().ref_counts.get(&id).copied().unwrap_or(0)
    }

    /// Handles of every VRF, in name order.
    pub fn vrf_ids(&self) -> Vec<VirtualRouterOid> {
        self.state.lock().by_name.values().copied().collect()
    }
}

impl VrfDirectory for VrfTable {
    fn vrf_id(&self, name: &str) -> Option<VirtualRouterOid> {
        self.state.lock().by_name.get(name).copied()
    }

    fn vrf_name(&self, id: VirtualRouterOid) -> Option<String> {
        self.state
            .lock()
            .by_name
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(name, _)| name.clone())
    }

    fn is_l3_vni(&self, vni: u32) -> bool {
        self.state.lock().l3_vnis.contains(&vni)
    }

    fn increase_vrf_ref_count(&self, id: VirtualRouterOid) -> Result<u32, SyncMapError> {
        let mut state = self.state.lock();
        let count = state.ref_counts.get_mut(&id).ok_or(SyncMapError::KeyNotFound)?;
        *count += 1;
        Ok(*count)
    }

    fn decrease_vrf_ref_count(&self, id: VirtualRouterOid) -> Result<u32, SyncMapError> {
        let mut state = self.state.lock();
        let count = state.ref_counts.get_mut(&id).ok_or(SyncMapError::KeyNotFound)?;
        *count = count.checked_sub(1).ok_or(SyncMapError::RefCountUnderflow)?;
        Ok(*count)
    }
}

#[derive(Debug, Default)]
struct StateTablesInner {
    entries: BTreeMap<(String, String), Vec<FieldValue>>,
    publish_count: usize,
}

/// In-memory state tables.
#[derive(Default)]
pub struct StateTables {
    inner: Mutex<StateTablesInner>,
}

impl StateTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str, key: &str) -> Option<Vec<FieldValue>> {
        self.inner
            .lock()
            .entries
            .get(&(table.to_string(), key.to_string()))
            .cloned()
    }

    pub fn field(&self, table: &str, key: &str, field: &str) -> Option<String> {
        self.get(table, key)?
            .into_iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    /// Number of `publish` calls seen, successful or not.
    pub fn publish_count(&self) -> usize {
        self.inner.lock().publish_count
    }

    pub fn keys(&self, table: &str) -> Vec<String> {
        self.inner
            .lock()
            .entries
            .keys()
            .filter(|(t, _)| t == table)
            .map(|(_, k)| k.clone())
            .collect()
    }
}

impl StatePublisher for StateTables {
    fn publish(&self, table: &str, key: &str, fields: &[FieldValue], status: SaiStatus, replace: bool) {
        let mut inner = self.inner.lock();
        inner.publish_count += 1;
        if !status.is_success() {
            return;
        }
        let id = (table.to_string(), key.to_string());
        if fields.is_empty() {
            inner.entries.remove(&id);
            return;
        }
        let entry = inner.entries.entry(id).or_default();
        if replace {
            entry.clear();
        }
        for (field, value) in fields {
            match entry.iter_mut().find(|(f, _)| f == field) {
                Some(existing) => existing.1 = value.clone(),
                None => entry.push((field.clone(), value.clone())),
            }
        }
    }

    fn set_state(&self, table: &str, key: &str, fields: &[FieldValue]) {
        self.inner
            .lock()
            .entries
            .insert((table.to_string(), key.to_string()), fields.to_vec());
    }
}
