//! In-memory switch implementing the route and next-hop group APIs.
//!
//! Keeps enough object state to reject what a real ASIC rejects (duplicate
//! routes, removing a group that still has members or is referenced by a
//! route, members of unknown groups) and counts every operation so callers
//! can assert on hardware churn. Failures can be injected per operation
//! kind; each injected status is consumed by the next matching entry.

use crate::api::{
    NextHopGroupApi, NextHopGroupMemberAttrs, NextHopGroupType, PacketAction, RouteApi,
    RouteAttribute, RouteEntry,
};
use crate::error::{SaiError, SaiResult, SaiStatus};
use crate::types::{
    NextHopGroupKind, NextHopGroupMemberKind, NextHopGroupMemberOid, NextHopGroupOid, NextHopKind,
    NextHopOid, PortKind, PortOid, RawSaiObjectId, RouterInterfaceKind, RouterInterfaceOid,
    SaiObjectKind, SwitchKind, SwitchOid, VirtualRouterKind, VirtualRouterOid, NULL_OBJECT_ID,
};
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Operation kinds that can be counted and fault-injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaiOp {
    CreateRoute,
    RemoveRoute,
    SetRoute,
    CreateNextHopGroup,
    RemoveNextHopGroup,
    CreateNextHopGroupMember,
    RemoveNextHopGroupMember,
}

/// Programmed state of a route entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteState {
    pub packet_action: PacketAction,
    pub next_hop: RawSaiObjectId,
    pub prefix_agg_id: u32,
}

impl Default for RouteState {
    fn default() -> Self {
        Self {
            packet_action: PacketAction::Forward,
            next_hop: NULL_OBJECT_ID,
            prefix_agg_id: 0,
        }
    }
}

/// Programmed state of a next-hop group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberState {
    pub group: NextHopGroupOid,
    pub next_hop: NextHopOid,
    pub weight: Option<u32>,
    pub sequence_id: Option<u32>,
}

#[derive(Debug)]
struct GroupState {
    group_type: NextHopGroupType,
    members: BTreeSet<NextHopGroupMemberOid>,
}

#[derive(Debug, Default)]
struct SwitchState {
    next_id: u64,
    routes: BTreeMap<RouteEntry, RouteState>,
    groups: BTreeMap<NextHopGroupOid, GroupState>,
    members: BTreeMap<NextHopGroupMemberOid, MemberState>,
    faults: HashMap<SaiOp, VecDeque<SaiStatus>>,
    counters: HashMap<SaiOp, u64>,
}

impl SwitchState {
    fn mint<T: SaiObjectKind>(&mut self) -> RawSaiObjectId {
        self.next_id += 1;
        (u64::from(T::type_tag()) << 48) | self.next_id
    }

    /// Counts the operation and returns an injected status, if any.
    fn begin(&mut self, op: SaiOp) -> Option<SaiStatus> {
        *self.counters.entry(op).or_default() += 1;
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn is_referenced_by_route(&self, raw: RawSaiObjectId) -> bool {
        self.routes.values().any(|r| r.next_hop == raw)
    }
}

/// In-memory SAI switch.
#[derive(Debug)]
pub struct VirtualSwitch {
    switch_id: SwitchOid,
    default_vrf: VirtualRouterOid,
    cpu_port: PortOid,
    state: Mutex<SwitchState>,
}

impl Default for VirtualSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualSwitch {
    pub fn new() -> Self {
        let mut state = SwitchState::default();
        let switch_id = SwitchOid::from_raw_unchecked(state.mint::<SwitchKind>());
        let default_vrf = VirtualRouterOid::from_raw_unchecked(state.mint::<VirtualRouterKind>());
        let cpu_port = PortOid::from_raw_unchecked(state.mint::<PortKind>());
        Self {
            switch_id,
            default_vrf,
            cpu_port,
            state: Mutex::new(state),
        }
    }

    pub fn switch_id(&self) -> SwitchOid {
        self.switch_id
    }

    pub fn default_virtual_router(&self) -> VirtualRouterOid {
        self.default_vrf
    }

    pub fn cpu_port(&self) -> PortOid {
        self.cpu_port
    }

    pub fn create_virtual_router(&self) -> VirtualRouterOid {
        VirtualRouterOid::from_raw_unchecked(self.state.lock().mint::<VirtualRouterKind>())
    }

    pub fn create_router_interface(&self) -> RouterInterfaceOid {
        RouterInterfaceOid::from_raw_unchecked(self.state.lock().mint::<RouterInterfaceKind>())
    }

    pub fn create_next_hop(&self) -> NextHopOid {
        NextHopOid::from_raw_unchecked(self.state.lock().mint::<NextHopKind>())
    }

    /// Queues a status returned by the next entry of the given operation.
    pub fn inject_failure(&self, op: SaiOp, status: SaiStatus) {
        self.state
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(status);
    }

    /// Number of entries attempted for the operation kind.
    pub fn op_count(&self, op: SaiOp) -> u64 {
        self.state.lock().counters.get(&op).copied().unwrap_or(0)
    }

    pub fn reset_op_counts(&self) {
        self.state.lock().counters.clear();
    }

    /// Total entries attempted across all operation kinds.
    pub fn total_op_count(&self) -> u64 {
        self.state.lock().counters.values().sum()
    }

    pub fn route(&self, entry: &RouteEntry) -> Option<RouteState> {
        self.state.lock().routes.get(entry).copied()
    }

    pub fn has_route(&self, entry: &RouteEntry) -> bool {
        self.state.lock().routes.contains_key(entry)
    }

    pub fn route_count(&self) -> usize {
        self.state.lock().routes.len()
    }

    pub fn next_hop_group_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    pub fn has_next_hop_group(&self, group: NextHopGroupOid) -> bool {
        self.state.lock().groups.contains_key(&group)
    }

    pub fn next_hop_group_type(&self, group: NextHopGroupOid) -> Option<NextHopGroupType> {
        self.state.lock().groups.get(&group).map(|g| g.group_type)
    }

    /// Members of a group in creation order.
    pub fn next_hop_group_members(&self, group: NextHopGroupOid) -> Vec<MemberState> {
        let state = self.state.lock();
        state
            .groups
            .get(&group)
            .map(|g| {
                g.members
                    .iter()
                    .filter_map(|m| state.members.get(m).copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn next_hop_group_member_count(&self) -> usize {
        self.state.lock().members.len()
    }
}

fn apply_route_attribute(route: &mut RouteState, attr: &RouteAttribute) {
    match attr {
        RouteAttribute::PacketAction(action) => route.packet_action = *action,
        RouteAttribute::NextHopId(id) => route.next_hop = *id,
        RouteAttribute::PrefixAggId(id) => route.prefix_agg_id = *id,
    }
}

#[async_trait]
impl RouteApi for VirtualSwitch {
    async fn create_route_entries(
        &self,
        entries: &[(RouteEntry, Vec<RouteAttribute>)],
    ) -> Vec<SaiStatus> {
        let mut state = self.state.lock();
        entries
            .iter()
            .map(|(entry, attrs)| {
                if let Some(status) = state.begin(SaiOp::CreateRoute) {
                    return status;
                }
                if state.routes.contains_key(entry) {
                    return SaiStatus::ItemAlreadyExists;
                }
                let mut route = RouteState::default();
                for attr in attrs {
                    apply_route_attribute(&mut route, attr);
                }
                debug!("VirtualSwitch: created route {} {:?}", entry, route);
                state.routes.insert(*entry, route);
                SaiStatus::Success
            })
            .collect()
    }

    async fn remove_route_entries(&self, entries: &[RouteEntry]) -> Vec<SaiStatus> {
        let mut state = self.state.lock();
        entries
            .iter()
            .map(|entry| {
                if let Some(status) = state.begin(SaiOp::RemoveRoute) {
                    return status;
                }
                match state.routes.remove(entry) {
                    Some(_) => {
                        debug!("VirtualSwitch: removed route {}", entry);
                        SaiStatus::Success
                    }
                    None => SaiStatus::ItemNotFound,
                }
            })
            .collect()
    }

    async fn set_route_entries_attribute(
        &self,
        entries: &[(RouteEntry, RouteAttribute)],
    ) -> Vec<SaiStatus> {
        let mut state = self.state.lock();
        entries
            .iter()
            .map(|(entry, attr)| {
                if let Some(status) = state.begin(SaiOp::SetRoute) {
                    return status;
                }
                match state.routes.get_mut(entry) {
                    Some(route) => {
                        apply_route_attribute(route, attr);
                        SaiStatus::Success
                    }
                    None => SaiStatus::ItemNotFound,
                }
            })
            .collect()
    }
}

#[async_trait]
impl NextHopGroupApi for VirtualSwitch {
    async fn create_next_hop_group(
        &self,
        group_type: NextHopGroupType,
    ) -> SaiResult<NextHopGroupOid> {
        let mut state = self.state.lock();
        if let Some(status) = state.begin(SaiOp::CreateNextHopGroup) {
            return Err(SaiError::from_status(status));
        }
        let oid = NextHopGroupOid::from_raw_unchecked(state.mint::<NextHopGroupKind>());
        state.groups.insert(
            oid,
            GroupState {
                group_type,
                members: BTreeSet::new(),
            },
        );
        debug!("VirtualSwitch: created next hop group {:?}", oid);
        Ok(oid)
    }

    async fn remove_next_hop_group(&self, group: NextHopGroupOid) -> SaiResult<()> {
        let mut state = self.state.lock();
        if let Some(status) = state.begin(SaiOp::RemoveNextHopGroup) {
            return Err(SaiError::from_status(status));
        }
        let in_use = match state.groups.get(&group) {
            None => return Err(SaiError::not_found(format!("{:?}", group))),
            Some(g) => !g.members.is_empty() || state.is_referenced_by_route(group.as_raw()),
        };
        if in_use {
            return Err(SaiError::object_in_use(format!("{:?}", group)));
        }
        state.groups.remove(&group);
        debug!("VirtualSwitch: removed next hop group {:?}", group);
        Ok(())
    }

    async fn create_next_hop_group_members(
        &self,
        members: &[NextHopGroupMemberAttrs],
    ) -> Vec<(SaiStatus, NextHopGroupMemberOid)> {
        let mut state = self.state.lock();
        members
            .iter()
            .map(|attrs| {
                if let Some(status) = state.begin(SaiOp::CreateNextHopGroupMember) {
                    return (status, NextHopGroupMemberOid::NULL);
                }
                if !state.groups.contains_key(&attrs.group) || attrs.next_hop.is_null() {
                    return (SaiStatus::InvalidObjectId, NextHopGroupMemberOid::NULL);
                }
                let oid =
                    NextHopGroupMemberOid::from_raw_unchecked(state.mint::<NextHopGroupMemberKind>());
                state.members.insert(
                    oid,
                    MemberState {
                        group: attrs.group,
                        next_hop: attrs.next_hop,
                        weight: attrs.weight,
                        sequence_id: attrs.sequence_id,
                    },
                );
                if let Some(group) = state.groups.get_mut(&attrs.group) {
                    group.members.insert(oid);
                }
                (SaiStatus::Success, oid)
            })
            .collect()
    }

    async fn remove_next_hop_group_members(
        &self,
        members: &[NextHopGroupMemberOid],
    ) -> Vec<SaiStatus> {
        let mut state = self.state.lock();
        members
            .iter()
            .map(|oid| {
                if let Some(status) = state.begin(SaiOp::RemoveNextHopGroupMember) {
                    return status;
                }
                match state.members.remove(oid) {
                    Some(member) => {
                        if let Some(group) = state.groups.get_mut(&member.group) {
                            group.members.remove(oid);
                        }
                        SaiStatus::Success
                    }
                    None => SaiStatus::ItemNotFound,
                }
            })
            .collect()
    }
}
