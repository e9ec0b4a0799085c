//! Next-hop group lifecycle.
//!
//! Groups are created on first use with one member per usable next hop and
//! retired once no route references them. Members follow the reachability
//! of their next hop; a group marked eligible for default-route fallback
//! takes the default route's next hops when its last member goes down.

use log::{debug, error, info, warn};
use sonic_orch_common::{
    handle_sai_create_status, handle_sai_remove_status, parse_handle_sai_status_failure, SaiApiKind,
    TaskStatus,
};
use sonic_sai::{
    NextHopGroupMemberAttrs, NextHopGroupMemberOid, NextHopGroupOid, NextHopGroupType, NextHopOid,
    RouteAttribute, SaiStatus, VirtualRouterOid,
};
use std::collections::BTreeSet;

use super::nexthop::{NextHopFlags, NextHopKey};
use super::nhg::{NextHopGroupEntry, NextHopGroupKey, NextHopGroupMemberEntry};
use super::orch::{Result, RouteError, RouteOrch};
use super::types::RouteKey;

impl RouteOrch {
    pub fn has_next_hop_group(&self, key: &NextHopGroupKey) -> bool {
        self.synced_nhgs.contains(key)
    }

    /// Gets a next-hop group entry without creating one.
    pub fn next_hop_group(&self, key: &NextHopGroupKey) -> Option<&NextHopGroupEntry> {
        self.synced_nhgs.get(key)
    }

    /// Number of groups created by RouteOrch.
    pub fn nhg_count(&self) -> usize {
        self.synced_nhgs.count()
    }

    pub fn max_nhg_count(&self) -> usize {
        self.synced_nhgs.max_count()
    }

    pub(super) fn external_group_count(&self) -> usize {
        self.external_groups
            .as_ref()
            .map_or(0, |owner| owner.synced_group_count())
    }

    /// Returns true if no route references the group. Unknown groups count
    /// as unreferenced.
    pub fn is_ref_counter_zero(&self, key: &NextHopGroupKey) -> bool {
        self.synced_nhgs.ref_count(key).map_or(true, |count| count == 0)
    }

    pub fn next_hop_group_ref_count(&self, key: &NextHopGroupKey) -> Option<u32> {
        self.synced_nhgs.ref_count(key)
    }

    /// Takes a reference on whatever object backs `key`: nothing for a
    /// blackhole, the router interface or next hop for a single next hop,
    /// the group otherwise.
    pub fn increase_nhg_ref_count(&mut self, key: &NextHopGroupKey) -> Result<()> {
        let count = match (key.len(), key.first()) {
            (0, _) | (_, None) => return Ok(()),
            // SRv6 next hops are counted by their provider.
            (1, Some(_)) if key.is_srv6() => return Ok(()),
            (1, Some(nexthop)) if nexthop.is_interface_nexthop() => {
                self.interfaces.increase_router_intf_ref_count(nexthop.alias())
            }
            (1, Some(nexthop)) => self.neighbors.increase_next_hop_ref_count(nexthop),
            _ => self.synced_nhgs.increment_ref(key),
        }
        .map_err(|source| RouteError::RefCount {
            key: key.to_string(),
            source,
        })?;

        debug!("RouteOrch: increased ref count of {} to {}", key, count);
        Ok(())
    }

    pub fn decrease_nhg_ref_count(&mut self, key: &NextHopGroupKey) -> Result<()> {
        let count = match (key.len(), key.first()) {
            (0, _) | (_, None) => return Ok(()),
            (1, Some(_)) if key.is_srv6() => return Ok(()),
            (1, Some(nexthop)) if nexthop.is_interface_nexthop() => {
                self.interfaces.decrease_router_intf_ref_count(nexthop.alias())
            }
            (1, Some(nexthop)) => self.neighbors.decrease_next_hop_ref_count(nexthop),
            _ => self.synced_nhgs.decrement_ref(key),
        }
        .map_err(|source| RouteError::RefCount {
            key: key.to_string(),
            source,
        })?;

        debug!("RouteOrch: decreased ref count of {} to {}", key, count);
        Ok(())
    }

    fn member_attrs(
        &self,
        group: NextHopGroupOid,
        next_hop: NextHopOid,
        weight: u32,
        seq_id: u32,
    ) -> NextHopGroupMemberAttrs {
        let attrs = NextHopGroupMemberAttrs::new(group, next_hop).with_weight(weight);
        if self.config.ordered_ecmp {
            attrs.with_sequence_id(seq_id)
        } else {
            attrs
        }
    }

    async fn create_member(&self, attrs: NextHopGroupMemberAttrs) -> (SaiStatus, NextHopGroupMemberOid) {
        self.nhg_api
            .create_next_hop_group_members(&[attrs])
            .await
            .into_iter()
            .next()
            .unwrap_or((SaiStatus::Failure, NextHopGroupMemberOid::NULL))
    }

    /// Creates a group with a member for every next hop that is up.
    ///
    /// Returns false when the group cannot be created right now: the group
    /// table is full, a next hop is unresolved, no next hop is up, or the
    /// switch refused the group or one of its members.
    pub async fn add_next_hop_group(&mut self, key: &NextHopGroupKey) -> bool {
        if self.synced_nhgs.is_full(self.external_group_count()) {
            debug!(
                "RouteOrch: failed to create next hop group {}, reached maximum of {} groups",
                key,
                self.synced_nhgs.max_count()
            );
            return false;
        }

        let mut installed = Vec::new();
        let mut down = Vec::new();

        for (position, nexthop) in key.iter().enumerate() {
            if nexthop.is_mpls()
                && !self.neighbors.has_next_hop(nexthop)
                && self.neighbors.is_neighbor_resolved(nexthop)
            {
                self.neighbors.add_mpls_next_hop(nexthop);
            }

            let Some(next_hop_id) = self.neighbors.next_hop_id(nexthop) else {
                info!("RouteOrch: next hop {} of group {} is not resolved", nexthop, key);
                return false;
            };

            let seq_id = if self.config.ordered_ecmp {
                position as u32 + 1
            } else {
                0
            };

            if self.neighbors.is_next_hop_flag_set(nexthop, NextHopFlags::IF_DOWN) {
                info!("RouteOrch: next hop {} is down, leaving it out of group {}", nexthop, key);
                down.push((nexthop.clone(), seq_id));
                continue;
            }

            installed.push((nexthop.clone(), next_hop_id, seq_id));
        }

        if installed.is_empty() {
            info!("RouteOrch: no next hop of group {} is up", key);
            return false;
        }

        let group_type = if self.config.ordered_ecmp {
            NextHopGroupType::DynamicOrderedEcmp
        } else {
            NextHopGroupType::DynamicUnorderedEcmp
        };

        let group_id = match self.nhg_api.create_next_hop_group(group_type).await {
            Ok(id) => id,
            Err(e) => {
                error!("RouteOrch: failed to create next hop group {}: {}", key, e);
                return false;
            }
        };

        let attrs: Vec<_> = installed
            .iter()
            .map(|(nexthop, id, seq_id)| self.member_attrs(group_id, *id, nexthop.weight(), *seq_id))
            .collect();
        let results = self.nhg_api.create_next_hop_group_members(&attrs).await;

        if results.len() != installed.len() || results.iter().any(|(status, _)| !status.is_success()) {
            error!("RouteOrch: failed to create members of next hop group {}", key);

            let created: Vec<_> = results
                .iter()
                .filter(|(status, id)| status.is_success() && !id.is_null())
                .map(|(_, id)| *id)
                .collect();
            if !created.is_empty() {
                self.nhg_api.remove_next_hop_group_members(&created).await;
            }
            if let Err(e) = self.nhg_api.remove_next_hop_group(group_id).await {
                error!("RouteOrch: failed to remove next hop group {}: {}", group_id, e);
            }
            return false;
        }

        let mut entry = NextHopGroupEntry::new(group_id);
        for ((nexthop, _, seq_id), (_, member_id)) in installed.iter().zip(results) {
            entry
                .members_mut()
                .insert(nexthop.clone(), NextHopGroupMemberEntry::new(member_id, *seq_id));
        }
        entry.set_installed_member_count(installed.len() as u32);
        for (nexthop, seq_id) in down {
            entry
                .members_mut()
                .insert(nexthop, NextHopGroupMemberEntry::new(NextHopGroupMemberOid::NULL, seq_id));
        }

        for nexthop in key.iter() {
            if let Err(e) = self.neighbors.increase_next_hop_ref_count(nexthop) {
                warn!("RouteOrch: failed to reference next hop {}: {}", nexthop, e);
            }
        }

        self.synced_nhgs.insert(key.clone(), entry);
        info!("RouteOrch: created next hop group {} as {}", key, group_id);
        true
    }

    /// Removes an unreferenced group and its members.
    ///
    /// Returns true when the group is gone or still in use, false when the
    /// switch asked to retry.
    pub async fn remove_next_hop_group(&mut self, key: &NextHopGroupKey, default_route_swapped: bool) -> bool {
        let Some(entry) = self.synced_nhgs.get(key) else {
            info!("RouteOrch: next hop group {} is already removed", key);
            return true;
        };
        if self.synced_nhgs.ref_count(key).unwrap_or(0) != 0 {
            info!("RouteOrch: next hop group {} is still referenced", key);
            return true;
        }

        let group_id = entry.id();
        let member_ids: Vec<_> = if default_route_swapped {
            entry.default_route_members().values().map(|m| m.member_id).collect()
        } else {
            entry
                .members()
                .values()
                .map(|m| m.member_id)
                .filter(|id| !id.is_null())
                .collect()
        };
        let default_route_nexthops: Vec<_> = entry.default_route_members().keys().cloned().collect();

        if !member_ids.is_empty() {
            let statuses = self.nhg_api.remove_next_hop_group_members(&member_ids).await;
            for status in statuses {
                if status.is_success() {
                    continue;
                }
                error!("RouteOrch: failed to remove member of next hop group {}: {}", key, status);
                let handle = handle_sai_remove_status(SaiApiKind::NextHopGroupMember, status);
                if handle != TaskStatus::Success {
                    return parse_handle_sai_status_failure(handle);
                }
            }
        }

        if let Err(e) = self.nhg_api.remove_next_hop_group(group_id).await {
            error!("RouteOrch: failed to remove next hop group {}: {}", key, e);
            let handle = handle_sai_remove_status(SaiApiKind::NextHopGroup, e.status());
            if handle != TaskStatus::Success {
                return parse_handle_sai_status_failure(handle);
            }
        }

        let overlay = key.is_overlay() && !key.is_srv6();
        for nexthop in key.iter() {
            if let Err(e) = self.neighbors.decrease_next_hop_ref_count(nexthop) {
                warn!("RouteOrch: failed to release next hop {}: {}", nexthop, e);
            }
            if self.neighbors.next_hop_ref_count(nexthop) != 0 {
                continue;
            }
            if overlay {
                debug!("RouteOrch: removing overlay next hop {}", nexthop);
                self.neighbors.remove_tunnel_next_hop(nexthop);
                if let Some(manager) = &self.overlay {
                    manager.remove_remote_vtep(VirtualRouterOid::NULL, nexthop);
                }
            } else if nexthop.is_mpls() {
                self.neighbors.remove_mpls_next_hop(nexthop);
            }
        }

        for nexthop in &default_route_nexthops {
            if let Err(e) = self.neighbors.decrease_next_hop_ref_count(nexthop) {
                warn!("RouteOrch: failed to release default route next hop {}: {}", nexthop, e);
            }
        }

        self.synced_nhgs.remove(key);
        info!("RouteOrch: removed next hop group {}", key);
        true
    }

    /// Re-installs `nexthop` in every group where it is down.
    pub async fn valid_next_hop_in_groups(&mut self, nexthop: &NextHopKey) -> bool {
        let Some(next_hop_id) = self.neighbors.next_hop_id(nexthop) else {
            warn!("RouteOrch: next hop {} is not resolved", nexthop);
            return false;
        };

        let targets: Vec<_> = self
            .synced_nhgs
            .iter()
            .filter(|(key, entry)| {
                key.contains(nexthop)
                    && !entry.is_default_route_swapped()
                    && entry
                        .members()
                        .get(nexthop)
                        .map_or(true, |m| m.member_id.is_null())
            })
            .map(|(key, entry)| {
                let weight = key.iter().find(|nh| *nh == nexthop).map_or(0, NextHopKey::weight);
                let seq_id = entry.members().get(nexthop).map_or(0, |m| m.seq_id);
                (key.clone(), entry.id(), weight, seq_id)
            })
            .collect();

        for (key, group_id, weight, seq_id) in targets {
            let attrs = self.member_attrs(group_id, next_hop_id, weight, seq_id);
            let (status, member_id) = self.create_member(attrs).await;
            if !status.is_success() {
                error!("RouteOrch: failed to add next hop {} to group {}: {}", nexthop, key, status);
                let handle = handle_sai_create_status(SaiApiKind::NextHopGroupMember, status);
                if handle != TaskStatus::Success {
                    return parse_handle_sai_status_failure(handle);
                }
                continue;
            }

            if let Some(entry) = self.synced_nhgs.get_mut(&key) {
                entry
                    .members_mut()
                    .insert(nexthop.clone(), NextHopGroupMemberEntry::new(member_id, seq_id));
                entry.member_installed();
            }
            info!("RouteOrch: next hop {} is up in group {}", nexthop, key);
        }

        self.fine_grained
            .as_ref()
            .map_or(true, |provider| provider.valid_next_hop(nexthop))
    }

    /// Takes `nexthop` out of every group where it is installed.
    pub async fn invalid_next_hop_in_groups(&mut self, nexthop: &NextHopKey) -> bool {
        let targets: Vec<_> = self
            .synced_nhgs
            .iter()
            .filter_map(|(key, entry)| {
                let member = entry.members().get(nexthop)?;
                (key.contains(nexthop) && !entry.is_default_route_swapped() && !member.member_id.is_null())
                    .then(|| (key.clone(), member.member_id))
            })
            .collect();

        for (key, member_id) in targets {
            let status = self
                .nhg_api
                .remove_next_hop_group_members(&[member_id])
                .await
                .into_iter()
                .next()
                .unwrap_or(SaiStatus::Failure);
            if !status.is_success() {
                error!("RouteOrch: failed to remove next hop {} from group {}: {}", nexthop, key, status);
                let handle = handle_sai_remove_status(SaiApiKind::NextHopGroupMember, status);
                if handle != TaskStatus::Success {
                    return parse_handle_sai_status_failure(handle);
                }
            }

            let swap = match self.synced_nhgs.get_mut(&key) {
                Some(entry) => {
                    if let Some(member) = entry.members_mut().get_mut(nexthop) {
                        member.member_id = NextHopGroupMemberOid::NULL;
                    }
                    entry.member_uninstalled();
                    entry.installed_member_count() == 0
                        && entry.is_eligible_for_default_route_swap()
                        && !entry.is_default_route_swapped()
                }
                None => false,
            };
            info!("RouteOrch: next hop {} is down in group {}", nexthop, key);

            if swap {
                let defaults = if nexthop.ip_address().is_ipv4() {
                    self.v4_default_nexthops.clone()
                } else {
                    self.v6_default_nexthops.clone()
                };
                if !self.add_default_route_next_hops_in_group(&key, &defaults).await {
                    error!("RouteOrch: failed to swap group {} to default route next hops", key);
                }
            }
        }

        self.fine_grained
            .as_ref()
            .map_or(true, |provider| provider.invalid_next_hop(nexthop))
    }

    /// Installs the default route's next hops as extra members of a group
    /// that lost all of its own.
    pub(super) async fn add_default_route_next_hops_in_group(
        &mut self,
        key: &NextHopGroupKey,
        defaults: &BTreeSet<NextHopKey>,
    ) -> bool {
        let Some(group_id) = self.synced_nhgs.get(key).map(NextHopGroupEntry::id) else {
            return false;
        };

        for nexthop in defaults {
            let Some(next_hop_id) = self.neighbors.next_hop_id(nexthop) else {
                continue;
            };

            let attrs = self.member_attrs(group_id, next_hop_id, nexthop.weight(), 0);
            let (status, member_id) = self.create_member(attrs).await;
            if !status.is_success() {
                error!(
                    "RouteOrch: failed to add default route next hop {} to group {}: {}",
                    nexthop, key, status
                );
                let handle = handle_sai_create_status(SaiApiKind::NextHopGroupMember, status);
                if handle != TaskStatus::Success {
                    return parse_handle_sai_status_failure(handle);
                }
                continue;
            }

            if let Err(e) = self.neighbors.increase_next_hop_ref_count(nexthop) {
                warn!("RouteOrch: failed to reference next hop {}: {}", nexthop, e);
            }
            if let Some(entry) = self.synced_nhgs.get_mut(key) {
                entry
                    .default_route_members_mut()
                    .insert(nexthop.clone(), NextHopGroupMemberEntry::new(member_id, 0));
            }
        }

        if let Some(entry) = self.synced_nhgs.get_mut(key) {
            entry.mark_default_route_swapped();
        }
        info!("RouteOrch: group {} now uses the default route next hops", key);
        true
    }

    /// Records the next hops of a default route for later swaps.
    pub(super) fn update_default_route_swap_set(&mut self, key: &NextHopGroupKey, is_v4: bool) {
        let nexthops: BTreeSet<NextHopKey> = if key.len() == 1 {
            key.iter().cloned().collect()
        } else {
            self.synced_nhgs
                .get(key)
                .map(|entry| {
                    entry
                        .members()
                        .iter()
                        .filter(|(_, member)| !member.member_id.is_null())
                        .map(|(nexthop, _)| nexthop.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        debug!(
            "RouteOrch: {} default route next hops are now {:?}",
            if is_v4 { "ipv4" } else { "ipv6" },
            nexthops
        );
        if is_v4 {
            self.v4_default_nexthops = nexthops;
        } else {
            self.v6_default_nexthops = nexthops;
        }
    }

    /// Default route next hops recorded for one address family.
    pub fn default_route_next_hops(&self, is_v4: bool) -> &BTreeSet<NextHopKey> {
        if is_v4 {
            &self.v4_default_nexthops
        } else {
            &self.v6_default_nexthops
        }
    }

    /// Drops the tunnel next hops and remote endpoints of an overlay key
    /// that no route uses any more.
    pub(super) fn remove_overlay_next_hops(&self, vrf_id: VirtualRouterOid, key: &NextHopGroupKey) {
        for nexthop in key.iter() {
            if self.neighbors.next_hop_ref_count(nexthop) != 0 {
                continue;
            }
            debug!("RouteOrch: removing overlay next hop {}", nexthop);
            self.neighbors.remove_tunnel_next_hop(nexthop);
            if let Some(manager) = &self.overlay {
                manager.remove_remote_vtep(vrf_id, nexthop);
            }
        }
    }

    /// Re-points every single-next-hop route through `nexthop` at its
    /// current handle.
    pub async fn update_next_hop_routes(&mut self, nexthop: &NextHopKey) -> Result<usize> {
        let Some(next_hop_id) = self.neighbors.next_hop_id(nexthop) else {
            return Err(RouteError::NextHopNotResolved(nexthop.to_string()));
        };

        let routes: Vec<RouteKey> = self.routes_by_next_hop.routes(nexthop).copied().collect();
        if routes.is_empty() {
            return Ok(0);
        }

        let entries: Vec<_> = routes
            .iter()
            .map(|route| (route.entry(), RouteAttribute::NextHopId(next_hop_id.as_raw())))
            .collect();
        let statuses = self.route_api.set_route_entries_attribute(&entries).await;

        for (route, status) in routes.iter().zip(statuses) {
            if !status.is_success() {
                error!("RouteOrch: failed to update route {} to next hop {}: {}", route, nexthop, status);
                return Err(RouteError::RouteUpdate { route: *route, status });
            }
        }

        info!("RouteOrch: updated {} routes to next hop {}", routes.len(), nexthop);
        Ok(routes.len())
    }
}
