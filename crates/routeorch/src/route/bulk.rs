//! Staging route requests into the bulker and settling them afterwards.
//!
//! `add_route`/`remove_route` resolve what a route should point at and
//! stage the switch requests; `add_route_post`/`remove_route_post` read the
//! status slots after the flush and move reference counts, tables and
//! published state to match what the switch accepted.

use log::{debug, error, info, warn};
use rand::Rng;
use sonic_orch_common::{
    handle_sai_create_status, handle_sai_remove_status, handle_sai_set_status,
    parse_handle_sai_status_failure, SaiApiKind, TaskStatus,
};
use sonic_sai::{
    NextHopOid, PacketAction, RawSaiObjectId, RouteAttribute, SaiStatus, StatusSlot, VirtualRouterOid,
    NULL_OBJECT_ID,
};
use sonic_types::IpPrefix;

use super::nexthop::{NextHopFlags, NextHopKey};
use super::nhg::NextHopGroupKey;
use super::orch::{RouteOrch, APP_ROUTE_TABLE_NAME};
use super::providers::{FineGrainedNextHop, RouteOwner};
use super::request::{RouteBulkContext, StagedOp};
use super::types::{RouteKey, RouteNhg, RouteTable};

/// Outcome of staging one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Staging {
    Staged,
    NotReady,
    /// The group cannot be created; a single next hop should stand in.
    NeedsTemporary,
}

/// Whether the object a staged route points at is still there.
enum PostCheck {
    Ready(RouteOwner),
    GroupMissing,
    NotReady,
}

impl RouteOrch {
    /// Stages the requests that make the route point at `nexthops`.
    ///
    /// Nothing is staged when a dependency is missing; the caller keeps
    /// the request queued. An unresolvable group is replaced by one of its
    /// resolved next hops for the time being.
    pub(super) async fn add_route(&mut self, ctx: &mut RouteBulkContext, nexthops: &NextHopGroupKey) {
        if self.stage_route(ctx, nexthops).await == Staging::NeedsTemporary {
            self.add_temp_route(ctx, nexthops).await;
        }
    }

    /// Points the route at one randomly chosen next hop of `nexthops`
    /// that is resolved and up.
    pub(super) async fn add_temp_route(&mut self, ctx: &mut RouteBulkContext, nexthops: &NextHopGroupKey) {
        let candidates: Vec<_> = nexthops
            .iter()
            .filter(|nh| {
                self.neighbors.is_neighbor_resolved(nh)
                    && !self.neighbors.is_next_hop_flag_set(nh, NextHopFlags::IF_DOWN)
            })
            .cloned()
            .collect();

        if candidates.is_empty() {
            debug!("RouteOrch: no usable next hop in {} for a temporary route", nexthops);
            return;
        }

        let pick = candidates[self.rng.gen_range(0..candidates.len())].clone();
        info!(
            "RouteOrch: using temporary next hop {} for route {} until group {} is created",
            pick, ctx.prefix, nexthops
        );

        let tmp = NextHopGroupKey::single(pick);
        ctx.tmp_next_hop = tmp.clone();
        self.stage_route(ctx, &tmp).await;
    }

    async fn stage_route(&mut self, ctx: &mut RouteBulkContext, nexthops: &NextHopGroupKey) -> Staging {
        let vrf_id = ctx.vrf_id;
        let prefix = ctx.prefix;

        if !self.synced_routes.contains_key(&vrf_id) {
            self.synced_routes.insert(vrf_id, RouteTable::new());
            if vrf_id != self.default_vrf {
                if let Err(e) = self.vrfs.increase_vrf_ref_count(vrf_id) {
                    warn!("RouteOrch: failed to reference VRF {}: {}", vrf_id, e);
                }
            }
        }

        let current = self
            .synced_routes
            .get(&vrf_id)
            .and_then(|table| table.get(&prefix))
            .cloned();

        let mut fine_grained: Option<FineGrainedNextHop> = None;
        let mut blackhole = false;

        let next_hop_id = if let Some(provider) = self
            .fine_grained
            .clone()
            .filter(|provider| provider.is_route_fine_grained(vrf_id, &prefix, nexthops))
        {
            match provider.set_fine_grained_group(vrf_id, &prefix, nexthops) {
                Some(result) => {
                    fine_grained = Some(result);
                    result.next_hop_id
                }
                None => return Staging::NotReady,
            }
        } else if let Some(index) = &ctx.nhg_index {
            match self.external_groups.as_ref().and_then(|owner| owner.group(index)) {
                Some(group) => group.id,
                None => {
                    info!("RouteOrch: next hop group {} does not exist", index);
                    return Staging::NotReady;
                }
            }
        } else if nexthops.is_empty() {
            blackhole = true;
            NULL_OBJECT_ID
        } else if nexthops.len() == 1 {
            match self.single_next_hop_id(vrf_id, &prefix, nexthops) {
                Some(id) => id,
                None => return Staging::NotReady,
            }
        } else {
            match self.group_next_hop_id(ctx, nexthops, current.as_ref()).await {
                Ok(id) => id,
                Err(staging) => return staging,
            }
        };

        let entry = RouteKey::new(vrf_id, prefix).entry();

        let Some(current) = current.filter(|_| !self.bulker.is_pending_removal(&entry)) else {
            let mut attrs = vec![if blackhole {
                RouteAttribute::PacketAction(PacketAction::Drop)
            } else {
                RouteAttribute::NextHopId(next_hop_id)
            }];

            if ctx.context_index.is_some() || nexthops.is_srv6_vpn() {
                match self.prefix_agg_id(ctx, nexthops) {
                    Some(agg_id) => attrs.push(RouteAttribute::PrefixAggId(agg_id)),
                    None => return Staging::NotReady,
                }
            }

            match self.bulker.create_entry(entry, attrs) {
                Ok(slot) => ctx.stage(StagedOp::Create, slot),
                Err(status) => {
                    error!("RouteOrch: failed to stage create of route {}: {}", entry, status);
                    return Staging::NotReady;
                }
            }
            debug!("RouteOrch: staged create of route {} with next hop(s) {}", entry, nexthops);
            return Staging::Staged;
        };

        if current.nhg_key.is_empty() && !blackhole {
            let slot = self
                .bulker
                .set_entry_attribute(entry, RouteAttribute::PacketAction(PacketAction::Forward));
            ctx.stage(StagedOp::Forward, slot);
        }

        if fine_grained.is_some_and(|result| !result.id_changed) {
            // Members changed in place; the route already points at the group.
            let slot = self.bulker.completed_slot(SaiStatus::Success);
            ctx.stage(StagedOp::NextHop, slot);
        } else {
            if !blackhole && vrf_id == self.default_vrf && prefix.is_default() {
                let slot = self
                    .bulker
                    .set_entry_attribute(entry, RouteAttribute::PacketAction(PacketAction::Forward));
                ctx.stage(StagedOp::Forward, slot);
            }

            let context_changed = ctx.context_index.is_some() && current.context_index != ctx.context_index;
            if nexthops.is_srv6_vpn() || context_changed {
                match self.prefix_agg_id(ctx, nexthops) {
                    Some(agg_id) => {
                        let slot = self
                            .bulker
                            .set_entry_attribute(entry, RouteAttribute::PrefixAggId(agg_id));
                        ctx.stage(StagedOp::PrefixAggId, slot);
                    }
                    None => return Staging::NotReady,
                }
            }

            let slot = self
                .bulker
                .set_entry_attribute(entry, RouteAttribute::NextHopId(next_hop_id));
            ctx.stage(StagedOp::NextHop, slot);
        }

        if blackhole {
            let slot = self
                .bulker
                .set_entry_attribute(entry, RouteAttribute::PacketAction(PacketAction::Drop));
            ctx.stage(StagedOp::Drop, slot);
        }

        debug!("RouteOrch: staged update of route {} to next hop(s) {}", entry, nexthops);
        Staging::Staged
    }

    /// Handle of the object behind a single next hop, requesting whatever
    /// is missing.
    fn single_next_hop_id(
        &self,
        vrf_id: VirtualRouterOid,
        prefix: &IpPrefix,
        nexthops: &NextHopGroupKey,
    ) -> Option<RawSaiObjectId> {
        let nexthop = nexthops.first()?;

        if nexthop.is_interface_nexthop() {
            let id = self.interfaces.router_intf_id(nexthop.alias());
            if id.is_none() {
                info!("RouteOrch: router interface {} of route {} is not ready", nexthop.alias(), prefix);
            }
            return id.map(|id| id.as_raw());
        }

        if self.neighbors.has_next_hop(nexthop) {
            if nexthops.is_srv6() {
                return self.srv6_next_hop_id(nexthops);
            }
            if self.neighbors.is_next_hop_flag_set(nexthop, NextHopFlags::IF_DOWN) {
                info!("RouteOrch: next hop {} of route {} is down", nexthop, prefix);
                return None;
            }
            return self.neighbors.next_hop_id(nexthop).map(|id| id.as_raw());
        }

        if nexthop.is_mpls() && self.neighbors.is_neighbor_resolved(nexthop) {
            self.neighbors.add_mpls_next_hop(nexthop);
            return self.neighbors.next_hop_id(nexthop).map(|id| id.as_raw());
        }

        if nexthops.is_overlay() && !nexthops.is_srv6() {
            return self.add_overlay_next_hop(vrf_id, nexthop).map(|id| id.as_raw());
        }

        if nexthops.is_srv6() {
            return self.srv6_next_hop_id(nexthops);
        }

        info!("RouteOrch: next hop {} of route {} is not resolved", nexthop, prefix);
        self.neighbors.resolve_neighbor(nexthop);
        None
    }

    fn add_overlay_next_hop(
        &self,
        vrf_id: VirtualRouterOid,
        nexthop: &NextHopKey,
    ) -> Option<NextHopOid> {
        let Some(manager) = &self.overlay else {
            warn!("RouteOrch: no overlay endpoint manager for next hop {}", nexthop);
            return None;
        };
        if !manager.create_remote_vtep(vrf_id, nexthop) {
            error!("RouteOrch: failed to create remote endpoint for next hop {}", nexthop);
            return None;
        }
        let id = self.neighbors.add_tunnel_next_hop(nexthop);
        if id.is_none() {
            error!("RouteOrch: failed to create tunnel next hop {}", nexthop);
        }
        id
    }

    fn srv6_next_hop_id(&self, nexthops: &NextHopGroupKey) -> Option<RawSaiObjectId> {
        let Some(provider) = &self.srv6 else {
            warn!("RouteOrch: no SRv6 provider for next hop(s) {}", nexthops);
            return None;
        };
        let id = provider.srv6_next_hops(nexthops);
        if id.is_none() {
            error!("RouteOrch: failed to create SRv6 next hop(s) {}", nexthops);
        }
        id
    }

    /// Handle of the group behind `nexthops`, creating it on first use.
    async fn group_next_hop_id(
        &mut self,
        ctx: &RouteBulkContext,
        nexthops: &NextHopGroupKey,
        current: Option<&RouteNhg>,
    ) -> Result<RawSaiObjectId, Staging> {
        if nexthops.is_srv6() && self.srv6_next_hop_id(nexthops).is_none() {
            return Err(Staging::NotReady);
        }

        if !self.synced_nhgs.contains(nexthops) {
            if !self.add_next_hop_group(nexthops).await {
                if nexthops.is_srv6() || current.is_some_and(|route| route.nhg_key.is_srv6()) {
                    return Err(Staging::NotReady);
                }

                for nexthop in nexthops.iter() {
                    if self.neighbors.has_next_hop(nexthop) {
                        continue;
                    }
                    if nexthops.is_overlay() {
                        if self.add_overlay_next_hop(ctx.vrf_id, nexthop).is_none() {
                            return Err(Staging::NotReady);
                        }
                    } else {
                        info!("RouteOrch: next hop {} of route {} is not resolved", nexthop, ctx.prefix);
                        self.neighbors.resolve_neighbor(nexthop);
                    }
                }

                // A route already on one of the wanted next hops keeps it.
                if let Some(route) = current {
                    if route.nhg_key.len() == 1
                        && route.nhg_key.first().is_some_and(|nh| nexthops.contains(nh))
                    {
                        return Err(Staging::NotReady);
                    }
                }

                return Err(Staging::NeedsTemporary);
            }

            if let Some(entry) = self.synced_nhgs.get_mut(nexthops) {
                entry.set_eligible_for_default_route_swap(ctx.fallback_to_default_route);
            }
        }

        self.synced_nhgs
            .get(nexthops)
            .map(|entry| entry.id().as_raw())
            .ok_or(Staging::NotReady)
    }

    fn prefix_agg_id(&self, ctx: &RouteBulkContext, nexthops: &NextHopGroupKey) -> Option<u32> {
        let Some(provider) = &self.srv6 else {
            warn!("RouteOrch: no SRv6 provider for route {}", ctx.prefix);
            return None;
        };

        match (&ctx.nhg_index, &ctx.context_index) {
            (_, Some(context)) if !provider.context_exists(context) => {
                info!("RouteOrch: PIC context {} of route {} does not exist", context, ctx.prefix);
                None
            }
            (Some(_), Some(context)) => Some(provider.agg_id_for_context(context)),
            _ => Some(provider.agg_id_for_next_hops(nexthops)),
        }
    }

    fn route_owner(&self, ctx: &RouteBulkContext, nexthops: &NextHopGroupKey) -> RouteOwner {
        if self
            .fine_grained
            .as_ref()
            .is_some_and(|provider| provider.is_route_fine_grained(ctx.vrf_id, &ctx.prefix, nexthops))
        {
            RouteOwner::FineGrained
        } else if let Some(index) = &ctx.nhg_index {
            RouteOwner::External(index.clone())
        } else {
            RouteOwner::Local
        }
    }

    fn check_route_post(&self, ctx: &RouteBulkContext, nexthops: &NextHopGroupKey) -> PostCheck {
        let owner = self.route_owner(ctx, nexthops);
        match &owner {
            RouteOwner::FineGrained => {}
            RouteOwner::External(index) => {
                if self
                    .external_groups
                    .as_ref()
                    .and_then(|groups| groups.group(index))
                    .is_none()
                {
                    error!("RouteOrch: next hop group {} of route {} is gone", index, ctx.prefix);
                    return PostCheck::NotReady;
                }
            }
            RouteOwner::Local if nexthops.is_empty() => {}
            RouteOwner::Local if nexthops.len() == 1 => {
                let Some(nexthop) = nexthops.first() else {
                    return PostCheck::NotReady;
                };
                if nexthop.is_interface_nexthop() {
                    if self.interfaces.router_intf_id(nexthop.alias()).is_none() {
                        return PostCheck::NotReady;
                    }
                } else if !nexthops.is_srv6() && !self.neighbors.has_next_hop(nexthop) {
                    return PostCheck::NotReady;
                }
            }
            RouteOwner::Local => {
                if !self.synced_nhgs.contains(nexthops) {
                    return PostCheck::GroupMissing;
                }
            }
        }
        PostCheck::Ready(owner)
    }

    /// Settles a staged add. Returns true when the request is finished.
    pub(super) async fn add_route_post(&mut self, ctx: &RouteBulkContext, nexthops: &NextHopGroupKey) -> bool {
        if !ctx.is_staged() {
            return false;
        }
        if !self.synced_routes.contains_key(&ctx.vrf_id) {
            info!("RouteOrch: VRF of route {} is gone", ctx.key);
            return false;
        }

        match self.check_route_post(ctx, nexthops) {
            PostCheck::Ready(owner) => self.apply_route_post(ctx, nexthops, owner).await,
            PostCheck::GroupMissing => {
                if !ctx.tmp_next_hop.is_empty() {
                    if let PostCheck::Ready(owner) = self.check_route_post(ctx, &ctx.tmp_next_hop) {
                        self.apply_route_post(ctx, &ctx.tmp_next_hop, owner).await;
                    }
                }
                false
            }
            PostCheck::NotReady => false,
        }
    }

    async fn apply_route_post(&mut self, ctx: &RouteBulkContext, nexthops: &NextHopGroupKey, owner: RouteOwner) -> bool {
        let vrf_id = ctx.vrf_id;
        let prefix = ctx.prefix;
        let route = RouteKey::new(vrf_id, prefix);
        let current = self.route(vrf_id, &prefix).cloned();

        if let Some(slot) = ctx.slot(StagedOp::Create) {
            let status = self.bulker.status(slot);
            if !status.is_success() {
                error!(
                    "RouteOrch: failed to create route {} with next hop(s) {}: {}",
                    route, nexthops, status
                );
                match &owner {
                    RouteOwner::FineGrained => {
                        if let Some(provider) = &self.fine_grained {
                            provider.remove_fine_grained_group(vrf_id, &prefix);
                        }
                        return false;
                    }
                    RouteOwner::Local if nexthops.len() > 1 => {
                        self.remove_next_hop_group(nexthops, false).await;
                    }
                    _ => {}
                }
                let handle = handle_sai_create_status(SaiApiKind::Route, status);
                if handle != TaskStatus::Success {
                    return parse_handle_sai_status_failure(handle);
                }
            }

            match &owner {
                RouteOwner::FineGrained => {}
                RouteOwner::External(index) => self.inc_external_ref(index, ctx.context_index.as_deref()),
                RouteOwner::Local => self.take_route_ref(nexthops),
            }
            info!("RouteOrch: created route {} with next hop(s) {}", route, nexthops);
        } else if owner == RouteOwner::FineGrained {
            if let Some(old) = current.as_ref().filter(|old| self.synced_nhgs.contains(&old.nhg_key)) {
                self.drop_route_ref(&old.nhg_key);
                if old.nhg_key.len() > 1 && self.is_ref_counter_zero(&old.nhg_key) {
                    self.bulk_nhg_reduced.insert((old.nhg_key.clone(), VirtualRouterOid::NULL));
                }
            }
            info!("RouteOrch: updated fine grained route {} to next hop(s) {}", route, nexthops);
        } else {
            for slot in ctx.slots(StagedOp::Forward) {
                if let Some(done) = self.check_set_status(slot, &route, "packet action forward") {
                    return done;
                }
            }
            if let Some(slot) = ctx.slot(StagedOp::PrefixAggId) {
                if let Some(done) = self.check_set_status(slot, &route, "prefix aggregation id") {
                    return done;
                }
            }
            if let Some(slot) = ctx.slot(StagedOp::NextHop) {
                let status = self.bulker.status(slot);
                if status == SaiStatus::ItemNotFound {
                    error!("RouteOrch: route {} is gone from the switch, dropping it", route);
                    if let Some(table) = self.synced_routes.get_mut(&vrf_id) {
                        table.remove(&prefix);
                    }
                    return false;
                }
                if let Some(done) = self.check_set_status(slot, &route, "next hop") {
                    return done;
                }
            }

            if let Some(old) = &current {
                self.release_route_nhg(route, old);
            }

            if let Some(slot) = ctx.slot(StagedOp::Drop) {
                if let Some(done) = self.check_set_status(slot, &route, "packet action drop") {
                    return done;
                }
            }

            match &owner {
                RouteOwner::External(index) => self.inc_external_ref(index, ctx.context_index.as_deref()),
                _ => self.take_route_ref(nexthops),
            }
            info!("RouteOrch: updated route {} with next hop(s) {}", route, nexthops);
        }

        if ctx.nhg_index.is_none() && nexthops.len() == 1 && !nexthops.is_overlay() && !nexthops.is_srv6() {
            if let Some(nexthop) = nexthops.first().filter(|nh| !nh.ip_address().is_zero()) {
                self.routes_by_next_hop.add(nexthop.clone(), route);
            }
        }

        if prefix.is_default() {
            self.update_default_route_state(&prefix, true);
        }

        let stored = RouteNhg {
            nhg_key: nexthops.clone(),
            nhg_index: ctx.nhg_index.clone(),
            context_index: ctx.context_index.clone(),
        };
        self.synced_routes.entry(vrf_id).or_default().insert(prefix, stored);
        self.observers.notify(vrf_id, &prefix, nexthops, true);
        self.publish_route_state(ctx);

        !ctx.using_temp_nhg
    }

    /// Stages the removal of a route. The default routes of the default VRF
    /// are never removed, only set back to drop.
    ///
    /// Returns true when there is nothing to stage.
    pub(super) fn remove_route(&mut self, ctx: &mut RouteBulkContext) -> bool {
        let vrf_id = ctx.vrf_id;
        let prefix = ctx.prefix;
        let entry = RouteKey::new(vrf_id, prefix).entry();

        let Some(table) = self.synced_routes.get(&vrf_id) else {
            info!("RouteOrch: VRF of route {} has no routes", ctx.key);
            return true;
        };

        if !table.contains_key(&prefix) && self.bulker.creating_entries_count_for(&entry) == 0 {
            if table.is_empty() && self.bulker.creating_entries_count() == 0 {
                self.synced_routes.remove(&vrf_id);
                self.release_vrf(vrf_id);
            }
            info!("RouteOrch: route {} is already removed", ctx.key);
            return true;
        }

        if vrf_id == self.default_vrf && prefix.is_default() {
            let slot = self
                .bulker
                .set_entry_attribute(entry, RouteAttribute::PacketAction(PacketAction::Drop));
            ctx.stage(StagedOp::Drop, slot);
            let slot = self
                .bulker
                .set_entry_attribute(entry, RouteAttribute::NextHopId(NULL_OBJECT_ID));
            ctx.stage(StagedOp::NextHop, slot);
        } else {
            let slot = self.bulker.remove_entry(entry);
            ctx.stage(StagedOp::Remove, slot);
        }
        false
    }

    /// Settles a staged removal. Returns true when the request is finished.
    pub(super) fn remove_route_post(&mut self, ctx: &RouteBulkContext) -> bool {
        if !ctx.is_staged() {
            return false;
        }

        let vrf_id = ctx.vrf_id;
        let prefix = ctx.prefix;
        let route = RouteKey::new(vrf_id, prefix);

        let Some(old) = self.route(vrf_id, &prefix).cloned() else {
            // The route was only about to be created; its create was cancelled.
            self.publish_route_state(ctx);
            self.observers
                .notify(vrf_id, &prefix, &NextHopGroupKey::new(), false);
            return true;
        };

        let is_default = vrf_id == self.default_vrf && prefix.is_default();

        if is_default {
            for op in [StagedOp::Drop, StagedOp::NextHop] {
                if let Some(slot) = ctx.slot(op) {
                    if let Some(done) = self.check_set_status(slot, &route, "drop") {
                        return done;
                    }
                }
            }
            self.update_default_route_state(&prefix, false);
            if prefix.address().is_ipv4() {
                self.v4_default_nexthops.clear();
            } else {
                self.v6_default_nexthops.clear();
            }
        } else if let Some(slot) = ctx.slot(StagedOp::Remove) {
            let status = self.bulker.status(slot);
            if !status.is_success() {
                error!("RouteOrch: failed to remove route {}: {}", route, status);
                let handle = handle_sai_remove_status(SaiApiKind::Route, status);
                if handle != TaskStatus::Success {
                    return parse_handle_sai_status_failure(handle);
                }
            }
        }

        self.release_route_nhg(route, &old);
        info!("RouteOrch: removed route {} with next hop(s) {}", route, old.nhg_key);
        self.publish_route_state(ctx);

        if is_default {
            if let Some(table) = self.synced_routes.get_mut(&vrf_id) {
                table.insert(prefix, RouteNhg::default());
            }
            self.observers
                .notify(vrf_id, &prefix, &NextHopGroupKey::new(), true);
            return true;
        }

        let now_empty = match self.synced_routes.get_mut(&vrf_id) {
            Some(table) => {
                table.remove(&prefix);
                table.is_empty()
            }
            None => false,
        };
        self.observers
            .notify(vrf_id, &prefix, &NextHopGroupKey::new(), false);
        // A later request of this pass may refill the table.
        if now_empty && vrf_id != self.default_vrf {
            self.bulk_vrf_emptied.insert(vrf_id);
        }
        true
    }

    /// Classifies a set status. `Some(done)` ends the request.
    fn check_set_status(&self, slot: StatusSlot, route: &RouteKey, what: &str) -> Option<bool> {
        let status = self.bulker.status(slot);
        if status.is_success() {
            return None;
        }
        error!("RouteOrch: failed to set {} of route {}: {}", what, route, status);
        let handle = handle_sai_set_status(SaiApiKind::Route, status);
        (handle != TaskStatus::Success).then(|| parse_handle_sai_status_failure(handle))
    }

    /// Drops what a route held on its previous next hops.
    fn release_route_nhg(&mut self, route: RouteKey, old: &RouteNhg) {
        if let Some(provider) = self
            .fine_grained
            .clone()
            .filter(|provider| provider.contains_fine_grained_group(route.vrf_id, &route.prefix))
        {
            provider.remove_fine_grained_group(route.vrf_id, &route.prefix);
            return;
        }

        if let Some(index) = &old.nhg_index {
            self.dec_external_ref(index, old.context_index.as_deref());
            return;
        }

        let key = &old.nhg_key;
        self.drop_route_ref(key);

        if key.is_srv6() {
            self.bulk_srv6_reduced.push(key.clone());
        }

        if key.len() > 1 {
            if self.is_ref_counter_zero(key) {
                self.bulk_nhg_reduced.insert((key.clone(), VirtualRouterOid::NULL));
            }
        } else if key.is_overlay() {
            if key
                .first()
                .is_some_and(|nh| self.neighbors.next_hop_ref_count(nh) == 0)
            {
                self.bulk_nhg_reduced.insert((key.clone(), route.vrf_id));
            }
        } else if let Some(nexthop) = key.first() {
            if nexthop.is_mpls() && self.neighbors.next_hop_ref_count(nexthop) == 0 {
                self.neighbors.remove_mpls_next_hop(nexthop);
            }
            self.routes_by_next_hop.remove(nexthop, &route);
        }
    }

    fn take_route_ref(&mut self, key: &NextHopGroupKey) {
        if let Err(e) = self.increase_nhg_ref_count(key) {
            error!("RouteOrch: {}", e);
        }
    }

    fn drop_route_ref(&mut self, key: &NextHopGroupKey) {
        if let Err(e) = self.decrease_nhg_ref_count(key) {
            error!("RouteOrch: {}", e);
        }
    }

    fn inc_external_ref(&self, index: &str, context: Option<&str>) {
        if let Some(owner) = &self.external_groups {
            owner.increase_ref_count(index);
        }
        if let (Some(context), Some(provider)) = (context, &self.srv6) {
            provider.increase_context_ref_count(context);
        }
    }

    fn dec_external_ref(&self, index: &str, context: Option<&str>) {
        if let Some(owner) = &self.external_groups {
            owner.decrease_ref_count(index);
        }
        if let (Some(context), Some(provider)) = (context, &self.srv6) {
            provider.decrease_context_ref_count(context);
        }
    }

    /// Drops the route tables emptied during this pass and releases their
    /// VRFs.
    pub(super) fn release_emptied_vrfs(&mut self) {
        for vrf_id in std::mem::take(&mut self.bulk_vrf_emptied) {
            if self.synced_routes.get(&vrf_id).is_some_and(|table| table.is_empty()) {
                self.synced_routes.remove(&vrf_id);
                self.release_vrf(vrf_id);
            }
        }
    }

    fn release_vrf(&self, vrf_id: VirtualRouterOid) {
        if vrf_id == self.default_vrf {
            return;
        }
        if let Err(e) = self.vrfs.decrease_vrf_ref_count(vrf_id) {
            warn!("RouteOrch: failed to release VRF {}: {}", vrf_id, e);
        }
    }

    pub(super) fn publish_route_state(&self, ctx: &RouteBulkContext) {
        let fields = if ctx.is_set {
            vec![("protocol".to_string(), ctx.protocol.clone())]
        } else {
            Vec::new()
        };
        self.publisher
            .publish(APP_ROUTE_TABLE_NAME, &ctx.key, &fields, SaiStatus::Success, false);
    }
}
