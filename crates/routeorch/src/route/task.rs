//! Request processing: resync control, the staging pass and the pass that
//! settles bulk results.

use log::{debug, error, info, warn};
use sonic_orch_common::{KeyOpFieldsValues, Operation};
use sonic_sai::VirtualRouterOid;
use sonic_types::AddrScope;
use std::collections::{BTreeSet, VecDeque};

use super::nhg::NextHopGroupKey;
use super::orch::RouteOrch;
use super::request::{parse_route_key, route_key_string, RouteBulkContext, RouteFields, RESYNC_KEY};
use super::types::{RouteKey, RouteNhg};

/// What the staging pass did with one request.
enum Stage {
    /// Finished or dropped.
    Done,
    /// Not processable yet; stays queued.
    Keep,
    Staged(RouteBulkContext),
}

impl RouteOrch {
    /// Handles `resync` control entries.
    ///
    /// A resync SET queues a DEL for every synced route and holds all
    /// requests until the resync DEL. Routes re-sent during the resync lose
    /// their pending DEL, so only routes that were not re-sent get removed.
    /// Returns the entries to process now, if any.
    pub(super) fn take_resync_control(
        &mut self,
        entries: Vec<KeyOpFieldsValues>,
    ) -> Option<Vec<KeyOpFieldsValues>> {
        let (control, mut entries): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|entry| entry.key == RESYNC_KEY);

        for entry in control {
            match entry.op {
                Operation::Set => {
                    info!("RouteOrch: resync started");
                    let deletes = self.resync_deletes();
                    self.dirty_keys = deletes.iter().map(|entry| entry.key.clone()).collect();
                    self.resync = true;
                    self.consumer.add_to_sync(deletes);
                    self.consumer.add_to_sync(std::mem::take(&mut entries));
                    entries = self.consumer.drain();
                }
                Operation::Del => {
                    info!("RouteOrch: resync finished");
                    self.resync = false;
                    entries = self.drop_resent_deletes(entries);
                    self.dirty_keys.clear();
                }
            }
        }

        if self.resync {
            self.consumer.retry_all(entries);
            return None;
        }
        Some(entries)
    }

    /// A DEL for every synced route except the drop placeholders of the
    /// default routes.
    fn resync_deletes(&self) -> Vec<KeyOpFieldsValues> {
        let mut deletes = Vec::new();
        for (vrf_id, table) in self.synced_routes.iter() {
            let vrf_name = if *vrf_id == self.default_vrf {
                None
            } else {
                match self.vrfs.vrf_name(*vrf_id) {
                    Some(name) => Some(name),
                    None => {
                        warn!("RouteOrch: no name for VRF {}, its routes are kept", vrf_id);
                        continue;
                    }
                }
            };

            for (prefix, route) in table {
                if *vrf_id == self.default_vrf && prefix.is_default() && *route == RouteNhg::default() {
                    continue;
                }
                deletes.push(KeyOpFieldsValues::del(route_key_string(vrf_name.as_deref(), prefix)));
            }
        }
        debug!("RouteOrch: resync marked {} routes", deletes.len());
        deletes
    }

    fn drop_resent_deletes(&self, entries: Vec<KeyOpFieldsValues>) -> Vec<KeyOpFieldsValues> {
        let resent: BTreeSet<String> = entries
            .iter()
            .filter(|entry| entry.op.is_set())
            .map(|entry| entry.key.clone())
            .collect();

        entries
            .into_iter()
            .filter(|entry| {
                !(entry.op.is_del() && self.dirty_keys.contains(&entry.key) && resent.contains(&entry.key))
            })
            .collect()
    }

    /// Runs the staging pass, one flush and the settling pass until every
    /// entry is either finished or left for a later pass.
    pub(super) async fn process_entries(&mut self, entries: Vec<KeyOpFieldsValues>) {
        let mut queue: VecDeque<(usize, KeyOpFieldsValues)> = entries.into_iter().enumerate().collect();
        let mut leftovers = Vec::new();

        while !queue.is_empty() {
            let mut staged = Vec::new();

            while let Some((seq, entry)) = queue.pop_front() {
                // Removals may free groups; commit them before staging more.
                if entry.op.is_set()
                    && self.bulker.removing_entries_count() > 0
                    && self.synced_nhgs.is_full(self.external_group_count())
                {
                    debug!("RouteOrch: group table full, committing pending removals first");
                    queue.push_front((seq, entry));
                    break;
                }

                match self.stage_entry(&entry).await {
                    Stage::Done => {}
                    Stage::Keep => leftovers.push((seq, entry)),
                    Stage::Staged(ctx) => staged.push((seq, entry, ctx)),
                }
            }

            self.bulker.flush(self.route_api.as_ref()).await;

            let mut default_keys: [Option<NextHopGroupKey>; 2] = [None, None];
            for (seq, entry, ctx) in staged {
                let done = if !ctx.is_set || ctx.excp_intfs_flag {
                    self.remove_route_post(&ctx)
                } else {
                    let done = self.add_route_post(&ctx, &ctx.nhg).await;
                    if ctx.vrf_id == self.default_vrf && ctx.prefix.is_default() {
                        let family = usize::from(!ctx.prefix.address().is_ipv4());
                        default_keys[family] = Some(self.get_synced_route_nhg_key(ctx.vrf_id, &ctx.prefix));
                    }
                    done
                };
                if !done {
                    leftovers.push((seq, entry));
                }
            }
            self.bulker.clear();

            self.release_emptied_vrfs();
            self.retire_reduced_groups().await;

            for (family, key) in default_keys.into_iter().enumerate() {
                if let Some(key) = key.filter(|key| !key.is_empty()) {
                    self.update_default_route_swap_set(&key, family == 0);
                }
            }
        }

        leftovers.sort_by_key(|(seq, _)| *seq);
        self.consumer
            .retry_all(leftovers.into_iter().map(|(_, entry)| entry).collect());
    }

    async fn stage_entry(&mut self, entry: &KeyOpFieldsValues) -> Stage {
        let (vrf_name, prefix) = match parse_route_key(&entry.key) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("RouteOrch: {}", e);
                return Stage::Done;
            }
        };

        let vrf_id = match vrf_name {
            None => self.default_vrf,
            Some(name) => match self.vrfs.vrf_id(name) {
                Some(id) => id,
                None => {
                    debug!("RouteOrch: VRF {} of route {} is not ready", name, entry.key);
                    return Stage::Keep;
                }
            },
        };

        let mut ctx = RouteBulkContext::new(entry.key.clone(), entry.op.is_set(), vrf_id, prefix);

        if entry.op.is_del() {
            return self.stage_removal(ctx);
        }

        let fields = RouteFields::parse(&entry.fvs);
        if fields.nexthop_group.is_some() && (!fields.nexthop.is_empty() || !fields.ifname.is_empty()) {
            error!("RouteOrch: route {} has both nexthop_group and nexthop/ifname", entry.key);
            return Stage::Done;
        }

        ctx.fallback_to_default_route = fields.fallback_to_default_route;
        ctx.nhg_index = fields.nexthop_group.clone();
        ctx.context_index = fields.pic_context_id.clone();
        ctx.protocol = fields
            .protocol
            .clone()
            .unwrap_or_else(|| self.config.default_protocol.clone());

        if let Some(index) = &ctx.nhg_index {
            let Some(group) = self.external_groups.as_ref().and_then(|owner| owner.group(index)) else {
                info!("RouteOrch: next hop group {} of route {} does not exist yet", index, entry.key);
                return Stage::Keep;
            };
            ctx.nhg = group.key;
            ctx.using_temp_nhg = group.is_temp;
        } else {
            match fields.next_hops(&prefix, self.interfaces.as_ref(), self.vrfs.as_ref()) {
                Ok(parsed) => {
                    ctx.nhg = parsed.nhg;
                    ctx.excp_intfs_flag = parsed.exception_interface;
                }
                Err(e) if e.is_retryable() => {
                    info!("RouteOrch: route {} is not ready: {}", entry.key, e);
                    return Stage::Keep;
                }
                Err(e) => {
                    error!("RouteOrch: dropping route {}: {}", entry.key, e);
                    return Stage::Done;
                }
            }
        }

        if ctx.excp_intfs_flag {
            // Such routes are never programmed; drop an installed one.
            debug!("RouteOrch: route {} goes out an exception interface", entry.key);
            return self.stage_removal(ctx);
        }

        if ctx.nhg.len() == 1 && ctx.nhg.has_intf_next_hop() {
            let Some(alias) = ctx.nhg.first().map(|nh| nh.alias().to_string()) else {
                return Stage::Done;
            };
            if alias == "unknown" || alias == "tun0" || alias.starts_with("Vrf") {
                debug!("RouteOrch: skipping route {} on interface {}", entry.key, alias);
                return Stage::Done;
            }
            if prefix.address().scope() != AddrScope::Global {
                debug!("RouteOrch: skipping link local or multicast route {}", entry.key);
                return Stage::Done;
            }
            if prefix.is_full_mask() && self.interfaces.is_prefix_subnet(&prefix, &alias) {
                // Already programmed as the interface's own address.
                self.publish_route_state(&ctx);
                return Stage::Done;
            }
        }

        let wanted = RouteNhg {
            nhg_key: ctx.nhg.clone(),
            nhg_index: ctx.nhg_index.clone(),
            context_index: ctx.context_index.clone(),
        };
        let unchanged = self.route(vrf_id, &prefix) == Some(&wanted);
        let pending_removal = self
            .bulker
            .is_pending_removal(&RouteKey::new(vrf_id, prefix).entry());

        if unchanged && !pending_removal && !ctx.using_temp_nhg {
            self.publish_route_state(&ctx);
            return Stage::Done;
        }

        let nexthops = ctx.nhg.clone();
        self.add_route(&mut ctx, &nexthops).await;
        if ctx.is_staged() {
            Stage::Staged(ctx)
        } else {
            Stage::Keep
        }
    }

    fn stage_removal(&mut self, mut ctx: RouteBulkContext) -> Stage {
        if self.remove_route(&mut ctx) {
            if ctx.is_set {
                self.publish_route_state(&ctx);
            }
            Stage::Done
        } else {
            Stage::Staged(ctx)
        }
    }

    /// Removes the groups and overlay next hops that lost their last route
    /// in this pass.
    async fn retire_reduced_groups(&mut self) {
        let reduced = std::mem::take(&mut self.bulk_nhg_reduced);
        for (key, vrf_id) in reduced {
            if key.is_overlay() && vrf_id != VirtualRouterOid::NULL {
                self.remove_overlay_next_hops(vrf_id, &key);
                continue;
            }
            if self.next_hop_group_ref_count(&key) != Some(0) {
                continue;
            }
            let swapped = self
                .next_hop_group(&key)
                .is_some_and(|entry| entry.is_default_route_swapped());
            if !self.remove_next_hop_group(&key, swapped).await {
                warn!("RouteOrch: next hop group {} will be removed later", key);
            }
        }

        let srv6 = std::mem::take(&mut self.bulk_srv6_reduced);
        if !srv6.is_empty() {
            if let Some(provider) = &self.srv6 {
                if !provider.remove_srv6_next_hops(&srv6) {
                    error!("RouteOrch: failed to remove {} SRv6 next hop sets", srv6.len());
                }
            }
        }
    }
}
