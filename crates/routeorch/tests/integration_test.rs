//! Integration tests for RouteOrch against the in-memory switch.
//!
//! These tests drive RouteOrch only through its public surface: requests
//! are queued with `add_task`, processed with `Orch::do_task` and checked
//! against the routes and groups the switch ends up with.

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sonic_orch_common::{KeyOpFieldsValues, Orch};
use sonic_routeorch::daemon::{OrchDaemon, OrchDaemonConfig, SharedOrch};
use sonic_routeorch::route::{
    ExternalGroup, ExternalGroupOwner, FineGrainedGroupProvider, FineGrainedNextHop, InterfaceTable,
    NeighborTable, NextHopGroupKey, NextHopKey, NextHopObserver, NextHopRegistry, NextHopUpdate,
    OverlayEndpointManager, RouteCollaborators, RouteOrch, RouteOrchConfig, Srv6NextHopProvider,
    StateTables, VrfTable, APP_ROUTE_TABLE_NAME, RESYNC_KEY,
};
use sonic_sai::{PacketAction, RawSaiObjectId, RouteEntry, RouteState, SaiOp, SaiStatus, VirtualRouterOid, VirtualSwitch};
use sonic_types::{IpAddress, IpPrefix};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn nh(s: &str) -> NextHopKey {
    s.parse().unwrap()
}

fn nhg(s: &str) -> NextHopGroupKey {
    s.parse().unwrap()
}

fn prefix(s: &str) -> IpPrefix {
    s.parse().unwrap()
}

/// A switch with three routed ports and their resolved neighbors.
struct Testbed {
    switch: Arc<VirtualSwitch>,
    neighbors: Arc<NeighborTable>,
    vrfs: Arc<VrfTable>,
    state: Arc<StateTables>,
    orch: RouteOrch,
}

impl Testbed {
    async fn new() -> Self {
        Self::build(RouteOrchConfig::default(), |c| c).await
    }

    async fn build(
        config: RouteOrchConfig,
        attach: impl FnOnce(RouteCollaborators) -> RouteCollaborators,
    ) -> Self {
        let switch = Arc::new(VirtualSwitch::new());

        let interfaces = Arc::new(InterfaceTable::new(switch.clone()));
        interfaces.add_interface("Ethernet0", vec![prefix("10.0.0.0/31"), prefix("fc00::/126")]);
        interfaces.add_interface("Ethernet4", vec![prefix("10.0.0.2/31")]);
        interfaces.add_interface("Ethernet8", vec![prefix("10.0.0.4/31")]);

        let neighbors = Arc::new(NeighborTable::new(switch.clone()));
        for neighbor in ["10.0.0.1@Ethernet0", "10.0.0.3@Ethernet4", "10.0.0.5@Ethernet8", "fc00::2@Ethernet0"] {
            neighbors.add_neighbor(nh(neighbor));
        }

        let vrfs = Arc::new(VrfTable::new(switch.clone()));
        let state = Arc::new(StateTables::new());

        let collaborators = RouteCollaborators::new(
            switch.clone(),
            switch.clone(),
            switch.default_virtual_router(),
            switch.cpu_port(),
            neighbors.clone(),
            interfaces,
            vrfs.clone(),
            state.clone(),
        );
        let orch = RouteOrch::new(config, attach(collaborators)).await.unwrap();

        Self {
            switch,
            neighbors,
            vrfs,
            state,
            orch,
        }
    }

    fn vrf(&self) -> VirtualRouterOid {
        self.switch.default_virtual_router()
    }

    async fn set(&mut self, key: &str, fvs: &[(&str, &str)]) {
        let fvs = fvs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect();
        self.orch.add_task(vec![KeyOpFieldsValues::set(key, fvs)]);
        self.orch.do_task().await;
    }

    async fn del(&mut self, key: &str) {
        self.orch.add_task(vec![KeyOpFieldsValues::del(key)]);
        self.orch.do_task().await;
    }

    fn hw_route(&self, p: &str) -> Option<RouteState> {
        self.switch.route(&RouteEntry::new(self.vrf(), prefix(p)))
    }

    fn nh_id(&self, nexthop: &str) -> RawSaiObjectId {
        self.neighbors.next_hop_id(&nh(nexthop)).unwrap().as_raw()
    }

    fn synced_key(&self, p: &str) -> NextHopGroupKey {
        self.orch.get_synced_route_nhg_key(self.vrf(), &prefix(p))
    }
}

#[tokio::test]
async fn test_route_lifecycle() {
    let mut bed = Testbed::new().await;

    bed.set("10.1.0.0/16", &[("nexthop", "10.0.0.1"), ("ifname", "Ethernet0"), ("protocol", "bgp")])
        .await;
    let hw = bed.hw_route("10.1.0.0/16").unwrap();
    assert_eq!(hw.packet_action, PacketAction::Forward);
    assert_eq!(hw.next_hop, bed.nh_id("10.0.0.1@Ethernet0"));
    assert_eq!(bed.neighbors.next_hop_ref_count(&nh("10.0.0.1@Ethernet0")), 1);
    assert_eq!(
        bed.state.field(APP_ROUTE_TABLE_NAME, "10.1.0.0/16", "protocol"),
        Some("bgp".to_string())
    );
    assert_eq!(
        bed.orch.routes_for_next_hop(&nh("10.0.0.1@Ethernet0")).len(),
        1
    );

    // Move to another next hop.
    bed.set("10.1.0.0/16", &[("nexthop", "10.0.0.3"), ("ifname", "Ethernet4")])
        .await;
    assert_eq!(bed.hw_route("10.1.0.0/16").unwrap().next_hop, bed.nh_id("10.0.0.3@Ethernet4"));
    assert_eq!(bed.neighbors.next_hop_ref_count(&nh("10.0.0.1@Ethernet0")), 0);
    assert_eq!(bed.neighbors.next_hop_ref_count(&nh("10.0.0.3@Ethernet4")), 1);
    assert!(bed.orch.routes_for_next_hop(&nh("10.0.0.1@Ethernet0")).is_empty());

    bed.del("10.1.0.0/16").await;
    assert!(bed.hw_route("10.1.0.0/16").is_none());
    assert!(!bed.orch.is_route_exists(&prefix("10.1.0.0/16")));
    assert_eq!(bed.neighbors.next_hop_ref_count(&nh("10.0.0.3@Ethernet4")), 0);
    assert!(bed.state.get(APP_ROUTE_TABLE_NAME, "10.1.0.0/16").is_none());
    assert!(!bed.orch.has_pending_tasks());
}

#[tokio::test]
async fn test_ecmp_groups_shared_grown_and_shrunk() {
    let mut bed = Testbed::new().await;
    let two = nhg("10.0.0.1@Ethernet0,10.0.0.3@Ethernet4");
    let three = nhg("10.0.0.1@Ethernet0,10.0.0.3@Ethernet4,10.0.0.5@Ethernet8");

    bed.set("10.1.0.0/16", &[("nexthop", "10.0.0.1,10.0.0.3"), ("ifname", "Ethernet0,Ethernet4")])
        .await;
    bed.set("10.2.0.0/16", &[("nexthop", "10.0.0.1,10.0.0.3"), ("ifname", "Ethernet0,Ethernet4")])
        .await;

    // Both routes share one group.
    assert_eq!(bed.orch.nhg_count(), 1);
    assert_eq!(bed.orch.next_hop_group_ref_count(&two), Some(2));
    let group = bed.orch.next_hop_group(&two).unwrap().id();
    assert_eq!(bed.hw_route("10.1.0.0/16").unwrap().next_hop, group.as_raw());
    assert_eq!(bed.hw_route("10.2.0.0/16").unwrap().next_hop, group.as_raw());
    assert_eq!(bed.switch.next_hop_group_members(group).len(), 2);

    // Growing one route creates a new group and keeps the shared one.
    bed.set(
        "10.2.0.0/16",
        &[("nexthop", "10.0.0.1,10.0.0.3,10.0.0.5"), ("ifname", "Ethernet0,Ethernet4,Ethernet8")],
    )
    .await;
    assert_eq!(bed.orch.nhg_count(), 2);
    assert_eq!(bed.orch.next_hop_group_ref_count(&two), Some(1));
    assert_eq!(bed.orch.next_hop_group_ref_count(&three), Some(1));

    // Shrinking the other to a single next hop retires the shared group.
    bed.set("10.1.0.0/16", &[("nexthop", "10.0.0.1"), ("ifname", "Ethernet0")])
        .await;
    assert!(!bed.orch.has_next_hop_group(&two));
    assert_eq!(bed.switch.next_hop_group_count(), 1);
    assert_eq!(bed.hw_route("10.1.0.0/16").unwrap().next_hop, bed.nh_id("10.0.0.1@Ethernet0"));

    bed.del("10.2.0.0/16").await;
    assert_eq!(bed.orch.nhg_count(), 0);
    assert_eq!(bed.switch.next_hop_group_member_count(), 0);
}

#[tokio::test]
async fn test_blackhole_route() {
    let mut bed = Testbed::new().await;

    bed.set("10.3.0.0/16", &[("blackhole", "true")]).await;
    let hw = bed.hw_route("10.3.0.0/16").unwrap();
    assert_eq!(hw.packet_action, PacketAction::Drop);
    assert!(bed.orch.route(bed.vrf(), &prefix("10.3.0.0/16")).unwrap().is_blackhole());

    // Un-blackholing forwards again.
    bed.set("10.3.0.0/16", &[("nexthop", "10.0.0.5"), ("ifname", "Ethernet8")])
        .await;
    let hw = bed.hw_route("10.3.0.0/16").unwrap();
    assert_eq!(hw.packet_action, PacketAction::Forward);
    assert_eq!(hw.next_hop, bed.nh_id("10.0.0.5@Ethernet8"));
}

#[tokio::test]
async fn test_vrf_routes_hold_vrf_reference() {
    let mut bed = Testbed::new().await;
    let red = bed.vrfs.add_vrf("Vrf-red");

    bed.set("Vrf-red:10.1.0.0/16", &[("nexthop", "10.0.0.1"), ("ifname", "Ethernet0")])
        .await;
    bed.set("Vrf-red:10.2.0.0/16", &[("nexthop", "10.0.0.3"), ("ifname", "Ethernet4")])
        .await;
    assert_eq!(bed.vrfs.ref_count(red), 1);
    assert_eq!(bed.orch.routes(red).map(|table| table.len()), Some(2));
    assert!(bed.switch.has_route(&RouteEntry::new(red, prefix("10.1.0.0/16"))));

    bed.del("Vrf-red:10.1.0.0/16").await;
    assert_eq!(bed.vrfs.ref_count(red), 1);
    bed.del("Vrf-red:10.2.0.0/16").await;
    assert!(bed.orch.routes(red).is_none());
    assert_eq!(bed.vrfs.ref_count(red), 0);
    assert!(bed.vrfs.remove_vrf("Vrf-red"));
}

#[tokio::test]
async fn test_group_falls_back_to_default_route_next_hops() {
    let mut bed = Testbed::new().await;
    let key = nhg("10.0.0.1@Ethernet0,10.0.0.3@Ethernet4");

    bed.set("0.0.0.0/0", &[("nexthop", "10.0.0.5"), ("ifname", "Ethernet8")])
        .await;
    bed.set(
        "10.4.0.0/16",
        &[
            ("nexthop", "10.0.0.1,10.0.0.3"),
            ("ifname", "Ethernet0,Ethernet4"),
            ("fallback_to_default_route", "true"),
        ],
    )
    .await;
    let group = bed.orch.next_hop_group(&key).unwrap();
    assert!(group.is_eligible_for_default_route_swap());
    let group = group.id();

    for down in ["10.0.0.1@Ethernet0", "10.0.0.3@Ethernet4"] {
        bed.neighbors.set_if_down(&nh(down), true);
        assert!(bed.orch.invalid_next_hop_in_groups(&nh(down)).await);
    }

    let members = bed.switch.next_hop_group_members(group);
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].next_hop.as_raw(), bed.nh_id("10.0.0.5@Ethernet8"));
    assert!(bed.orch.next_hop_group(&key).unwrap().is_default_route_swapped());

    // The swapped group goes away with its last route.
    bed.del("10.4.0.0/16").await;
    assert!(!bed.orch.has_next_hop_group(&key));
    assert_eq!(bed.switch.next_hop_group_member_count(), 0);
    assert_eq!(bed.neighbors.next_hop_ref_count(&nh("10.0.0.5@Ethernet8")), 1);
}

#[tokio::test]
async fn test_temporary_route_is_deterministic_with_seed() {
    let config = RouteOrchConfig {
        max_nhg_count: 1,
        rng_seed: Some(42),
        ..Default::default()
    };

    let mut picks = BTreeSet::new();
    for _ in 0..2 {
        let mut bed = Testbed::build(config.clone(), |c| c).await;
        bed.set("10.1.0.0/16", &[("nexthop", "10.0.0.1,10.0.0.3"), ("ifname", "Ethernet0,Ethernet4")])
            .await;
        bed.set("10.2.0.0/16", &[("nexthop", "10.0.0.3,10.0.0.5"), ("ifname", "Ethernet4,Ethernet8")])
            .await;

        let key = bed.synced_key("10.2.0.0/16");
        assert_eq!(key.len(), 1);
        assert!(bed.orch.has_pending_tasks());
        picks.insert(key);
    }
    assert_eq!(picks.len(), 1);
}

#[tokio::test]
async fn test_resync_removes_only_stale_routes() {
    let mut bed = Testbed::new().await;
    bed.set("10.1.0.0/16", &[("nexthop", "10.0.0.1"), ("ifname", "Ethernet0")])
        .await;
    bed.set("10.2.0.0/16", &[("nexthop", "10.0.0.1,10.0.0.3"), ("ifname", "Ethernet0,Ethernet4")])
        .await;
    bed.set("10.3.0.0/16", &[("nexthop", "10.0.0.5"), ("ifname", "Ethernet8")])
        .await;
    bed.switch.reset_op_counts();

    bed.orch.add_task(vec![
        KeyOpFieldsValues::set(RESYNC_KEY, vec![]),
        KeyOpFieldsValues::set(
            "10.1.0.0/16",
            vec![
                ("nexthop".to_string(), "10.0.0.1".to_string()),
                ("ifname".to_string(), "Ethernet0".to_string()),
            ],
        ),
        KeyOpFieldsValues::set(
            "10.2.0.0/16",
            vec![
                ("nexthop".to_string(), "10.0.0.1,10.0.0.3".to_string()),
                ("ifname".to_string(), "Ethernet0,Ethernet4".to_string()),
            ],
        ),
    ]);
    bed.orch.do_task().await;
    assert_eq!(bed.switch.total_op_count(), 0);

    bed.del(RESYNC_KEY).await;
    assert!(!bed.orch.has_pending_tasks());
    assert!(bed.hw_route("10.1.0.0/16").is_some());
    assert!(bed.hw_route("10.2.0.0/16").is_some());
    assert!(bed.hw_route("10.3.0.0/16").is_none());
    assert_eq!(bed.switch.op_count(SaiOp::RemoveRoute), 1);
    assert_eq!(bed.switch.op_count(SaiOp::CreateNextHopGroup), 0);
    assert_eq!(bed.switch.op_count(SaiOp::RemoveNextHopGroup), 0);
}

#[derive(Default)]
struct RecordingObserver {
    updates: Mutex<Vec<NextHopUpdate>>,
}

impl NextHopObserver for RecordingObserver {
    fn update(&self, update: &NextHopUpdate) {
        self.updates.lock().push(update.clone());
    }
}

impl RecordingObserver {
    fn last(&self) -> Option<(IpPrefix, NextHopGroupKey)> {
        self.updates
            .lock()
            .last()
            .map(|update| (update.prefix, update.nexthop_group.clone()))
    }
}

#[tokio::test]
async fn test_observer_follows_longest_match() {
    let mut bed = Testbed::new().await;
    bed.set("10.1.0.0/16", &[("nexthop", "10.0.0.1"), ("ifname", "Ethernet0")])
        .await;

    let recorder = Arc::new(RecordingObserver::default());
    let observer: Arc<dyn NextHopObserver> = recorder.clone();
    let destination: IpAddress = "10.1.2.3".parse().unwrap();
    assert!(bed.orch.attach(observer.clone(), destination, bed.vrf()));
    assert_eq!(recorder.last(), Some((prefix("10.1.0.0/16"), nhg("10.0.0.1@Ethernet0"))));

    bed.set("10.1.2.0/24", &[("nexthop", "10.0.0.3"), ("ifname", "Ethernet4")])
        .await;
    assert_eq!(recorder.last(), Some((prefix("10.1.2.0/24"), nhg("10.0.0.3@Ethernet4"))));

    // A covering but shorter route is not reported.
    bed.set("10.0.0.0/8", &[("nexthop", "10.0.0.5"), ("ifname", "Ethernet8")])
        .await;
    assert_eq!(recorder.updates.lock().len(), 2);

    bed.del("10.1.2.0/24").await;
    assert_eq!(recorder.last(), Some((prefix("10.1.0.0/16"), nhg("10.0.0.1@Ethernet0"))));

    assert!(bed.orch.detach(&observer, &destination, bed.vrf()));
    bed.del("10.1.0.0/16").await;
    assert_eq!(recorder.updates.lock().len(), 3);
}

#[tokio::test]
async fn test_failed_operations_are_retried() {
    let mut bed = Testbed::new().await;
    let key = nhg("10.0.0.1@Ethernet0,10.0.0.3@Ethernet4");

    bed.switch
        .inject_failure(SaiOp::CreateNextHopGroup, SaiStatus::InsufficientResources);
    bed.set("10.1.0.0/16", &[("nexthop", "10.0.0.1,10.0.0.3"), ("ifname", "Ethernet0,Ethernet4")])
        .await;
    assert!(bed.orch.has_pending_tasks());
    assert!(!bed.orch.has_next_hop_group(&key));

    bed.orch.do_task().await;
    assert!(!bed.orch.has_pending_tasks());
    assert!(bed.orch.has_next_hop_group(&key));

    bed.switch
        .inject_failure(SaiOp::RemoveRoute, SaiStatus::InsufficientResources);
    bed.del("10.1.0.0/16").await;
    assert!(bed.orch.has_pending_tasks());
    assert!(bed.hw_route("10.1.0.0/16").is_some());

    bed.orch.do_task().await;
    assert!(!bed.orch.has_pending_tasks());
    assert!(bed.hw_route("10.1.0.0/16").is_none());
    assert!(!bed.orch.has_next_hop_group(&key));
}

/// External owner with one group per index and a reference count each.
#[derive(Default)]
struct FakeGroupOwner {
    groups: Mutex<BTreeMap<String, ExternalGroup>>,
    refs: Mutex<BTreeMap<String, u32>>,
}

impl FakeGroupOwner {
    fn add(&self, index: &str, key: &str, id: RawSaiObjectId) {
        self.groups.lock().insert(
            index.to_string(),
            ExternalGroup {
                key: nhg(key),
                id,
                is_temp: false,
            },
        );
    }

    fn refs(&self, index: &str) -> u32 {
        self.refs.lock().get(index).copied().unwrap_or(0)
    }
}

impl ExternalGroupOwner for FakeGroupOwner {
    fn group(&self, index: &str) -> Option<ExternalGroup> {
        self.groups.lock().get(index).cloned()
    }

    fn increase_ref_count(&self, index: &str) {
        *self.refs.lock().entry(index.to_string()).or_default() += 1;
    }

    fn decrease_ref_count(&self, index: &str) {
        if let Some(count) = self.refs.lock().get_mut(index) {
            *count = count.saturating_sub(1);
        }
    }

    fn synced_group_count(&self) -> usize {
        self.groups.lock().len()
    }
}

#[tokio::test]
async fn test_route_with_external_group() {
    let owner = Arc::new(FakeGroupOwner::default());
    let attached: Arc<dyn ExternalGroupOwner> = owner.clone();
    let mut bed = Testbed::build(RouteOrchConfig::default(), move |c| c.with_external_groups(attached)).await;

    // Unknown index waits for the owner.
    bed.set("10.6.0.0/16", &[("nexthop_group", "group1")]).await;
    assert!(bed.orch.has_pending_tasks());
    assert!(bed.hw_route("10.6.0.0/16").is_none());

    owner.add("group1", "10.0.0.1@Ethernet0,10.0.0.3@Ethernet4", 0x9001);
    bed.orch.do_task().await;
    assert!(!bed.orch.has_pending_tasks());
    assert_eq!(bed.hw_route("10.6.0.0/16").unwrap().next_hop, 0x9001);
    assert_eq!(owner.refs("group1"), 1);
    // RouteOrch owns none of it.
    assert_eq!(bed.orch.nhg_count(), 0);

    bed.del("10.6.0.0/16").await;
    assert!(bed.hw_route("10.6.0.0/16").is_none());
    assert_eq!(owner.refs("group1"), 0);
}

/// Fine-grained provider claiming a single prefix.
struct FakeFineGrained {
    claimed: IpPrefix,
    installed: Mutex<BTreeSet<IpPrefix>>,
}

impl FineGrainedGroupProvider for FakeFineGrained {
    fn is_route_fine_grained(&self, _vrf_id: VirtualRouterOid, prefix: &IpPrefix, _nexthops: &NextHopGroupKey) -> bool {
        *prefix == self.claimed
    }

    fn set_fine_grained_group(
        &self,
        _vrf_id: VirtualRouterOid,
        prefix: &IpPrefix,
        _nexthops: &NextHopGroupKey,
    ) -> Option<FineGrainedNextHop> {
        let id_changed = self.installed.lock().insert(*prefix);
        Some(FineGrainedNextHop {
            next_hop_id: 0x7001,
            id_changed,
        })
    }

    fn contains_fine_grained_group(&self, _vrf_id: VirtualRouterOid, prefix: &IpPrefix) -> bool {
        self.installed.lock().contains(prefix)
    }

    fn remove_fine_grained_group(&self, _vrf_id: VirtualRouterOid, prefix: &IpPrefix) -> bool {
        self.installed.lock().remove(prefix)
    }
}

#[tokio::test]
async fn test_fine_grained_route() {
    let provider = Arc::new(FakeFineGrained {
        claimed: prefix("10.7.0.0/16"),
        installed: Mutex::new(BTreeSet::new()),
    });
    let attached: Arc<dyn FineGrainedGroupProvider> = provider.clone();
    let mut bed = Testbed::build(RouteOrchConfig::default(), move |c| c.with_fine_grained(attached)).await;

    bed.set("10.7.0.0/16", &[("nexthop", "10.0.0.1,10.0.0.3"), ("ifname", "Ethernet0,Ethernet4")])
        .await;
    assert_eq!(bed.hw_route("10.7.0.0/16").unwrap().next_hop, 0x7001);
    assert_eq!(bed.orch.nhg_count(), 0);

    // Member changes keep the fine-grained object.
    bed.switch.reset_op_counts();
    bed.set(
        "10.7.0.0/16",
        &[("nexthop", "10.0.0.1,10.0.0.3,10.0.0.5"), ("ifname", "Ethernet0,Ethernet4,Ethernet8")],
    )
    .await;
    assert_eq!(bed.switch.op_count(SaiOp::SetRoute), 0);
    assert_eq!(
        bed.synced_key("10.7.0.0/16"),
        nhg("10.0.0.1@Ethernet0,10.0.0.3@Ethernet4,10.0.0.5@Ethernet8")
    );

    bed.del("10.7.0.0/16").await;
    assert!(bed.hw_route("10.7.0.0/16").is_none());
    assert!(provider.installed.lock().is_empty());
}

/// Remote endpoints created per (VRF, next hop).
#[derive(Default)]
struct FakeVteps {
    endpoints: Mutex<BTreeSet<String>>,
}

impl OverlayEndpointManager for FakeVteps {
    fn create_remote_vtep(&self, _vrf_id: VirtualRouterOid, nexthop: &NextHopKey) -> bool {
        self.endpoints.lock().insert(nexthop.to_string());
        true
    }

    fn remove_remote_vtep(&self, _vrf_id: VirtualRouterOid, nexthop: &NextHopKey) -> bool {
        self.endpoints.lock().remove(&nexthop.to_string())
    }
}

#[tokio::test]
async fn test_overlay_route_owns_tunnel_next_hop() {
    let vteps = Arc::new(FakeVteps::default());
    let attached: Arc<dyn OverlayEndpointManager> = vteps.clone();
    let mut bed = Testbed::build(RouteOrchConfig::default(), move |c| c.with_overlay(attached)).await;
    bed.vrfs.add_l3_vni(1000);

    bed.set(
        "10.8.0.0/16",
        &[
            ("nexthop", "192.168.1.1"),
            ("ifname", "Vlan1000"),
            ("vni_label", "1000"),
            ("router_mac", "00:11:22:33:44:55"),
        ],
    )
    .await;
    assert!(!bed.orch.has_pending_tasks());
    assert_eq!(vteps.endpoints.lock().len(), 1);

    let key = bed.synced_key("10.8.0.0/16");
    assert!(key.is_overlay());
    let tunnel = key.first().unwrap().clone();
    assert_eq!(
        bed.hw_route("10.8.0.0/16").unwrap().next_hop,
        bed.neighbors.next_hop_id(&tunnel).unwrap().as_raw()
    );
    assert_eq!(bed.neighbors.next_hop_ref_count(&tunnel), 1);

    bed.del("10.8.0.0/16").await;
    assert!(bed.hw_route("10.8.0.0/16").is_none());
    assert!(!bed.neighbors.has_next_hop(&tunnel));
    assert!(vteps.endpoints.lock().is_empty());

    // Routes on a VNI that is not yet an L3 VNI wait for it.
    bed.set(
        "10.9.0.0/16",
        &[
            ("nexthop", "192.168.1.1"),
            ("ifname", "Vlan2000"),
            ("vni_label", "2000"),
            ("router_mac", "00:11:22:33:44:55"),
        ],
    )
    .await;
    assert!(bed.orch.has_pending_tasks());
    assert!(bed.hw_route("10.9.0.0/16").is_none());

    bed.vrfs.add_l3_vni(2000);
    bed.orch.do_task().await;
    assert!(!bed.orch.has_pending_tasks());
    assert!(bed.hw_route("10.9.0.0/16").is_some());
}

/// SRv6 provider handing out one handle per next-hop set.
#[derive(Default)]
struct FakeSrv6 {
    next_hops: Mutex<BTreeMap<NextHopGroupKey, RawSaiObjectId>>,
    removed: Mutex<Vec<NextHopGroupKey>>,
}

impl Srv6NextHopProvider for FakeSrv6 {
    fn srv6_next_hops(&self, nexthops: &NextHopGroupKey) -> Option<RawSaiObjectId> {
        let mut next_hops = self.next_hops.lock();
        let id = 0x5000 + next_hops.len() as RawSaiObjectId + 1;
        Some(*next_hops.entry(nexthops.clone()).or_insert(id))
    }

    fn remove_srv6_next_hops(&self, nexthops: &[NextHopGroupKey]) -> bool {
        let mut next_hops = self.next_hops.lock();
        for key in nexthops {
            next_hops.remove(key);
        }
        self.removed.lock().extend(nexthops.iter().cloned());
        true
    }

    fn context_exists(&self, _context_index: &str) -> bool {
        false
    }

    fn agg_id_for_next_hops(&self, _nexthops: &NextHopGroupKey) -> u32 {
        0
    }

    fn agg_id_for_context(&self, _context_index: &str) -> u32 {
        0
    }

    fn increase_context_ref_count(&self, _context_index: &str) {}

    fn decrease_context_ref_count(&self, _context_index: &str) {}
}

#[tokio::test]
async fn test_srv6_route_uses_provider_next_hop() {
    let srv6 = Arc::new(FakeSrv6::default());
    let attached: Arc<dyn Srv6NextHopProvider> = srv6.clone();
    let mut bed = Testbed::build(RouteOrchConfig::default(), move |c| c.with_srv6(attached)).await;

    bed.set("10.10.0.0/16", &[("segment", "fc00:1::1"), ("seg_src", "fc00::100")])
        .await;
    assert!(!bed.orch.has_pending_tasks());
    let key = bed.synced_key("10.10.0.0/16");
    assert!(key.is_srv6());
    assert_eq!(bed.hw_route("10.10.0.0/16").unwrap().next_hop, srv6.next_hops.lock()[&key]);

    bed.del("10.10.0.0/16").await;
    assert!(bed.hw_route("10.10.0.0/16").is_none());
    assert_eq!(*srv6.removed.lock(), vec![key]);
    assert!(srv6.next_hops.lock().is_empty());
}

#[tokio::test]
async fn test_daemon_drives_route_orch() {
    let bed = Testbed::new().await;
    let hw_switch = bed.switch.clone();
    let vrf = bed.vrf();
    let orch = Arc::new(tokio::sync::Mutex::new(bed.orch));

    let mut daemon = OrchDaemon::new(OrchDaemonConfig::default());
    let shared: SharedOrch = orch.clone();
    daemon.register_orch(shared).await;

    orch.lock().await.add_task(vec![
        KeyOpFieldsValues::set(
            "10.1.0.0/16",
            vec![
                ("nexthop".to_string(), "10.0.0.1".to_string()),
                ("ifname".to_string(), "Ethernet0".to_string()),
            ],
        ),
        KeyOpFieldsValues::set(
            "10.2.0.0/16",
            vec![
                ("nexthop".to_string(), "10.0.0.3".to_string()),
            ],
        ),
    ]);
    daemon.run_until_idle().await;

    assert!(!daemon.has_pending_tasks().await);
    assert!(hw_switch.has_route(&RouteEntry::new(vrf, prefix("10.1.0.0/16"))));
    // A route without ifname is dropped, not queued.
    assert!(!hw_switch.has_route(&RouteEntry::new(vrf, prefix("10.2.0.0/16"))));
}
