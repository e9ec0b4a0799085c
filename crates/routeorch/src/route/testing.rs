//! Shared fixture for RouteOrch unit tests.
//!
//! Topology: Ethernet0 (10.0.0.0/31, fc00::/126), Ethernet4 (10.0.0.2/31,
//! fc00::4/126) and Ethernet8 (10.0.0.4/31) with resolved neighbors
//! 10.0.0.1, 10.0.0.3, 10.0.0.5 and fc00::2. 10.0.0.9@Ethernet8 is left
//! unresolved.

use sonic_orch_common::{KeyOpFieldsValues, Orch};
use sonic_sai::{RawSaiObjectId, RouteEntry, RouteState, VirtualRouterOid, VirtualSwitch};
use std::sync::Arc;

use super::nexthop::NextHopKey;
use super::nhg::NextHopGroupKey;
use super::orch::{RouteCollaborators, RouteOrch, RouteOrchConfig};
use super::providers::{InterfaceTable, StateTables, VrfTable};
use super::registry::{NextHopRegistry, NeighborTable};

pub(crate) fn nh(s: &str) -> NextHopKey {
    s.parse().unwrap()
}

pub(crate) fn nhg(s: &str) -> NextHopGroupKey {
    s.parse().unwrap()
}

pub(crate) struct Fixture {
    pub switch: Arc<VirtualSwitch>,
    pub neighbors: Arc<NeighborTable>,
    pub interfaces: Arc<InterfaceTable>,
    pub vrfs: Arc<VrfTable>,
    pub state: Arc<StateTables>,
    pub orch: RouteOrch,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(RouteOrchConfig::default()).await
    }

    pub async fn with_config(config: RouteOrchConfig) -> Self {
        Self::with_providers(config, |collaborators| collaborators).await
    }

    pub async fn with_providers(
        config: RouteOrchConfig,
        attach: impl FnOnce(RouteCollaborators) -> RouteCollaborators,
    ) -> Self {
        let switch = Arc::new(VirtualSwitch::new());
        let (collaborators, neighbors, interfaces, vrfs, state) = Self::collaborators(&switch);
        let orch = RouteOrch::new(config, attach(collaborators)).await.unwrap();
        Self {
            switch,
            neighbors,
            interfaces,
            vrfs,
            state,
            orch,
        }
    }

    pub fn collaborators(
        switch: &Arc<VirtualSwitch>,
    ) -> (
        RouteCollaborators,
        Arc<NeighborTable>,
        Arc<InterfaceTable>,
        Arc<VrfTable>,
        Arc<StateTables>,
    ) {
        let interfaces = Arc::new(InterfaceTable::new(switch.clone()));
        interfaces.add_interface(
            "Ethernet0",
            vec!["10.0.0.0/31".parse().unwrap(), "fc00::/126".parse().unwrap()],
        );
        interfaces.add_interface(
            "Ethernet4",
            vec!["10.0.0.2/31".parse().unwrap(), "fc00::4/126".parse().unwrap()],
        );
        interfaces.add_interface("Ethernet8", vec!["10.0.0.4/31".parse().unwrap()]);

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
            interfaces.clone(),
            vrfs.clone(),
            state.clone(),
        );
        (collaborators, neighbors, interfaces, vrfs, state)
    }

    pub fn vrf(&self) -> VirtualRouterOid {
        self.switch.default_virtual_router()
    }

    /// Queues a SET and runs one pass.
    pub async fn set(&mut self, key: &str, fvs: &[(&str, &str)]) {
        let fvs = fvs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect();
        self.orch.add_task(vec![KeyOpFieldsValues::set(key, fvs)]);
        self.orch.do_task().await;
    }

    /// Queues a DEL and runs one pass.
    pub async fn del(&mut self, key: &str) {
        self.orch.add_task(vec![KeyOpFieldsValues::del(key)]);
        self.orch.do_task().await;
    }

    pub async fn route_set(&mut self, key: &str, nexthop: &str, ifname: &str) {
        self.set(key, &[("nexthop", nexthop), ("ifname", ifname)]).await;
    }

    /// Programmed state of a default-VRF route.
    pub fn hw_route(&self, prefix: &str) -> Option<RouteState> {
        self.switch
            .route(&RouteEntry::new(self.vrf(), prefix.parse().unwrap()))
    }

    pub fn nh_id(&self, nexthop: &str) -> RawSaiObjectId {
        self.neighbors.next_hop_id(&nh(nexthop)).unwrap().as_raw()
    }
}
