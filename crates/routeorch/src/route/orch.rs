//! RouteOrch implementation.
//!
//! RouteOrch owns the route tables and the next-hop groups it creates, and
//! keeps the switch in line with the route requests queued on its consumer.
//! Requests are staged into an [`EntityBulker`], flushed once per chunk and
//! settled from the per-request status slots; anything that cannot complete
//! stays queued for the next round.

use async_trait::async_trait;
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use sonic_orch_common::{Consumer, ConsumerConfig, KeyOpFieldsValues, Orch, SyncMapError};
use sonic_sai::{
    EntityBulker, NextHopGroupApi, PacketAction, PortOid, RouteApi, RouteAttribute, RouteEntry,
    SaiStatus, VirtualRouterOid,
};
use sonic_types::{IpAddress, IpPrefix, Ipv6Address, MacAddress, ParseError};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::nexthop::NextHopKey;
use super::nhg::{NextHopGroupKey, NextHopGroupTable};
use super::observer::{NextHopObserver, NextHopObserverRegistry};
use super::providers::{
    ExternalGroupOwner, FineGrainedGroupProvider, InterfaceDirectory, OverlayEndpointManager,
    Srv6NextHopProvider, StatePublisher, VrfDirectory,
};
use super::registry::{NextHopRegistry, RoutesByNextHop};
use super::request::RouteBulkContext;
use super::types::{RouteKey, RouteNhg, RouteTable, RouteTables};

/// Application table holding route requests and their published state.
pub const APP_ROUTE_TABLE_NAME: &str = "ROUTE_TABLE";

/// State table reporting whether a default route forwards traffic.
pub const STATE_ROUTE_TABLE_NAME: &str = "STATE_ROUTE_TABLE";

/// Error type for RouteOrch operations.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Failed to create {prefix} default route: {status}")]
    DefaultRoute { prefix: IpPrefix, status: SaiStatus },

    #[error("Failed to program link-local route {prefix}: {status}")]
    LinkLocalRoute { prefix: IpPrefix, status: SaiStatus },

    #[error("Reference count error for {key}")]
    RefCount {
        key: String,
        #[source]
        source: SyncMapError,
    },

    #[error("Next-hop not resolved: {0}")]
    NextHopNotResolved(String),

    #[error("Failed to update route {route}: {status}")]
    RouteUpdate { route: RouteKey, status: SaiStatus },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Result type for RouteOrch operations.
pub type Result<T> = std::result::Result<T, RouteError>;

/// Configuration for RouteOrch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouteOrchConfig {
    /// Maximum number of next-hop groups the switch supports.
    pub max_nhg_count: usize,
    /// Create groups as ordered ECMP with per-member sequence ids.
    pub ordered_ecmp: bool,
    /// Platform name; some platforms share the group space with other
    /// features.
    pub platform: Option<String>,
    /// Protocol published for requests that name none.
    pub default_protocol: String,
    /// Seed for temporary next-hop selection. Random when unset.
    pub rng_seed: Option<u64>,
    /// Switch MAC; when set, link-local routes to the CPU are programmed.
    pub switch_mac: Option<MacAddress>,
}

impl Default for RouteOrchConfig {
    fn default() -> Self {
        Self {
            max_nhg_count: 128,
            ordered_ecmp: false,
            platform: None,
            default_protocol: String::new(),
            rng_seed: None,
            switch_mac: None,
        }
    }
}

impl RouteOrchConfig {
    /// Group capacity left to RouteOrch on this platform.
    pub fn effective_max_nhg_count(&self) -> usize {
        match self.platform.as_deref() {
            Some("mellanox") => self.max_nhg_count / 32,
            _ => self.max_nhg_count,
        }
    }
}

/// Switch APIs and the directories RouteOrch depends on.
#[derive(Clone)]
pub struct RouteCollaborators {
    pub route_api: Arc<dyn RouteApi>,
    pub nhg_api: Arc<dyn NextHopGroupApi>,
    pub default_vrf: VirtualRouterOid,
    pub cpu_port: PortOid,
    pub neighbors: Arc<dyn NextHopRegistry>,
    pub interfaces: Arc<dyn InterfaceDirectory>,
    pub vrfs: Arc<dyn VrfDirectory>,
    pub publisher: Arc<dyn StatePublisher>,
    pub external_groups: Option<Arc<dyn ExternalGroupOwner>>,
    pub fine_grained: Option<Arc<dyn FineGrainedGroupProvider>>,
    pub overlay: Option<Arc<dyn OverlayEndpointManager>>,
    pub srv6: Option<Arc<dyn Srv6NextHopProvider>>,
}

impl RouteCollaborators {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        route_api: Arc<dyn RouteApi>,
        nhg_api: Arc<dyn NextHopGroupApi>,
        default_vrf: VirtualRouterOid,
        cpu_port: PortOid,
        neighbors: Arc<dyn NextHopRegistry>,
        interfaces: Arc<dyn InterfaceDirectory>,
        vrfs: Arc<dyn VrfDirectory>,
        publisher: Arc<dyn StatePublisher>,
    ) -> Self {
        Self {
            route_api,
            nhg_api,
            default_vrf,
            cpu_port,
            neighbors,
            interfaces,
            vrfs,
            publisher,
            external_groups: None,
            fine_grained: None,
            overlay: None,
            srv6: None,
        }
    }

    pub fn with_external_groups(mut self, owner: Arc<dyn ExternalGroupOwner>) -> Self {
        self.external_groups = Some(owner);
        self
    }

    pub fn with_fine_grained(mut self, provider: Arc<dyn FineGrainedGroupProvider>) -> Self {
        self.fine_grained = Some(provider);
        self
    }

    pub fn with_overlay(mut self, manager: Arc<dyn OverlayEndpointManager>) -> Self {
        self.overlay = Some(manager);
        self
    }

    pub fn with_srv6(mut self, provider: Arc<dyn Srv6NextHopProvider>) -> Self {
        self.srv6 = Some(provider);
        self
    }
}

/// RouteOrch - Manages IP route programming.
pub struct RouteOrch {
    pub(super) config: RouteOrchConfig,

    /// Consumer for ROUTE_TABLE.
    pub(super) consumer: Consumer,

    pub(super) route_api: Arc<dyn RouteApi>,
    pub(super) nhg_api: Arc<dyn NextHopGroupApi>,
    pub(super) default_vrf: VirtualRouterOid,
    pub(super) cpu_port: PortOid,

    pub(super) neighbors: Arc<dyn NextHopRegistry>,
    pub(super) interfaces: Arc<dyn InterfaceDirectory>,
    pub(super) vrfs: Arc<dyn VrfDirectory>,
    pub(super) publisher: Arc<dyn StatePublisher>,
    pub(super) external_groups: Option<Arc<dyn ExternalGroupOwner>>,
    pub(super) fine_grained: Option<Arc<dyn FineGrainedGroupProvider>>,
    pub(super) overlay: Option<Arc<dyn OverlayEndpointManager>>,
    pub(super) srv6: Option<Arc<dyn Srv6NextHopProvider>>,

    /// Synced routes indexed by VRF ID and prefix.
    pub(super) synced_routes: RouteTables,

    /// Next-hop groups created by RouteOrch.
    pub(super) synced_nhgs: NextHopGroupTable,

    pub(super) routes_by_next_hop: RoutesByNextHop,
    pub(super) observers: NextHopObserverRegistry,
    pub(super) bulker: EntityBulker,

    /// A resync is open; requests wait until it completes.
    pub(super) resync: bool,
    /// Keys marked for removal when the resync started.
    pub(super) dirty_keys: BTreeSet<String>,

    /// Groups that lost their last route in the current chunk, with the VRF
    /// of overlay next hops (null otherwise).
    pub(super) bulk_nhg_reduced: BTreeSet<(NextHopGroupKey, VirtualRouterOid)>,
    pub(super) bulk_srv6_reduced: Vec<NextHopGroupKey>,
    /// VRFs whose last route was removed in the current chunk.
    pub(super) bulk_vrf_emptied: BTreeSet<VirtualRouterOid>,

    /// Next hops of the default routes, swapped into eligible groups whose
    /// members all went down.
    pub(super) v4_default_nexthops: BTreeSet<NextHopKey>,
    pub(super) v6_default_nexthops: BTreeSet<NextHopKey>,

    pub(super) rng: StdRng,
}

impl RouteOrch {
    /// Creates RouteOrch and programs the drop default routes of the
    /// default VRF.
    pub async fn new(config: RouteOrchConfig, collaborators: RouteCollaborators) -> Result<Self> {
        let max_nhg_count = config.effective_max_nhg_count();
        info!("RouteOrch: maximum number of ECMP groups supported is {}", max_nhg_count);

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut orch = Self {
            consumer: Consumer::new(ConsumerConfig::new(APP_ROUTE_TABLE_NAME).with_priority(10)),
            route_api: collaborators.route_api,
            nhg_api: collaborators.nhg_api,
            default_vrf: collaborators.default_vrf,
            cpu_port: collaborators.cpu_port,
            neighbors: collaborators.neighbors,
            interfaces: collaborators.interfaces,
            vrfs: collaborators.vrfs,
            publisher: collaborators.publisher,
            external_groups: collaborators.external_groups,
            fine_grained: collaborators.fine_grained,
            overlay: collaborators.overlay,
            srv6: collaborators.srv6,
            synced_routes: RouteTables::new(),
            synced_nhgs: NextHopGroupTable::new(max_nhg_count),
            routes_by_next_hop: RoutesByNextHop::new(),
            observers: NextHopObserverRegistry::new(),
            bulker: EntityBulker::new(),
            resync: false,
            dirty_keys: BTreeSet::new(),
            bulk_nhg_reduced: BTreeSet::new(),
            bulk_srv6_reduced: Vec::new(),
            bulk_vrf_emptied: BTreeSet::new(),
            v4_default_nexthops: BTreeSet::new(),
            v6_default_nexthops: BTreeSet::new(),
            rng,
            config,
        };

        for prefix in [IpPrefix::DEFAULT_V4, IpPrefix::DEFAULT_V6] {
            orch.update_default_route_state(&prefix, false);

            let entry = RouteEntry::new(orch.default_vrf, prefix);
            let status = orch
                .route_api
                .create_route_entry(&entry, vec![RouteAttribute::PacketAction(PacketAction::Drop)])
                .await;
            if !status.is_success() {
                error!("RouteOrch: failed to create {} default route with packet action drop", prefix);
                return Err(RouteError::DefaultRoute { prefix, status });
            }

            orch.synced_routes
                .entry(orch.default_vrf)
                .or_default()
                .insert(prefix, RouteNhg::default());
            info!("RouteOrch: created {} default route with packet action drop", prefix);
        }

        if let Some(mac) = orch.config.switch_mac {
            let vrf = orch.default_vrf;
            let eui64 = IpPrefix::new(link_local_eui64_addr(&mac), 128)?;
            orch.add_link_local_route_to_me(vrf, eui64).await?;

            let fe80 = IpAddress::V6(Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 0));
            orch.add_link_local_route_to_me(vrf, IpPrefix::new(fe80, 10)?).await?;
        }

        Ok(orch)
    }

    /// Queues route requests.
    pub fn add_task(&mut self, entries: Vec<KeyOpFieldsValues>) {
        self.consumer.add_to_sync(entries);
    }

    pub fn pending_count(&self) -> usize {
        self.consumer.pending_count()
    }

    pub fn config(&self) -> &RouteOrchConfig {
        &self.config
    }

    pub fn default_vrf(&self) -> VirtualRouterOid {
        self.default_vrf
    }

    /// Routes of one VRF, if it has any.
    pub fn routes(&self, vrf_id: VirtualRouterOid) -> Option<&RouteTable> {
        self.synced_routes.get(&vrf_id)
    }

    pub fn route(&self, vrf_id: VirtualRouterOid, prefix: &IpPrefix) -> Option<&RouteNhg> {
        self.synced_routes.get(&vrf_id)?.get(prefix)
    }

    /// Number of VRFs with a route table.
    pub fn vrf_count(&self) -> usize {
        self.synced_routes.len()
    }

    /// Returns true if the route is installed or about to be created.
    ///
    /// Answers true while the default VRF has no table at all.
    pub fn is_route_exists(&self, prefix: &IpPrefix) -> bool {
        let Some(table) = self.synced_routes.get(&self.default_vrf) else {
            return true;
        };
        if table.contains_key(prefix) {
            debug!("RouteOrch: route {} exists", prefix);
            return true;
        }
        self.bulker
            .creating_entries_count_for(&RouteEntry::new(self.default_vrf, *prefix))
            > 0
    }

    /// Removes a default-VRF route outside the request queue.
    pub async fn remove_route_prefix(&mut self, prefix: &IpPrefix) -> bool {
        let key = prefix.to_string();
        let mut ctx = RouteBulkContext::new(key, false, self.default_vrf, *prefix);

        if self.remove_route(&mut ctx) {
            return true;
        }

        self.bulker.flush(self.route_api.as_ref()).await;
        let done = self.remove_route_post(&ctx);
        self.bulker.clear();
        done
    }

    /// Next hops of a synced route; empty if there is none.
    pub fn get_synced_route_nhg_key(&self, vrf_id: VirtualRouterOid, prefix: &IpPrefix) -> NextHopGroupKey {
        self.route(vrf_id, prefix)
            .map(|route| route.nhg_key.clone())
            .unwrap_or_default()
    }

    /// Routes currently pointing at exactly `nexthop`.
    pub fn routes_for_next_hop(&self, nexthop: &NextHopKey) -> Vec<RouteKey> {
        self.routes_by_next_hop.routes(nexthop).copied().collect()
    }

    /// Starts watching the route used for `destination`. Returns true if a
    /// covering route was reported immediately.
    pub fn attach(
        &mut self,
        observer: Arc<dyn NextHopObserver>,
        destination: IpAddress,
        vrf_id: VirtualRouterOid,
    ) -> bool {
        let routes = self.synced_routes.get(&vrf_id);
        self.observers.attach(observer, vrf_id, destination, routes)
    }

    pub fn detach(
        &mut self,
        observer: &Arc<dyn NextHopObserver>,
        destination: &IpAddress,
        vrf_id: VirtualRouterOid,
    ) -> bool {
        self.observers.detach(observer, vrf_id, destination)
    }

    /// Programs `prefix` (masked to its network) to the CPU port.
    pub async fn add_link_local_route_to_me(&mut self, vrf_id: VirtualRouterOid, prefix: IpPrefix) -> Result<()> {
        let entry = RouteEntry::new(vrf_id, prefix.network());
        let attrs = vec![
            RouteAttribute::PacketAction(PacketAction::Forward),
            RouteAttribute::NextHopId(self.cpu_port.as_raw()),
        ];
        let status = self.route_api.create_route_entry(&entry, attrs).await;
        if !status.is_success() {
            error!("RouteOrch: failed to create link local route {} to cpu: {}", prefix, status);
            return Err(RouteError::LinkLocalRoute { prefix, status });
        }
        info!("RouteOrch: created link local route {} to cpu", prefix);
        Ok(())
    }

    pub async fn del_link_local_route_to_me(&mut self, vrf_id: VirtualRouterOid, prefix: IpPrefix) -> Result<()> {
        let entry = RouteEntry::new(vrf_id, prefix.network());
        let status = self.route_api.remove_route_entry(&entry).await;
        if !status.is_success() {
            error!("RouteOrch: failed to remove link local route {} to cpu: {}", prefix, status);
            return Err(RouteError::LinkLocalRoute { prefix, status });
        }
        info!("RouteOrch: removed link local route {} to cpu", prefix);
        Ok(())
    }

    pub(super) fn update_default_route_state(&self, prefix: &IpPrefix, installed: bool) {
        let state = if installed { "ok" } else { "na" };
        self.publisher.set_state(
            STATE_ROUTE_TABLE_NAME,
            &prefix.to_string(),
            &[("state".to_string(), state.to_string())],
        );
    }
}

/// EUI-64 link-local address derived from a MAC.
pub fn link_local_eui64_addr(mac: &MacAddress) -> IpAddress {
    IpAddress::V6(Ipv6Address::link_local_from_mac(mac))
}

#[async_trait]
impl Orch for RouteOrch {
    fn name(&self) -> &str {
        "RouteOrch"
    }

    async fn do_task(&mut self) {
        let entries = self.consumer.drain();
        let Some(entries) = self.take_resync_control(entries) else {
            return;
        };
        self.process_entries(entries).await;
    }

    fn priority(&self) -> i32 {
        self.consumer.priority()
    }

    fn has_pending_tasks(&self) -> bool {
        self.consumer.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.consumer.dump()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::testing::Fixture;
    use pretty_assertions::assert_eq;
    use sonic_sai::{SaiOp, VirtualSwitch};

    #[test]
    fn test_config_defaults_and_platform_limit() {
        let config = RouteOrchConfig::default();
        assert_eq!(config.max_nhg_count, 128);
        assert_eq!(config.effective_max_nhg_count(), 128);

        let config = RouteOrchConfig {
            max_nhg_count: 1024,
            platform: Some("mellanox".to_string()),
            ..Default::default()
        };
        assert_eq!(config.effective_max_nhg_count(), 32);
    }

    #[test]
    fn test_config_from_json() {
        let config: RouteOrchConfig =
            serde_json::from_str(r#"{"max_nhg_count": 8, "switch_mac": "00:11:22:33:44:55"}"#).unwrap();
        assert_eq!(config.max_nhg_count, 8);
        assert!(!config.ordered_ecmp);
        assert_eq!(config.switch_mac, Some("00:11:22:33:44:55".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_new_installs_drop_default_routes() {
        let fixture = Fixture::new().await;
        let vrf = fixture.switch.default_virtual_router();

        for prefix in [IpPrefix::DEFAULT_V4, IpPrefix::DEFAULT_V6] {
            let state = fixture.switch.route(&RouteEntry::new(vrf, prefix)).unwrap();
            assert_eq!(state.packet_action, PacketAction::Drop);
            assert_eq!(fixture.orch.route(vrf, &prefix), Some(&RouteNhg::default()));
            assert_eq!(
                fixture.state.field(STATE_ROUTE_TABLE_NAME, &prefix.to_string(), "state"),
                Some("na".to_string())
            );
        }
        assert_eq!(fixture.orch.vrf_count(), 1);
        assert_eq!(fixture.orch.name(), "RouteOrch");
        assert!(!fixture.orch.has_pending_tasks());
    }

    #[tokio::test]
    async fn test_new_fails_when_default_route_fails() {
        let switch = Arc::new(VirtualSwitch::new());
        switch.inject_failure(SaiOp::CreateRoute, SaiStatus::InsufficientResources);

        let result = RouteOrch::new(RouteOrchConfig::default(), Fixture::collaborators(&switch).0).await;
        assert!(matches!(
            result,
            Err(RouteError::DefaultRoute { prefix, status: SaiStatus::InsufficientResources })
                if prefix == IpPrefix::DEFAULT_V4
        ));
    }

    #[tokio::test]
    async fn test_link_local_routes_to_cpu() {
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        let config = RouteOrchConfig {
            switch_mac: Some(mac),
            ..Default::default()
        };
        let fixture = Fixture::with_config(config).await;
        let vrf = fixture.switch.default_virtual_router();

        let eui64 = IpPrefix::new(link_local_eui64_addr(&mac), 128).unwrap();
        let state = fixture.switch.route(&RouteEntry::new(vrf, eui64)).unwrap();
        assert_eq!(state.packet_action, PacketAction::Forward);
        assert_eq!(state.next_hop, fixture.switch.cpu_port().as_raw());
        assert!(fixture.switch.has_route(&RouteEntry::new(vrf, "fe80::/10".parse().unwrap())));
        assert_eq!(fixture.orch.route(vrf, &eui64), None);
    }

    #[tokio::test]
    async fn test_del_link_local_route_reports_missing() {
        let mut fixture = Fixture::new().await;
        let vrf = fixture.switch.default_virtual_router();
        let prefix: IpPrefix = "fe80::/10".parse().unwrap();

        fixture.orch.add_link_local_route_to_me(vrf, prefix).await.unwrap();
        fixture.orch.del_link_local_route_to_me(vrf, prefix).await.unwrap();
        assert!(matches!(
            fixture.orch.del_link_local_route_to_me(vrf, prefix).await,
            Err(RouteError::LinkLocalRoute { status: SaiStatus::ItemNotFound, .. })
        ));
    }

    #[tokio::test]
    async fn test_is_route_exists_and_remove_route_prefix() {
        let mut fixture = Fixture::new().await;
        let prefix: IpPrefix = "10.1.0.0/16".parse().unwrap();
        let vrf = fixture.switch.default_virtual_router();

        assert!(!fixture.orch.is_route_exists(&prefix));
        fixture.route_set("10.1.0.0/16", "10.0.0.1", "Ethernet0").await;
        assert!(fixture.orch.is_route_exists(&prefix));

        assert!(fixture.orch.remove_route_prefix(&prefix).await);
        assert!(!fixture.orch.is_route_exists(&prefix));
        assert!(!fixture.switch.has_route(&RouteEntry::new(vrf, prefix)));
        // Absent routes are already removed.
        assert!(fixture.orch.remove_route_prefix(&prefix).await);
    }
}
