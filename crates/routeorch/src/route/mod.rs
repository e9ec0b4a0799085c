//! RouteOrch - Route orchestration for SONiC.
//!
//! This module reconciles requested routes with the switch:
//! - Route entry creation, update and deletion through a bulker
//! - Next-hop group creation, sharing and retirement with reference counting
//! - ECMP member tracking as next hops go up and down
//! - VRF, resync and default route handling
//!
//! Reference counts never auto-create entries: taking a reference on an
//! unknown group or next hop is an error, not a new zero-count entry.

mod bulk;
mod group;
mod nexthop;
mod nhg;
mod observer;
mod orch;
mod providers;
mod registry;
mod request;
mod task;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use nexthop::{NextHopFlags, NextHopKey, ParseNextHopKeyError};
pub use nhg::{NextHopGroupEntry, NextHopGroupKey, NextHopGroupMemberEntry, NextHopGroupTable};
pub use observer::{NextHopObserver, NextHopObserverRegistry, NextHopUpdate};
pub use orch::{
    link_local_eui64_addr, RouteCollaborators, RouteError, RouteOrch, RouteOrchConfig,
    APP_ROUTE_TABLE_NAME, STATE_ROUTE_TABLE_NAME,
};
pub use providers::{
    ExternalGroup, ExternalGroupOwner, FineGrainedGroupProvider, FineGrainedNextHop,
    InterfaceDirectory, InterfaceTable, OverlayEndpointManager, RouteOwner, Srv6NextHopProvider,
    StatePublisher, StateTables, VrfDirectory, VrfTable,
};
pub use registry::{NeighborTable, NextHopRegistry, RoutesByNextHop};
pub use request::{ParseRouteError, RouteBulkContext, RouteFields, RESYNC_KEY};
pub use types::{RouteKey, RouteNhg, RouteTable, RouteTables};
