//! SAI (Switch Abstraction Interface) types and API traits for route and
//! next-hop group programming.
//!
//! - [`types`]: type-safe object IDs
//! - [`error`]: status codes and errors
//! - [`api`]: async API traits for routes and next-hop groups
//! - [`bulker`]: request staging with per-request status slots
//! - [`virtual_switch`]: in-memory switch backing both APIs
//!
//! # Example
//!
//! ```
//! use sonic_sai::{EntityBulker, PacketAction, RouteAttribute, RouteEntry, SaiStatus, VirtualSwitch};
//!
//! # tokio_test_block(async {
//! let switch = VirtualSwitch::new();
//! let mut bulker = EntityBulker::new();
//! let entry = RouteEntry::new(switch.default_virtual_router(), "0.0.0.0/0".parse().unwrap());
//!
//! let slot = bulker
//!     .create_entry(entry, vec![RouteAttribute::PacketAction(PacketAction::Drop)])
//!     .unwrap();
//! bulker.flush(&switch).await;
//! assert_eq!(bulker.status(slot), SaiStatus::Success);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
//! # }
//! ```

pub mod api;
pub mod bulker;
pub mod error;
pub mod types;
pub mod virtual_switch;

pub use types::{
    object_type_tag, NextHopGroupKind, NextHopGroupMemberKind, NextHopGroupMemberOid,
    NextHopGroupOid, NextHopKind, NextHopOid, PortKind, PortOid, RawSaiObjectId,
    RouterInterfaceKind, RouterInterfaceOid, SaiObjectId, SaiObjectKind, SwitchKind, SwitchOid,
    VirtualRouterKind, VirtualRouterOid, NULL_OBJECT_ID,
};

pub use api::{
    NextHopGroupApi, NextHopGroupMemberAttrs, NextHopGroupType, PacketAction, RouteApi,
    RouteAttribute, RouteEntry,
};
pub use bulker::{EntityBulker, StatusSlot};
pub use error::{SaiError, SaiResult, SaiStatus};
pub use virtual_switch::{MemberState, RouteState, SaiOp, VirtualSwitch};
