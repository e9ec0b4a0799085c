//! SAI API traits.
//!
//! - [`route`]: route entries (bulk only)
//! - [`next_hop_group`]: next-hop groups and their members

pub mod next_hop_group;
pub mod route;

pub use next_hop_group::{NextHopGroupApi, NextHopGroupMemberAttrs, NextHopGroupType};
pub use route::{PacketAction, RouteApi, RouteAttribute, RouteEntry};
