//! SONiC RouteOrch - route and next-hop group reconciliation.
//!
//! Route requests arrive as `(key, SET|DEL, fields)` entries. RouteOrch
//! turns them into route entries and next-hop groups on the switch, shares
//! groups between routes, and keeps groups in step with next-hop
//! reachability.
//!
//! ```text
//! [ROUTE_TABLE] ──> [RouteOrch] ──bulk──> [RouteApi / NextHopGroupApi]
//!                       │
//!                       ├──> [ROUTE_TABLE state, STATE_ROUTE_TABLE]
//!                       └──> [next-hop observers]
//! ```
//!
//! # Key Components
//!
//! - [`route::RouteOrch`]: the reconciliation engine
//! - [`daemon::OrchDaemon`]: runs orch rounds until idle

pub mod daemon;
pub mod route;
