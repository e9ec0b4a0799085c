//! Common orchestration abstractions.
//!
//! - [`Orch`]: an agent driven by the daemon event loop
//! - [`Consumer`]: per-table queue of pending changes with key coalescing
//! - [`SyncMap`]: ordered map without implicit insertion, with ref counts
//! - [`TaskStatus`] and the `handle_sai_*_status` classifiers
//!
//! An orch drains its consumer, programs the switch, and puts back whatever
//! could not be completed:
//!
//! ```
//! use sonic_orch_common::{Consumer, ConsumerConfig, KeyOpFieldsValues};
//!
//! let mut consumer = Consumer::new(ConsumerConfig::new("ROUTE_TABLE"));
//! consumer.add_to_sync(vec![KeyOpFieldsValues::del("10.0.0.0/24")]);
//!
//! let mut leftover = Vec::new();
//! for entry in consumer.drain() {
//!     // not ready yet
//!     leftover.push(entry);
//! }
//! consumer.retry_all(leftover);
//! assert_eq!(consumer.pending_count(), 1);
//! ```

mod consumer;
mod orch;
mod sync_map;
mod task;

pub use consumer::{Consumer, ConsumerConfig, FieldValue, KeyOpFieldsValues, Operation};
pub use orch::Orch;
pub use sync_map::{HasRefCount, SyncMap, SyncMapError};
pub use task::{
    handle_sai_create_status, handle_sai_remove_status, handle_sai_set_status,
    parse_handle_sai_status_failure, SaiApiKind, TaskStatus,
};
