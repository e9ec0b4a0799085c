//! Task processing status and hardware status classification.
//!
//! Every status returned by a SAI call is classified into a [`TaskStatus`]
//! by one of the `handle_sai_*_status` functions, and
//! [`parse_handle_sai_status_failure`] reduces that to the only decision a
//! caller needs: is this entry done (`true`) or should it stay queued
//! (`false`).

use log::{error, warn};
use sonic_sai::SaiStatus;

/// Result of processing a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Success,
    /// Permanent failure; the entry is dropped.
    Failed,
    /// Transient failure; the entry stays queued.
    NeedRetry,
    /// Route already present; dropped like a success.
    Duplicated,
}

impl TaskStatus {
    /// Returns true if the task completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Duplicated)
    }

    /// Returns true if the task should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::NeedRetry)
    }

    /// Returns true if the task failed permanently.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed)
    }
}

/// SAI API a status was returned by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaiApiKind {
    Route,
    NextHopGroup,
    NextHopGroupMember,
}

fn is_transient(status: SaiStatus) -> bool {
    status.is_resource_exhausted() || status == SaiStatus::NotExecuted
}

/// Classifies a failed create.
///
/// An existing object counts as created, except for route entries where it
/// means the same route was requested twice.
pub fn handle_sai_create_status(api: SaiApiKind, status: SaiStatus) -> TaskStatus {
    match status {
        SaiStatus::Success => TaskStatus::Success,
        SaiStatus::ItemAlreadyExists if api == SaiApiKind::Route => {
            warn!("Create of {:?} returned {}", api, status);
            TaskStatus::Duplicated
        }
        SaiStatus::ItemAlreadyExists => TaskStatus::Success,
        s if is_transient(s) => {
            warn!("Create of {:?} deferred: {}", api, s);
            TaskStatus::NeedRetry
        }
        s => {
            error!("Encountered failure in create operation, SAI API: {:?}, status: {}", api, s);
            TaskStatus::Failed
        }
    }
}

/// Classifies a failed attribute set. A missing object has nothing left to
/// update.
pub fn handle_sai_set_status(api: SaiApiKind, status: SaiStatus) -> TaskStatus {
    match status {
        SaiStatus::Success | SaiStatus::ItemNotFound => TaskStatus::Success,
        s if is_transient(s) => {
            warn!("Set on {:?} deferred: {}", api, s);
            TaskStatus::NeedRetry
        }
        s => {
            error!("Encountered failure in set operation, SAI API: {:?}, status: {}", api, s);
            TaskStatus::Failed
        }
    }
}

/// Classifies a failed remove. An object that is already gone, or that the
/// switch still holds a reference to, is treated as removed from our side.
pub fn handle_sai_remove_status(api: SaiApiKind, status: SaiStatus) -> TaskStatus {
    match status {
        SaiStatus::Success | SaiStatus::ItemNotFound | SaiStatus::ObjectInUse => {
            TaskStatus::Success
        }
        s if is_transient(s) => {
            warn!("Remove of {:?} deferred: {}", api, s);
            TaskStatus::NeedRetry
        }
        s => {
            error!("Encountered failure in remove operation, SAI API: {:?}, status: {}", api, s);
            TaskStatus::Failed
        }
    }
}

/// Returns true if the entry is done with (success or permanent failure),
/// false if it must stay queued.
pub fn parse_handle_sai_status_failure(status: TaskStatus) -> bool {
    status != TaskStatus::NeedRetry
}
