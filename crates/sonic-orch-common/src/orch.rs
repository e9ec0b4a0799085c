//! Base Orch trait.

use async_trait::async_trait;

/// Base trait for all orchestration agents.
///
/// The daemon calls `do_task()` on every orch that reports pending work, in
/// priority order, once per round. An entry an orch cannot finish stays in
/// its queue and is seen again next round; there is no other retry timer.
#[async_trait]
pub trait Orch: Send + Sync {
    /// Returns the name of this Orch (for logging and debugging).
    fn name(&self) -> &str;

    /// Processes one round of pending entries.
    async fn do_task(&mut self);

    /// Lower values run first.
    fn priority(&self) -> i32 {
        0
    }

    fn has_pending_tasks(&self) -> bool {
        false
    }

    /// Human-readable description of queued work.
    fn dump_pending_tasks(&self) -> Vec<String> {
        vec![]
    }
}
