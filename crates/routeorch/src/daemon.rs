//! OrchDaemon implementation.
//!
//! The OrchDaemon drives registered orchs:
//! - Orch registration and priority ordering
//! - Rounds of `do_task` over every orch with pending work
//! - Stopping once nothing is pending or a round limit is reached

use log::{debug, info, warn};
use sonic_orch_common::Orch;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// An orch shared between the daemon and its owner.
pub type SharedOrch = Arc<Mutex<dyn Orch>>;

/// Configuration for the OrchDaemon.
#[derive(Debug, Clone)]
pub struct OrchDaemonConfig {
    /// Rounds `run_until_idle` runs before giving up on leftover work
    pub max_rounds: usize,
}

impl Default for OrchDaemonConfig {
    fn default() -> Self {
        Self { max_rounds: 16 }
    }
}

/// The orchestration daemon.
pub struct OrchDaemon {
    config: OrchDaemonConfig,
    /// Registered orchs by priority
    orchs: BTreeMap<i32, Vec<SharedOrch>>,
}

impl OrchDaemon {
    pub fn new(config: OrchDaemonConfig) -> Self {
        Self {
            config,
            orchs: BTreeMap::new(),
        }
    }

    /// Registers an orch. Lower priorities run first in each round.
    pub async fn register_orch(&mut self, orch: SharedOrch) {
        let (name, priority) = {
            let guard = orch.lock().await;
            (guard.name().to_string(), guard.priority())
        };
        info!("Registering {} with priority {}", name, priority);
        self.orchs.entry(priority).or_default().push(orch);
    }

    pub fn orch_count(&self) -> usize {
        self.orchs.values().map(Vec::len).sum()
    }

    /// Runs one `do_task` on every orch with pending work. Returns how many
    /// orchs ran.
    pub async fn run_round(&mut self) -> usize {
        let mut ran = 0;
        for orchs in self.orchs.values() {
            for orch in orchs {
                let mut orch = orch.lock().await;
                if orch.has_pending_tasks() {
                    debug!("Processing tasks for {}", orch.name());
                    orch.do_task().await;
                    ran += 1;
                }
            }
        }
        ran
    }

    /// Runs rounds until no orch has pending work or the round limit is
    /// hit. Returns the number of rounds run.
    pub async fn run_until_idle(&mut self) -> usize {
        for round in 0..self.config.max_rounds {
            if self.run_round().await == 0 {
                return round;
            }
        }

        if self.has_pending_tasks().await {
            warn!(
                "OrchDaemon: work still pending after {} rounds",
                self.config.max_rounds
            );
            for line in self.dump().await {
                warn!("  {}", line);
            }
        }
        self.config.max_rounds
    }

    pub async fn has_pending_tasks(&self) -> bool {
        for orchs in self.orchs.values() {
            for orch in orchs {
                if orch.lock().await.has_pending_tasks() {
                    return true;
                }
            }
        }
        false
    }

    /// Dumps queued work for debugging.
    pub async fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (priority, orchs) in &self.orchs {
            for orch in orchs {
                let orch = orch.lock().await;
                lines.push(format!("{} (priority {}):", orch.name(), priority));
                lines.extend(orch.dump_pending_tasks().into_iter().map(|l| format!("  {}", l)));
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use pretty_assertions::assert_eq;

    struct StubOrch {
        name: &'static str,
        priority: i32,
        pending: usize,
        log: Arc<SyncMutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Orch for StubOrch {
        fn name(&self) -> &str {
            self.name
        }

        async fn do_task(&mut self) {
            self.log.lock().push(self.name);
            self.pending = self.pending.saturating_sub(1);
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn has_pending_tasks(&self) -> bool {
            self.pending > 0
        }

        fn dump_pending_tasks(&self) -> Vec<String> {
            vec![format!("{} left", self.pending)]
        }
    }

    fn stub(name: &'static str, priority: i32, pending: usize, log: &Arc<SyncMutex<Vec<&'static str>>>) -> SharedOrch {
        Arc::new(Mutex::new(StubOrch {
            name,
            priority,
            pending,
            log: log.clone(),
        }))
    }

    #[tokio::test]
    async fn test_rounds_follow_priority_until_idle() {
        let log = Arc::new(SyncMutex::new(Vec::new()));
        let mut daemon = OrchDaemon::new(OrchDaemonConfig::default());
        daemon.register_orch(stub("Late", 20, 1, &log)).await;
        daemon.register_orch(stub("Early", 10, 2, &log)).await;
        assert_eq!(daemon.orch_count(), 2);

        assert_eq!(daemon.run_until_idle().await, 2);
        assert_eq!(*log.lock(), vec!["Early", "Late", "Early"]);
        assert!(!daemon.has_pending_tasks().await);
    }

    #[tokio::test]
    async fn test_round_limit() {
        let log = Arc::new(SyncMutex::new(Vec::new()));
        let mut daemon = OrchDaemon::new(OrchDaemonConfig { max_rounds: 2 });
        daemon.register_orch(stub("Stuck", 0, 10, &log)).await;

        assert_eq!(daemon.run_until_idle().await, 2);
        assert!(daemon.has_pending_tasks().await);
        assert_eq!(daemon.dump().await, vec!["Stuck (priority 0):", "  8 left"]);
    }
}
