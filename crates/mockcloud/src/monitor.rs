//! Background monitor task
//!
//! Drives [`VmRegistry::tick`] on a fixed interval until cancelled:
//!
//! ```text
//! loop {
//!     select! {
//!         cancelled  -> break
//!         interval   -> registry.tick()
//!     }
//! }
//! ```
//!
//! The tick itself is synchronous and holds the compute lock only for the
//! pass over the VM table.

use crate::vm::VmRegistry;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle on a running monitor task
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: CancellationToken,
    task: JoinHandle<u64>,
}

impl MonitorHandle {
    /// Spawn the monitor on the current tokio runtime
    pub fn spawn(registry: VmRegistry, interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick of an interval completes immediately
            ticker.tick().await;

            let mut passes = 0u64;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = registry.tick();
                        passes += 1;
                        if !report.crashed.is_empty() {
                            warn!(crashed = ?report.crashed, "Monitor pass crashed virtual machines");
                        }
                        debug!(
                            pass = passes,
                            advanced = report.advanced.len(),
                            crashed = report.crashed.len(),
                            "Monitor pass complete"
                        );
                    }
                }
            }
            passes
        });

        info!(interval = ?interval, "Started VM monitor");
        Self { shutdown, task }
    }

    /// Token that stops the monitor when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the task and wait for it; returns the number of passes run
    pub async fn stop(self) -> u64 {
        self.shutdown.cancel();
        match self.task.await {
            Ok(passes) => {
                info!(passes, "Stopped VM monitor");
                passes
            }
            Err(e) => {
                warn!(error = %e, "VM monitor task ended abnormally");
                0
            }
        }
    }
}
