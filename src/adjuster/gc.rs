//! Background garbage collection of idle series.

use crate::adjuster::Adjuster;
use crate::core::Result;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Handle to a running GC task
pub struct GcHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl GcHandle {
    /// Stops the task and waits for it to exit. A sweep in progress finishes
    /// first.
    pub async fn shutdown(self) -> Result<()> {
        // The receiver is gone only if the task already exited.
        let _ = self.shutdown.send(true);
        self.task.await?;
        Ok(())
    }
}

/// Spawns a task sweeping `adjuster` every `sweep_interval`
pub fn spawn_gc(adjuster: Arc<Adjuster>, sweep_interval: Duration) -> GcHandle {
    let (shutdown, mut stop) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = adjuster.sweep(SystemTime::now());
                    if evicted > 0 {
                        info!(
                            evicted,
                            remaining = adjuster.cache().len(),
                            "Evicted idle series"
                        );
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("GC task stopped");
    });

    GcHandle { shutdown, task }
}
