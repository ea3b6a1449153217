//! Background cache maintenance: periodic eviction passes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use excursion_core::RegimeCache;

/// Handle to the running cleanup task.
#[derive(Debug)]
pub struct Maintenance {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<usize>,
}

impl Maintenance {
    /// Run `cache.cleanup()` every `period`, starting one period from now.
    pub fn spawn(cache: Arc<RegimeCache>, period: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut passes = 0usize;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = cache.cleanup();
                        passes += 1;
                        debug!(pass = passes, evicted = report.evicted(), "maintenance pass");
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            passes
        });

        Self { shutdown, handle }
    }

    /// Stop the task and return how many cleanup passes it ran.
    pub async fn stop(self) -> usize {
        let _ = self.shutdown.send(true);
        match self.handle.await {
            Ok(passes) => passes,
            Err(e) => {
                warn!(error = %e, "maintenance task ended abnormally");
                0
            }
        }
    }
}
