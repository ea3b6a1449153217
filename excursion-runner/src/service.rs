//! The assembled runtime: cache, persistence queue, maintenance and
//! supervisor wired together from an [`AppConfig`].

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use excursion_core::domain::TradeSignal;
use excursion_core::{PersistenceSink, PriceFeed, RegimeCache, Simulator};

use crate::config::AppConfig;
use crate::maintenance::Maintenance;
use crate::persistence::{JsonlHistory, PersistenceQueue, QueueReport};
use crate::supervisor::{DrainReport, RunOutcome, Supervisor};
use crate::warm_start::{warm_start, WarmStartReport};

/// Everything that happened during a graceful shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub runs: DrainReport,
    pub maintenance_passes: usize,
    pub persisted: QueueReport,
}

#[derive(Debug)]
pub struct Service {
    cache: Arc<RegimeCache>,
    queue: Arc<PersistenceQueue>,
    maintenance: Maintenance,
    supervisor: Supervisor,
    warm_start: WarmStartReport,
}

impl Service {
    /// Validate the config, warm the cache from history and start the
    /// background tasks. Must be called from within a tokio runtime.
    pub fn start(config: &AppConfig, feed: Arc<dyn PriceFeed>) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(RegimeCache::new(config.regime.clone()));
        let history = JsonlHistory::new(&config.persistence.history_path);
        let records = history.read_all().with_context(|| {
            format!(
                "failed to read history {}",
                config.persistence.history_path.display()
            )
        })?;
        let warm = warm_start(&cache, &records);

        let queue = Arc::new(PersistenceQueue::spawn(
            history,
            config.persistence.queue_capacity,
        ));
        let simulator = Arc::new(Simulator::new(
            config.simulator.clone(),
            Arc::clone(&cache),
            Arc::clone(&queue) as Arc<dyn PersistenceSink>,
        ));
        let maintenance = Maintenance::spawn(Arc::clone(&cache), config.regime.cleanup_interval());

        info!(
            history = %config.persistence.history_path.display(),
            bar_period = %config.simulator.bar_period,
            cleanup_interval_secs = config.regime.cleanup_interval_secs,
            "service started"
        );

        Ok(Self {
            cache,
            queue,
            maintenance,
            supervisor: Supervisor::new(simulator, feed),
            warm_start: warm,
        })
    }

    pub fn cache(&self) -> &Arc<RegimeCache> {
        &self.cache
    }

    pub fn warm_start_report(&self) -> WarmStartReport {
        self.warm_start
    }

    pub fn submit(&mut self, signal: TradeSignal) {
        self.supervisor.submit(signal);
    }

    pub fn in_flight(&mut self) -> usize {
        self.supervisor.in_flight()
    }

    /// Tally runs that finished since the last submit.
    pub fn reap(&mut self) -> usize {
        self.supervisor.reap()
    }

    pub async fn join_next(&mut self) -> Option<RunOutcome> {
        self.supervisor.join_next().await
    }

    /// Stop maintenance, give runs `grace` to finish, then drain the
    /// persistence queue.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        let maintenance_passes = self.maintenance.stop().await;
        let runs = self.supervisor.drain(grace).await;
        let persisted = self.queue.close().await;

        let report = ShutdownReport {
            runs,
            maintenance_passes,
            persisted,
        };
        info!(?report, "service stopped");
        report
    }
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
