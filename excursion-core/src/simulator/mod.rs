//! Trade Outcome Simulator.
//!
//! One [`Simulator`] is shared by every open signal; each call to
//! [`Simulator::run`] owns a private [`SimulationRun`] and walks it forward bar
//! by bar against a [`PriceFeed`]. Interim extremes go to the regime cache as
//! live updates; the final result goes to the cache first and then, best
//! effort, to the persistence sink.

mod ratchet;
mod run;

pub use ratchet::StopRatchet;
pub use run::{Exit, SimulationRun, Step};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::config::SimulatorConfig;
use crate::domain::{RunId, SimulationRecord, SimulationResult, TradeSignal};
use crate::error::SimulationError;
use crate::feed::PriceFeed;
use crate::regime::{EntryPatch, RegimeCache};
use crate::sink::PersistenceSink;

/// Drives simulation runs and publishes their state.
pub struct Simulator {
    config: Arc<SimulatorConfig>,
    cache: Arc<RegimeCache>,
    sink: Arc<dyn PersistenceSink>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("config", &self.config)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Simulator {
    pub fn new(
        config: SimulatorConfig,
        cache: Arc<RegimeCache>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cache,
            sink,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<RegimeCache> {
        &self.cache
    }

    /// Sanitize the signal and create its run state.
    ///
    /// Fatal input errors are returned; recoverable anomalies are dropped and
    /// logged.
    pub fn prepare(&self, signal: &TradeSignal) -> Result<SimulationRun, SimulationError> {
        let (clean, dropped) = signal.sanitize()?;
        for field in &dropped {
            warn!(
                instrument = %clean.instrument,
                direction = %clean.direction,
                entry = clean.entry_price,
                "dropped signal field: {field}"
            );
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let run_id = RunId::for_signal(&clean, sequence);
        Ok(SimulationRun::new(run_id, clean, Arc::clone(&self.config)))
    }

    /// Simulate a signal to completion against the feed.
    ///
    /// Only fatal input errors are returned. Feed problems, bad bars and
    /// persistence failures are logged and absorbed.
    pub async fn run(
        &self,
        signal: TradeSignal,
        feed: &dyn PriceFeed,
    ) -> Result<SimulationResult, SimulationError> {
        let run = self.prepare(&signal)?;
        let span = tracing::info_span!(
            "simulation",
            instrument = %run.signal().instrument,
            run_id = %run.run_id()
        );
        Ok(self.drive(run, feed).instrument(span).await)
    }

    async fn drive(&self, mut run: SimulationRun, feed: &dyn PriceFeed) -> SimulationResult {
        let instrument = run.signal().instrument.clone();
        let bar_interval = self.bar_interval(feed);
        let retry_delay = self.config.retry_delay();
        // `None` only when the budget runs past what the clock can represent.
        let deadline = Instant::now().checked_add(self.config.max_duration());

        info!(
            direction = %run.signal().direction,
            entry = run.signal().entry_price,
            stop = ?run.stop_level(),
            take_profit = ?run.signal().take_profit,
            partial_levels = run.signal().partial_take_profits.len(),
            "simulation started"
        );
        self.publish_live(&instrument, &run);

        let exit = loop {
            let pause = match feed.latest_completed_bar(&instrument).await {
                Ok(Some(bar)) => match run.on_bar(&bar) {
                    Step::Exit(exit) => break exit,
                    Step::Open { extrema_moved } => {
                        debug!(
                            bar_time = %bar.time,
                            high = bar.high,
                            low = bar.low,
                            stop = ?run.stop_level(),
                            remaining = run.remaining(),
                            "bar processed"
                        );
                        if extrema_moved {
                            self.publish_live(&instrument, &run);
                        }
                        bar_interval
                    }
                    Step::Rejected(reason) => {
                        warn!(bar_time = %bar.time, reason = %reason, "bar rejected");
                        bar_interval
                    }
                    Step::Stale => retry_delay,
                },
                Ok(None) => retry_delay,
                Err(err) if err.is_transient() => {
                    warn!(error = %err, "price feed error, retrying");
                    retry_delay
                }
                Err(err) => {
                    warn!(error = %err, "price feed closed, forcing timeout");
                    break run.force_timeout(run.signal().opened_at);
                }
            };

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                break run.force_timeout(self.budget_end(&run));
            }
            tokio::time::sleep(deadline.map_or(pause, |d| pause.min(d - now))).await;
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break run.force_timeout(self.budget_end(&run));
            }
        };

        let result = run.finalize(&exit);
        info!(
            outcome = %result.outcome,
            pnl = result.pnl,
            r_multiple = result.r_multiple,
            label = result.label.value(),
            mfe = result.mfe,
            mae = result.mae,
            bars = result.bars_processed,
            "simulation finished"
        );

        // Cache first: a failing sink must never hide the outcome.
        self.cache.upsert(
            &instrument,
            &result.run_id,
            EntryPatch::from_result(&result),
            false,
        );
        let record = SimulationRecord::from_parts(run.signal(), &result);
        if let Err(err) = self.sink.persist(record).await {
            warn!(error = %err, "failed to persist simulation record");
        }
        result
    }

    fn publish_live(&self, instrument: &str, run: &SimulationRun) {
        if self.config.publish_live_updates {
            self.cache.upsert(instrument, run.run_id(), run.live_patch(), true);
        }
    }

    /// Poll cadence: the configured override, else the feed's bar duration.
    fn bar_interval(&self, feed: &dyn PriceFeed) -> Duration {
        if let Some(ms) = self.config.poll_interval_ms {
            return Duration::from_millis(ms);
        }
        match feed.period_to_duration(&self.config.bar_period) {
            Ok(interval) => interval,
            Err(err) => {
                warn!(error = %err, "unusable bar period, polling at retry delay");
                self.config.retry_delay()
            }
        }
    }

    /// Close time for a forced timeout: end of the run's time budget.
    fn budget_end(&self, run: &SimulationRun) -> chrono::DateTime<chrono::Utc> {
        chrono::Duration::from_std(self.config.max_duration())
            .ok()
            .and_then(|budget| run.signal().opened_at.checked_add_signed(budget))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
    }
}
