//! Task-per-run supervision.
//!
//! Each submitted signal becomes its own tokio task driving
//! [`Simulator::run`]. Runs share the simulator (and through it the regime
//! cache and sink) and the price feed; they never talk to each other.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use excursion_core::domain::{SimulationResult, TradeSignal};
use excursion_core::{PriceFeed, SimulationError, Simulator};

pub type RunOutcome = Result<SimulationResult, SimulationError>;

/// How the submitted runs ended: those reaped while the supervisor was live
/// plus those settled while draining.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub refused: usize,
    /// Still running when the grace period ran out; aborted without a result.
    pub abandoned: usize,
}

pub struct Supervisor {
    simulator: Arc<Simulator>,
    feed: Arc<dyn PriceFeed>,
    runs: JoinSet<RunOutcome>,
    submitted: usize,
    /// Outcomes of runs reaped before shutdown.
    settled: DrainReport,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("simulator", &self.simulator)
            .field("in_flight", &self.runs.len())
            .field("submitted", &self.submitted)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(simulator: Arc<Simulator>, feed: Arc<dyn PriceFeed>) -> Self {
        Self {
            simulator,
            feed,
            runs: JoinSet::new(),
            submitted: 0,
            settled: DrainReport::default(),
        }
    }

    pub fn simulator(&self) -> &Arc<Simulator> {
        &self.simulator
    }

    /// Start simulating a signal in its own task. Runs that already
    /// finished are reaped first.
    pub fn submit(&mut self, signal: TradeSignal) {
        self.reap();
        let simulator = Arc::clone(&self.simulator);
        let feed = Arc::clone(&self.feed);
        debug!(
            instrument = %signal.instrument,
            direction = %signal.direction,
            "run submitted"
        );
        self.runs
            .spawn(async move { simulator.run(signal, feed.as_ref()).await });
        self.submitted += 1;
    }

    /// Runs still executing.
    pub fn in_flight(&mut self) -> usize {
        self.reap();
        self.runs.len()
    }

    /// Collect every run that has already finished without waiting. Their
    /// results are already in the cache and sink; only the tally is kept.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        while let Some(joined) = self.runs.try_join_next() {
            match joined {
                Ok(outcome) => {
                    tally(&mut self.settled, &outcome);
                    reaped += 1;
                }
                Err(e) if e.is_panic() => error!(error = %e, "simulation task panicked"),
                Err(e) => debug!(error = %e, "simulation task cancelled"),
            }
        }
        reaped
    }

    pub fn settled(&self) -> DrainReport {
        self.settled
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Wait for the next run to finish. `None` when nothing is in flight.
    ///
    /// Panicked tasks are logged and skipped.
    pub async fn join_next(&mut self) -> Option<RunOutcome> {
        loop {
            match self.runs.join_next().await? {
                Ok(outcome) => return Some(outcome),
                Err(e) if e.is_panic() => error!(error = %e, "simulation task panicked"),
                Err(e) => debug!(error = %e, "simulation task cancelled"),
            }
        }
    }

    /// Give in-flight runs up to `grace` to finish, then abort the rest.
    pub async fn drain(&mut self, grace: Duration) -> DrainReport {
        let mut report = self.settled;

        let waited = tokio::time::timeout(grace, async {
            while let Some(outcome) = self.join_next().await {
                tally(&mut report, &outcome);
            }
        })
        .await;

        if waited.is_err() {
            report.abandoned = self.runs.len();
            warn!(abandoned = report.abandoned, "grace period elapsed, aborting runs");
            self.runs.abort_all();
            while self.runs.join_next().await.is_some() {}
        }

        info!(
            completed = report.completed,
            refused = report.refused,
            abandoned = report.abandoned,
            "supervisor drained"
        );
        report
    }
}

fn tally(report: &mut DrainReport, outcome: &RunOutcome) {
    match outcome {
        Ok(_) => report.completed += 1,
        Err(_) => report.refused += 1,
    }
}
