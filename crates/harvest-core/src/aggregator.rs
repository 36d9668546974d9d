//! Result Aggregator: runs every Worker Loop concurrently and merges results.
//!
//! Results are concatenated in worker *completion* order, each worker's block
//! in its own processing order. Only `row` is a reliable ordering key.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use harvest_types::{Job, JobResult, SessionLauncher, WorkerOutcome, WorkerStats};

use crate::correlator::SessionCorrelator;
use crate::event_window::CorrelationRules;
use crate::worker::{WorkerLoop, WorkerSettings};

/// Merged output of one aggregation.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// One result per input job, in completion order.
    pub results: Vec<JobResult>,
    /// Per-worker counters, in completion order.
    pub workers: Vec<(usize, WorkerStats)>,
}

impl Aggregation {
    /// Counters summed over all workers.
    pub fn totals(&self) -> WorkerStats {
        let mut totals = WorkerStats::default();
        for (_, stats) in &self.workers {
            totals.merge(stats);
        }
        totals
    }

    fn absorb(&mut self, outcome: WorkerOutcome) {
        self.workers.push((outcome.worker_id, outcome.stats));
        self.results.extend(outcome.results);
    }
}

/// Outcome for a worker that never got to run its slice.
fn abandoned(worker_id: usize, rows: &[u32]) -> WorkerOutcome {
    WorkerOutcome {
        worker_id,
        results: rows.iter().map(|row| JobResult::sentinel(*row)).collect(),
        stats: WorkerStats {
            sentinel: rows.len() as u32,
            driver_failures: 1,
            ..Default::default()
        },
    }
}

/// Spawns one Worker Loop per non-empty slice and collects their outcomes.
pub struct Aggregator {
    launcher: Arc<dyn SessionLauncher>,
    rules: Arc<CorrelationRules>,
    settings: WorkerSettings,
}

impl Aggregator {
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        rules: Arc<CorrelationRules>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            launcher,
            rules,
            settings,
        }
    }

    /// Run slice `i` on worker `i` and wait for all of them.
    ///
    /// Every input row appears exactly once in the output: a worker whose
    /// session cannot be launched, or whose task panics, contributes the
    /// sentinel for each of its rows.
    pub async fn run(&self, slices: Vec<Vec<Job>>) -> Aggregation {
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<usize, Vec<u32>> = HashMap::new();

        for (worker_id, slice) in slices.into_iter().enumerate() {
            if slice.is_empty() {
                continue;
            }
            pending.insert(worker_id, slice.iter().map(|job| job.row).collect());

            let launcher = self.launcher.clone();
            let rules = self.rules.clone();
            let settings = self.settings.clone();

            tasks.spawn(
                async move {
                    let driver = match launcher.launch(worker_id).await {
                        Ok(driver) => driver,
                        Err(e) => {
                            error!(error = %e, jobs = slice.len(), "failed to launch session");
                            let rows: Vec<u32> = slice.iter().map(|job| job.row).collect();
                            return abandoned(worker_id, &rows);
                        }
                    };
                    let correlator =
                        SessionCorrelator::new(worker_id, driver, launcher.events(), rules);
                    WorkerLoop::new(worker_id, correlator, settings).run(slice).await
                }
                .instrument(info_span!("worker", worker = worker_id)),
            );
        }

        let mut aggregation = Aggregation::default();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    pending.remove(&outcome.worker_id);
                    let stats = &outcome.stats;
                    info!(
                        worker = outcome.worker_id,
                        jobs = outcome.results.len(),
                        answered = stats.answered,
                        sentinel = stats.sentinel,
                        reload_attempts = stats.reload_attempts,
                        driver_failures = stats.driver_failures,
                        unscoped_matches = stats.unscoped_matches,
                        "worker finished"
                    );
                    aggregation.absorb(outcome);
                }
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }

        // Whatever is still pending belongs to a worker that crashed.
        let mut crashed: Vec<(usize, Vec<u32>)> = pending.into_iter().collect();
        crashed.sort_by_key(|(worker_id, _)| *worker_id);
        for (worker_id, rows) in crashed {
            warn!(worker = worker_id, jobs = rows.len(), "recording sentinel for crashed worker");
            aggregation.absorb(abandoned(worker_id, &rows));
        }

        aggregation
    }
}
