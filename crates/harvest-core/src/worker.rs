//! Worker Loop: one session processing one slice of jobs in order.
//!
//! Per job: submit and correlate; on no answer, reload and re-listen up to
//! `max_reload_attempts` times; record the formatted answer or the sentinel;
//! reset the view; pause before the next job. Every failure is contained at
//! job granularity, so a worker always returns exactly one result per job.

use std::time::Duration;

use tracing::{debug, info, warn};

use harvest_types::{HarvestConfig, Job, JobResult, WorkerOutcome, WorkerStats};

use crate::correlator::SessionCorrelator;
use crate::payload::format_fragments;

/// Timing and retry policy for one Worker Loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Landing page opened before the first job.
    pub service_base_url: String,
    pub submit_timeout: Duration,
    pub correlation_timeout: Duration,
    /// Window length for each reload attempt.
    pub reload_timeout: Duration,
    /// Bound on open, reload and reset actions.
    pub action_timeout: Duration,
    pub max_reload_attempts: u32,
    pub inter_job_delay: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            service_base_url: config.service_base_url.clone(),
            submit_timeout: config.submit_timeout(),
            correlation_timeout: config.correlation_timeout(),
            reload_timeout: config.reload_timeout(),
            action_timeout: config.action_timeout(),
            max_reload_attempts: config.max_reload_attempts,
            inter_job_delay: config.inter_job_delay(),
        }
    }
}

pub struct WorkerLoop {
    worker_id: usize,
    correlator: SessionCorrelator,
    settings: WorkerSettings,
    stats: WorkerStats,
}

impl WorkerLoop {
    pub fn new(worker_id: usize, correlator: SessionCorrelator, settings: WorkerSettings) -> Self {
        Self {
            worker_id,
            correlator,
            settings,
            stats: WorkerStats::default(),
        }
    }

    /// Process `jobs` in order and return one result per job.
    pub async fn run(mut self, jobs: Vec<Job>) -> WorkerOutcome {
        if jobs.is_empty() {
            return self.finish(Vec::new());
        }

        if let Err(e) = self
            .correlator
            .open(&self.settings.service_base_url, self.settings.action_timeout)
            .await
        {
            self.stats.driver_failures += 1;
            warn!(worker = self.worker_id, error = %e, "failed to open landing page, continuing");
        }

        let total = jobs.len();
        let mut results = Vec::with_capacity(total);

        for (index, job) in jobs.into_iter().enumerate() {
            let result = self.process(&job).await;
            results.push(result);

            if index + 1 < total {
                self.reset().await;
                tokio::time::sleep(self.settings.inter_job_delay).await;
            }
        }

        self.finish(results)
    }

    /// Submit, retry, and format one job. Never fails.
    async fn process(&mut self, job: &Job) -> JobResult {
        info!(worker = self.worker_id, row = job.row, prompt = %job.text, "processing job");

        let mut fragments = match self
            .correlator
            .submit_and_correlate(
                &job.text,
                self.settings.submit_timeout,
                self.settings.correlation_timeout,
            )
            .await
        {
            Ok(found) => found,
            Err(e) => {
                self.stats.driver_failures += 1;
                warn!(worker = self.worker_id, row = job.row, error = %e, "submission failed");
                None
            }
        };

        let mut attempt = 0;
        while fragments.as_ref().is_none_or(|f| f.is_empty())
            && attempt < self.settings.max_reload_attempts
        {
            attempt += 1;
            self.stats.reload_attempts += 1;
            info!(
                worker = self.worker_id,
                row = job.row,
                attempt,
                max = self.settings.max_reload_attempts,
                session_id = self.correlator.session_id().unwrap_or("-"),
                "no answer yet, reloading"
            );

            match self
                .correlator
                .reload_and_correlate(self.settings.action_timeout, self.settings.reload_timeout)
                .await
            {
                Ok(found) => fragments = found,
                Err(e) => {
                    self.stats.driver_failures += 1;
                    warn!(worker = self.worker_id, row = job.row, attempt, error = %e, "reload failed");
                }
            }
        }

        let value = format_fragments(fragments.as_deref().unwrap_or_default());
        let result = JobResult::new(job.row, value);
        if result.is_sentinel() {
            self.stats.sentinel += 1;
        } else {
            self.stats.answered += 1;
        }
        info!(worker = self.worker_id, row = job.row, result = %result.value, "job finished");
        result
    }

    /// Best-effort return to a neutral view.
    async fn reset(&mut self) {
        if let Err(e) = self.correlator.reset(self.settings.action_timeout).await {
            self.stats.driver_failures += 1;
            warn!(worker = self.worker_id, error = %e, "failed to reset session, continuing");
        }
    }

    fn finish(self, results: Vec<JobResult>) -> WorkerOutcome {
        debug!(worker = self.worker_id, jobs = results.len(), "worker loop finished");
        WorkerOutcome {
            worker_id: self.worker_id,
            results,
            stats: WorkerStats {
                unscoped_matches: self.correlator.unscoped_matches(),
                ..self.stats
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_window::CorrelationRules;
    use crate::test_support::*;
    use harvest_types::config::CorrelationConfig;
    use harvest_types::{EventStream, NetworkEvent};
    use serde_json::json;
    use std::sync::Arc;

    fn settings(max_reload_attempts: u32) -> WorkerSettings {
        WorkerSettings {
            max_reload_attempts,
            ..WorkerSettings::from_config(&HarvestConfig::default())
        }
    }

    fn worker(events: &EventStream, driver: ScriptedDriver, max_reload_attempts: u32) -> WorkerLoop {
        let rules = Arc::new(CorrelationRules::from_config(&CorrelationConfig::default()).unwrap());
        let correlator = SessionCorrelator::new(0, Box::new(driver), events.clone(), rules);
        WorkerLoop::new(0, correlator, settings(max_reload_attempts))
    }

    #[test]
    fn test_settings_from_config() {
        let settings = WorkerSettings::from_config(&HarvestConfig::default());
        assert_eq!(settings.correlation_timeout, Duration::from_secs(5));
        assert_eq!(settings.reload_timeout, Duration::from_secs(10));
        assert_eq!(settings.max_reload_attempts, 3);
        assert_eq!(settings.service_base_url, "https://chatgpt.com/");
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_on_first_attempt() {
        let events = EventStream::new(64);
        let driver = ScriptedDriver::new(&events).on_submit(
            Reply::ok(location(SESSION))
                .emitting(answer(SESSION, json!({"message": {"metadata": {"queries": ["answer one"]}}})))
                .after(Duration::from_secs(2)),
        );
        let calls = driver.calls();

        let outcome = worker(&events, driver, 3).run(vec![Job::new(2, "hello")]).await;

        assert_eq!(outcome.results, vec![JobResult::new(2, "answer one")]);
        assert_eq!(DriverCalls::get(&calls.reloads), 0);
        assert_eq!(DriverCalls::get(&calls.opens), 1);
        assert_eq!(outcome.stats.answered, 1);
        assert_eq!(outcome.stats.reload_attempts, 0);
        assert_eq!(outcome.stats.unscoped_matches, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reloads_record_sentinel() {
        let events = EventStream::new(64);
        let driver = ScriptedDriver::new(&events).on_submit(Reply::ok(location(SESSION)));
        let calls = driver.calls();

        let outcome = worker(&events, driver, 2).run(vec![Job::new(2, "hello")]).await;

        assert_eq!(outcome.results, vec![JobResult::sentinel(2)]);
        assert_eq!(DriverCalls::get(&calls.reloads), 2);
        assert_eq!(outcome.stats.sentinel, 1);
        assert_eq!(outcome.stats.reload_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_failure_recovers_through_reload() {
        let events = EventStream::new(64);
        let driver = ScriptedDriver::new(&events)
            .on_submit(Reply::fail("send button disabled"))
            .on_reload(Reply::ok("").emitting(NetworkEvent::new(
                "https://chatgpt.com/backend-api/conversation/abc-123",
                "application/json",
                json!({"a": {"queries": ["x", "y"]}}).to_string(),
            )));
        let calls = driver.calls();

        let outcome = worker(&events, driver, 1).run(vec![Job::new(7, "hello")]).await;

        assert_eq!(outcome.results, vec![JobResult::new(7, "x,y")]);
        assert_eq!(DriverCalls::get(&calls.reloads), 1);
        assert_eq!(outcome.stats.driver_failures, 1);
        // No session id was ever known, so the answer is flagged.
        assert_eq!(outcome.stats.unscoped_matches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_retrying_once_answered() {
        let events = EventStream::new(64);
        let driver = ScriptedDriver::new(&events)
            .on_submit(Reply::ok(location(SESSION)))
            .on_reload(Reply::ok(""))
            .on_reload(Reply::ok("").emitting(answer(SESSION, json!({"queries": ["second reload"]}))));
        let calls = driver.calls();

        let outcome = worker(&events, driver, 5).run(vec![Job::new(3, "hello")]).await;

        assert_eq!(outcome.results, vec![JobResult::new(3, "second reload")]);
        assert_eq!(DriverCalls::get(&calls.reloads), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_never_abort_the_slice() {
        let events = EventStream::new(64);
        let driver = ScriptedDriver::new(&events)
            .failing_open()
            .failing_reset()
            .on_submit(Reply::fail("boom"))
            .on_reload(Reply::fail("boom"))
            .on_submit(Reply::ok(location(SESSION)).emitting(answer(SESSION, json!({"queries": ["ok"]}))));
        let calls = driver.calls();

        let outcome = worker(&events, driver, 1)
            .run(vec![Job::new(2, "first"), Job::new(4, "second")])
            .await;

        assert_eq!(
            outcome.results,
            vec![JobResult::sentinel(2), JobResult::new(4, "ok")]
        );
        // One reset between the two jobs, none after the last.
        assert_eq!(DriverCalls::get(&calls.resets), 1);
        // open + submit + reload + reset
        assert_eq!(outcome.stats.driver_failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_processed_in_slice_order_with_pacing() {
        let events = EventStream::new(64);
        let driver = ScriptedDriver::new(&events)
            .on_submit(Reply::ok(location("aaaa1111")).emitting(answer("aaaa1111", json!({"queries": ["a"]}))))
            .on_submit(Reply::ok(location("bbbb2222")).emitting(answer("bbbb2222", json!({"queries": ["b"]}))))
            .on_submit(Reply::ok(location("cccc3333")).emitting(answer("cccc3333", json!({"queries": ["c"]}))));

        let started = tokio::time::Instant::now();
        let outcome = worker(&events, driver, 0)
            .run(vec![Job::new(2, "a"), Job::new(5, "b"), Job::new(8, "c")])
            .await;

        let rows: Vec<u32> = outcome.results.iter().map(|r| r.row).collect();
        assert_eq!(rows, vec![2, 5, 8]);
        let values: Vec<&str> = outcome.results.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, vec!["a", "b", "c"]);
        // Two inter-job pauses of 1s each.
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_slice_is_a_no_op() {
        let events = EventStream::new(64);
        let driver = ScriptedDriver::new(&events);
        let calls = driver.calls();

        let outcome = worker(&events, driver, 3).run(vec![]).await;

        assert!(outcome.results.is_empty());
        assert_eq!(DriverCalls::get(&calls.opens), 0);
    }
}
