//! Per-session correlation state machine.
//!
//! A [`SessionCorrelator`] owns one driver and the session identifier of the
//! conversation currently open in it. Each attempt opens a fresh
//! [`EventWindow`] *before* acting on the driver, acts, then waits on the
//! window scoped to the known identifier.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use harvest_types::{EventStream, HarvestError, InteractiveDriver};

use crate::event_window::{
    Attribution, CorrelationRules, CorrelationScope, EventWindow, WindowOutcome, WindowResolution,
};

/// Headroom over a driver action's own timeout before the call is abandoned.
const DRIVER_GRACE: Duration = Duration::from_secs(1);

/// Run one driver action, bounded even if the driver ignores its timeout.
async fn bounded<T, F>(action: &str, timeout: Duration, call: F) -> Result<T, HarvestError>
where
    F: Future<Output = Result<T, HarvestError>>,
{
    match tokio::time::timeout(timeout + DRIVER_GRACE, call).await {
        Ok(result) => result,
        Err(_) => Err(HarvestError::Timeout(format!(
            "driver {action} did not complete within {}ms",
            timeout.as_millis()
        ))),
    }
}

pub struct SessionCorrelator {
    worker_id: usize,
    driver: Box<dyn InteractiveDriver>,
    events: EventStream,
    rules: Arc<CorrelationRules>,
    session_id: Option<String>,
    unscoped_matches: u32,
}

impl SessionCorrelator {
    pub fn new(
        worker_id: usize,
        driver: Box<dyn InteractiveDriver>,
        events: EventStream,
        rules: Arc<CorrelationRules>,
    ) -> Self {
        Self {
            worker_id,
            driver,
            events,
            rules,
            session_id: None,
            unscoped_matches: 0,
        }
    }

    /// Identifier of the conversation currently open, if known.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Answers accepted so far without an identifier to scope them.
    pub fn unscoped_matches(&self) -> u32 {
        self.unscoped_matches
    }

    fn window(&self) -> EventWindow {
        EventWindow::open(&self.events, self.rules.clone()).with_view(self.driver.view())
    }

    /// Navigate the session view to `target`.
    pub async fn open(&mut self, target: &str, timeout: Duration) -> Result<(), HarvestError> {
        bounded("open", timeout, self.driver.open(target, timeout)).await
    }

    /// Submit `prompt` in a fresh conversation and wait for its answer.
    ///
    /// Returns `Ok(None)` when no answer arrived within
    /// `correlation_timeout`. Driver failures propagate.
    pub async fn submit_and_correlate(
        &mut self,
        prompt: &str,
        submit_timeout: Duration,
        correlation_timeout: Duration,
    ) -> Result<Option<Vec<Value>>, HarvestError> {
        self.session_id = None;
        let window = self.window();

        let location = bounded(
            "submit",
            submit_timeout,
            self.driver.submit(prompt, submit_timeout),
        )
        .await?;

        self.session_id = self.rules.session_id_from(&location);
        match &self.session_id {
            Some(id) => debug!(worker = self.worker_id, session_id = %id, "submission opened conversation"),
            None => warn!(
                worker = self.worker_id,
                location = %location,
                "no session id in post-submit location, correlating unscoped until one is announced"
            ),
        }

        let scope = CorrelationScope::for_session(self.session_id.as_deref());
        let resolution = window.await_match(scope, correlation_timeout).await;
        Ok(self.absorb(resolution))
    }

    /// Reload the current conversation and wait again for its answer.
    pub async fn reload_and_correlate(
        &mut self,
        action_timeout: Duration,
        correlation_timeout: Duration,
    ) -> Result<Option<Vec<Value>>, HarvestError> {
        let window = self.window();

        bounded("reload", action_timeout, self.driver.reload(action_timeout)).await?;

        let scope = CorrelationScope::for_session(self.session_id.as_deref());
        let resolution = window.await_match(scope, correlation_timeout).await;
        Ok(self.absorb(resolution))
    }

    /// Return the view to a neutral state and forget the conversation.
    pub async fn reset(&mut self, timeout: Duration) -> Result<(), HarvestError> {
        self.session_id = None;
        bounded("reset", timeout, self.driver.reset(timeout)).await
    }

    /// Keep any identifier discovered by the window and unwrap its payload.
    fn absorb(&mut self, resolution: WindowResolution) -> Option<Vec<Value>> {
        if self.session_id.is_none() {
            if let Some(id) = resolution.scope.session_id() {
                debug!(worker = self.worker_id, session_id = %id, "adopted session id announced by this view");
                self.session_id = Some(id.to_string());
            }
        }
        if let WindowOutcome::Matched {
            attribution: Attribution::Unscoped,
            ..
        } = &resolution.outcome
        {
            self.unscoped_matches += 1;
            warn!(
                worker = self.worker_id,
                "answer matched without a session id; it may belong to another conversation"
            );
        }
        resolution.into_fragments()
    }
}
