//! Scripted collaborator doubles shared by the core's unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use harvest_types::{EventStream, HarvestError, InteractiveDriver, NetworkEvent, SessionLauncher};

pub(crate) const SESSION: &str = "6650f1a2-9c1e-4b7a-8d2e-0123456789ab";

pub(crate) fn location(session: &str) -> String {
    format!("https://chatgpt.com/c/{session}")
}

pub(crate) fn answer(session: &str, body: Value) -> NetworkEvent {
    NetworkEvent::new(
        format!("https://chatgpt.com/backend-api/conversation/{session}"),
        "application/json",
        body.to_string(),
    )
}

/// What one scripted action does.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    result: Result<String, String>,
    publish: Vec<NetworkEvent>,
    delay: Duration,
    stall: Option<Duration>,
}

impl Reply {
    /// Succeed with `location`, publishing nothing.
    pub(crate) fn ok(location: impl Into<String>) -> Self {
        Self {
            result: Ok(location.into()),
            publish: vec![],
            delay: Duration::ZERO,
            stall: None,
        }
    }

    pub(crate) fn fail(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            ..Self::ok("")
        }
    }

    /// Publish `event` once the action returns (or after `delay`).
    pub(crate) fn emitting(mut self, event: NetworkEvent) -> Self {
        self.publish.push(event);
        self
    }

    pub(crate) fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Block for `stall` before returning, ignoring the action timeout.
    pub(crate) fn stalling(mut self, stall: Duration) -> Self {
        self.stall = Some(stall);
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct DriverCalls {
    pub opens: AtomicUsize,
    pub submits: AtomicUsize,
    pub reloads: AtomicUsize,
    pub resets: AtomicUsize,
}

impl DriverCalls {
    pub(crate) fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Driver that plays back queued replies and publishes their events.
pub(crate) struct ScriptedDriver {
    events: EventStream,
    submits: VecDeque<Reply>,
    reloads: VecDeque<Reply>,
    fail_open: bool,
    fail_reset: bool,
    view: Option<String>,
    calls: Arc<DriverCalls>,
}

impl ScriptedDriver {
    pub(crate) fn new(events: &EventStream) -> Self {
        Self {
            events: events.clone(),
            submits: VecDeque::new(),
            reloads: VecDeque::new(),
            fail_open: false,
            fail_reset: false,
            view: None,
            calls: Arc::new(DriverCalls::default()),
        }
    }

    /// Report `view` as the tag this driver's events carry.
    pub(crate) fn in_view(mut self, view: &str) -> Self {
        self.view = Some(view.to_string());
        self
    }

    pub(crate) fn on_submit(mut self, reply: Reply) -> Self {
        self.submits.push_back(reply);
        self
    }

    pub(crate) fn on_reload(mut self, reply: Reply) -> Self {
        self.reloads.push_back(reply);
        self
    }

    pub(crate) fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub(crate) fn failing_reset(mut self) -> Self {
        self.fail_reset = true;
        self
    }

    pub(crate) fn calls(&self) -> Arc<DriverCalls> {
        self.calls.clone()
    }

    async fn play(&self, reply: Reply) -> Result<String, HarvestError> {
        if let Some(stall) = reply.stall {
            tokio::time::sleep(stall).await;
        }
        if reply.delay.is_zero() {
            for event in reply.publish {
                self.events.publish(event);
            }
        } else {
            let events = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(reply.delay).await;
                for event in reply.publish {
                    events.publish(event);
                }
            });
        }
        reply.result.map_err(HarvestError::Driver)
    }
}

#[async_trait]
impl InteractiveDriver for ScriptedDriver {
    fn view(&self) -> Option<&str> {
        self.view.as_deref()
    }

    async fn open(&mut self, _target: &str, _timeout: Duration) -> Result<(), HarvestError> {
        self.calls.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(HarvestError::Driver("page did not load".to_string()));
        }
        Ok(())
    }

    async fn submit(&mut self, _text: &str, _timeout: Duration) -> Result<String, HarvestError> {
        self.calls.submits.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .submits
            .pop_front()
            .unwrap_or_else(|| Reply::ok("https://chatgpt.com/"));
        self.play(reply).await
    }

    async fn reload(&mut self, _timeout: Duration) -> Result<(), HarvestError> {
        self.calls.reloads.fetch_add(1, Ordering::SeqCst);
        let reply = self.reloads.pop_front().unwrap_or_else(|| Reply::ok(""));
        self.play(reply).await.map(|_| ())
    }

    async fn reset(&mut self, _timeout: Duration) -> Result<(), HarvestError> {
        self.calls.resets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reset {
            return Err(HarvestError::Driver("new chat button missing".to_string()));
        }
        Ok(())
    }
}

/// Driver whose submit panics, standing in for a crashed worker.
pub(crate) struct PanickingDriver;

#[async_trait]
impl InteractiveDriver for PanickingDriver {
    async fn open(&mut self, _target: &str, _timeout: Duration) -> Result<(), HarvestError> {
        Ok(())
    }

    async fn submit(&mut self, _text: &str, _timeout: Duration) -> Result<String, HarvestError> {
        panic!("driver crashed");
    }

    async fn reload(&mut self, _timeout: Duration) -> Result<(), HarvestError> {
        Ok(())
    }

    async fn reset(&mut self, _timeout: Duration) -> Result<(), HarvestError> {
        Ok(())
    }
}

/// Launcher handing out pre-built drivers by worker id. Workers without
/// one get an empty [`ScriptedDriver`].
pub(crate) struct ScriptedLauncher {
    events: EventStream,
    drivers: Mutex<HashMap<usize, Box<dyn InteractiveDriver>>>,
    refused: Vec<usize>,
    pub launches: AtomicUsize,
}

impl ScriptedLauncher {
    pub(crate) fn new(events: EventStream) -> Self {
        Self {
            events,
            drivers: Mutex::new(HashMap::new()),
            refused: vec![],
            launches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_driver(self, worker_id: usize, driver: impl InteractiveDriver + 'static) -> Self {
        self.drivers.lock().unwrap().insert(worker_id, Box::new(driver));
        self
    }

    /// Make `launch(worker_id)` fail.
    pub(crate) fn refusing(mut self, worker_id: usize) -> Self {
        self.refused.push(worker_id);
        self
    }
}

#[async_trait]
impl SessionLauncher for ScriptedLauncher {
    fn events(&self) -> EventStream {
        self.events.clone()
    }

    async fn launch(&self, worker_id: usize) -> Result<Box<dyn InteractiveDriver>, HarvestError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.refused.contains(&worker_id) {
            return Err(HarvestError::Bridge("browser tab could not be created".to_string()));
        }
        let scripted = self.drivers.lock().unwrap().remove(&worker_id);
        Ok(scripted.unwrap_or_else(|| Box::new(ScriptedDriver::new(&self.events))))
    }
}
