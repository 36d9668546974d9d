/// Shared data types used across all harvest subsystems.
///
/// Jobs flow in from the tabular store, network observations flow in from the
/// automation bridge, and results flow back out to the store. Every crate
/// agrees on these structures.
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Value recorded for a job when no answer was found after all retries.
pub const SENTINEL: &str = "X";

// ============================================================
// Jobs and Results
// ============================================================

/// One textual job read from the tabular store.
///
/// `row` is the stable identifier of the job and the only reliable ordering
/// key once results come back from concurrent workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Row of the source sheet this prompt was read from.
    pub row: u32,
    /// Prompt text to submit.
    pub text: String,
}

impl Job {
    pub fn new(row: u32, text: impl Into<String>) -> Self {
        Self {
            row,
            text: text.into(),
        }
    }
}

/// The recorded outcome of exactly one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Row of the job this result belongs to.
    pub row: u32,
    /// Formatted answer, or [`SENTINEL`] when nothing was found.
    pub value: String,
}

impl JobResult {
    pub fn new(row: u32, value: impl Into<String>) -> Self {
        Self {
            row,
            value: value.into(),
        }
    }

    /// Result for a job that produced no answer.
    pub fn sentinel(row: u32) -> Self {
        Self::new(row, SENTINEL)
    }

    /// Whether this result is the no-answer sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.value == SENTINEL
    }
}

/// Per-worker counters reported when a Worker Loop finishes its slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Jobs that produced a real answer.
    pub answered: u32,
    /// Jobs recorded as the sentinel.
    pub sentinel: u32,
    /// Reload attempts made across all jobs.
    pub reload_attempts: u32,
    /// Driver calls (submit, reload, reset, open) that failed.
    pub driver_failures: u32,
    /// Answers accepted without a session id to scope them.
    #[serde(default)]
    pub unscoped_matches: u32,
}

impl WorkerStats {
    /// Fold another worker's counters into this one.
    pub fn merge(&mut self, other: &WorkerStats) {
        self.answered += other.answered;
        self.sentinel += other.sentinel;
        self.reload_attempts += other.reload_attempts;
        self.driver_failures += other.driver_failures;
        self.unscoped_matches += other.unscoped_matches;
    }
}

/// Everything a Worker Loop hands back to the aggregator.
#[derive(Debug, Clone, Default)]
pub struct WorkerOutcome {
    /// Index of the worker that produced these results.
    pub worker_id: usize,
    /// Results in the worker's own processing order.
    pub results: Vec<JobResult>,
    /// Counters for the run summary.
    pub stats: WorkerStats,
}

// ============================================================
// Event Stream
// ============================================================

/// One network response observed in any session view.
///
/// The body is kept as raw text and parsed only by the event window that
/// inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEvent {
    /// Request URL of the observed response.
    pub url: String,
    /// Value of the response's `content-type` header.
    #[serde(default)]
    pub content_type: String,
    /// Raw response body.
    #[serde(default)]
    pub body: String,
    /// Session view the response was observed in, when the source says.
    #[serde(default)]
    pub view: Option<String>,
}

impl NetworkEvent {
    pub fn new(url: impl Into<String>, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: content_type.into(),
            body: body.into(),
            view: None,
        }
    }

    /// Tag the event with the session view that produced it.
    pub fn in_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    /// Whether this event can be attributed to `view`.
    ///
    /// Untagged events are never attributed to a specific view.
    pub fn observed_in(&self, view: &str) -> bool {
        self.view.as_deref() == Some(view)
    }

    /// Parse the body as JSON. `None` when the body is not valid JSON.
    pub fn parse_body(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Shared, read-only broadcast source of [`NetworkEvent`]s.
///
/// Cloning the stream is cheap; every clone publishes to the same channel.
/// Each [`subscribe`](Self::subscribe) call yields a private receiver that
/// only sees events published after the call.
#[derive(Debug, Clone)]
pub struct EventStream {
    tx: broadcast::Sender<NetworkEvent>,
}

impl EventStream {
    /// Create a stream retaining at most `capacity` unread events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every live subscriber. Returns how many received it.
    pub fn publish(&self, event: NetworkEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Open a private subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
