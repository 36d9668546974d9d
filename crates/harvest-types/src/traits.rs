/// Trait contracts for the collaborators the harvest core drives.
///
/// The core never talks to a browser, a workbook or a login page directly.
/// It codes against these interfaces, and concrete adapters (the HTTP
/// automation bridge, the JSON workbook) implement them. Tests substitute
/// scripted doubles.
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Credentials;
use crate::errors::HarvestError;
use crate::jobs::{EventStream, Job, JobResult};

// ============================================================
// Interactive Driver
// ============================================================

/// Performs UI-level actions against one session view of the target service.
///
/// A driver is owned by exactly one Worker Loop for its whole lifetime, so
/// every action takes `&mut self`. Each action may block up to the supplied
/// timeout and fails with [`HarvestError::Driver`] (or `Timeout`/`Bridge`).
#[async_trait]
pub trait InteractiveDriver: Send + Sync {
    /// Identifier the event stream tags this view's responses with, if the
    /// driver's event source reports one.
    fn view(&self) -> Option<&str> {
        None
    }

    /// Navigate the session view to `target`.
    async fn open(&mut self, target: &str, timeout: Duration) -> Result<(), HarvestError>;

    /// Fill and submit `text` in a fresh conversation.
    ///
    /// Returns the location the view navigated to after submission, which
    /// normally encodes the new conversation's identifier.
    async fn submit(&mut self, text: &str, timeout: Duration) -> Result<String, HarvestError>;

    /// Reload the current conversation view.
    async fn reload(&mut self, timeout: Duration) -> Result<(), HarvestError>;

    /// Return the view to a neutral state, ready for the next job.
    async fn reset(&mut self, timeout: Duration) -> Result<(), HarvestError>;
}

/// Creates session views and exposes the network events they emit.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// The shared event stream every session's responses are published on.
    fn events(&self) -> EventStream;

    /// Launch a new, exclusively owned session view for `worker_id`.
    async fn launch(&self, worker_id: usize) -> Result<Box<dyn InteractiveDriver>, HarvestError>;
}

// ============================================================
// Credential Flow
// ============================================================

/// Authenticates against the target service.
///
/// Invoked at most once per run, before any worker starts. A failure aborts
/// the run.
#[async_trait]
pub trait CredentialFlow: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<(), HarvestError>;
}

// ============================================================
// Tabular Store
// ============================================================

/// Ordered job input and keyed result output.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Sheet names in workbook order.
    async fn list_sheets(&self) -> Result<Vec<String>, HarvestError>;

    /// Jobs of `sheet` in row order. Rows with empty prompt text are excluded.
    async fn read_jobs(&self, sheet: &str) -> Result<Vec<Job>, HarvestError>;

    /// Write results into a new column of `sheet`.
    ///
    /// The column is the first one, scanning from the configured start
    /// column, whose header is empty or equals `run_date`. Returns the
    /// 1-based index of the chosen column.
    async fn write_results(
        &mut self,
        sheet: &str,
        results: &[JobResult],
        run_date: &str,
    ) -> Result<u32, HarvestError>;

    /// Flush all pending writes to durable storage.
    async fn persist(&mut self) -> Result<(), HarvestError>;
}
