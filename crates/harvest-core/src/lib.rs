/// Concurrent session dispatch with event correlation.
///
/// Components, leaves first:
/// - **Payload**: Recursive field extraction and answer formatting
/// - **Event Window**: Time-bounded, single-shot match against the event stream
/// - **Correlator**: Per-session identifier state and submit/reload correlation
/// - **Worker**: Sequential per-slice job processing with reload retries
/// - **Distributor**: Round-robin slicing of the job list
/// - **Aggregator**: Concurrent worker execution and result merging
/// - **Run**: Login-once and per-sheet orchestration
/// - **Bridge**: HTTP automation bridge implementing the driver seams
pub mod aggregator;
pub mod bridge;
pub mod correlator;
pub mod distributor;
pub mod event_window;
pub mod payload;
pub mod run;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use aggregator::{Aggregation, Aggregator};
pub use run::{HarvestRun, RunDeps, RunSummary};
