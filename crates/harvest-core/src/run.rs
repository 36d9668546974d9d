//! Run orchestration: authenticate once, then dispatch each sheet.
//!
//! Pipeline for a run:
//! 1. Authenticate through the Credential Flow (fatal on failure)
//! 2. Resolve the sheets to process
//! 3. Per sheet: read jobs → distribute → aggregate → write results → persist
//! 4. Log per-sheet and per-run summaries

use std::fmt::Write as _;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use harvest_types::columns::column_letters;
use harvest_types::{
    CredentialFlow, Credentials, HarvestConfig, HarvestError, SessionLauncher, TabularStore,
    WorkerStats,
};

use crate::aggregator::Aggregator;
use crate::distributor::distribute;
use crate::event_window::CorrelationRules;
use crate::worker::WorkerSettings;

/// Format `now` with the workbook's date format for the result header.
pub fn format_run_date(format: &str, now: NaiveDateTime) -> Result<String, HarvestError> {
    let mut out = String::new();
    write!(out, "{}", now.format(format)).map_err(|_| {
        HarvestError::Config(format!("invalid workbook.date_format '{format}'"))
    })?;
    Ok(out)
}

/// Proof that the one-time authentication step has run.
///
/// Only [`authenticate`] creates it, and sheet dispatch requires it.
#[derive(Debug)]
pub struct Authenticated {
    logged_in: bool,
}

impl Authenticated {
    /// Whether a login was actually performed (credentials were present).
    pub fn logged_in(&self) -> bool {
        self.logged_in
    }
}

/// Log in once before any session is launched.
///
/// Without credentials the login is skipped and the sessions are assumed to
/// be authenticated already (e.g. a persistent browser profile).
pub async fn authenticate(
    flow: &dyn CredentialFlow,
    credentials: Option<&Credentials>,
) -> Result<Authenticated, HarvestError> {
    let Some(credentials) = credentials else {
        warn!("no credentials provided, skipping login");
        return Ok(Authenticated { logged_in: false });
    };

    flow.login(credentials).await.map_err(|e| match e {
        HarvestError::Credential(_) => e,
        other => HarvestError::Credential(other.to_string()),
    })?;
    info!(identity = %credentials.identity, "logged in");
    Ok(Authenticated { logged_in: true })
}

/// Outcome of one sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetSummary {
    pub sheet: String,
    pub jobs: usize,
    /// Result column letters, `None` when the sheet had no jobs.
    pub column: Option<String>,
    pub stats: WorkerStats,
}

/// Outcome of a whole run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub run_date: String,
    pub sheets: Vec<SheetSummary>,
}

impl RunSummary {
    pub fn totals(&self) -> WorkerStats {
        let mut totals = WorkerStats::default();
        for sheet in &self.sheets {
            totals.merge(&sheet.stats);
        }
        totals
    }
}

/// All collaborators a run needs.
pub struct RunDeps {
    pub launcher: Arc<dyn SessionLauncher>,
    pub credential_flow: Arc<dyn CredentialFlow>,
    pub store: Box<dyn TabularStore>,
}

/// One configured harvest run.
pub struct HarvestRun {
    launcher: Arc<dyn SessionLauncher>,
    credential_flow: Arc<dyn CredentialFlow>,
    store: Box<dyn TabularStore>,
    rules: Arc<CorrelationRules>,
    settings: WorkerSettings,
    workers: NonZeroUsize,
}

impl HarvestRun {
    pub fn new(deps: RunDeps, config: &HarvestConfig) -> Result<Self, HarvestError> {
        let workers = NonZeroUsize::new(config.worker_count)
            .ok_or_else(|| HarvestError::Config("worker_count must be at least 1".to_string()))?;

        Ok(Self {
            launcher: deps.launcher,
            credential_flow: deps.credential_flow,
            store: deps.store,
            rules: Arc::new(CorrelationRules::from_config(&config.correlation)?),
            settings: WorkerSettings::from_config(config),
            workers,
        })
    }

    /// Authenticate, then process `sheet` (or every sheet) in workbook order.
    ///
    /// Authentication failure aborts before any session is launched.
    pub async fn run(
        &mut self,
        credentials: Option<&Credentials>,
        sheet: Option<&str>,
        run_date: &str,
    ) -> Result<RunSummary, HarvestError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id);

        async {
            let authenticated = authenticate(self.credential_flow.as_ref(), credentials).await?;

            let available = self.store.list_sheets().await?;
            let sheets = match sheet {
                Some(name) if available.iter().any(|s| s == name) => vec![name.to_string()],
                Some(name) => {
                    return Err(HarvestError::Store(format!(
                        "sheet '{name}' not found (available: {})",
                        available.join(", ")
                    )))
                }
                None => available,
            };
            info!(sheets = sheets.len(), workers = self.workers.get(), run_date, "starting run");

            let mut summaries = Vec::with_capacity(sheets.len());
            for name in &sheets {
                summaries.push(self.run_sheet(&authenticated, name, run_date).await?);
            }

            let summary = RunSummary {
                run_id,
                run_date: run_date.to_string(),
                sheets: summaries,
            };
            let totals = summary.totals();
            info!(
                sheets = summary.sheets.len(),
                answered = totals.answered,
                sentinel = totals.sentinel,
                reload_attempts = totals.reload_attempts,
                driver_failures = totals.driver_failures,
                "run complete"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Dispatch one sheet's jobs across fresh sessions and store the results.
    pub async fn run_sheet(
        &mut self,
        _authenticated: &Authenticated,
        sheet: &str,
        run_date: &str,
    ) -> Result<SheetSummary, HarvestError> {
        let jobs = self.store.read_jobs(sheet).await?;
        if jobs.is_empty() {
            info!(sheet, "no jobs in sheet, skipping");
            return Ok(SheetSummary {
                sheet: sheet.to_string(),
                jobs: 0,
                column: None,
                stats: WorkerStats::default(),
            });
        }

        let job_count = jobs.len();
        info!(sheet, jobs = job_count, "dispatching sheet");

        let aggregator = Aggregator::new(
            self.launcher.clone(),
            self.rules.clone(),
            self.settings.clone(),
        );
        let aggregation = aggregator
            .run(distribute(jobs, self.workers))
            .instrument(info_span!("sheet", sheet))
            .await;

        let column = self
            .store
            .write_results(sheet, &aggregation.results, run_date)
            .await?;
        self.store.persist().await?;

        let stats = aggregation.totals();
        let column = column_letters(column);
        info!(
            sheet,
            jobs = job_count,
            column = %column,
            answered = stats.answered,
            sentinel = stats.sentinel,
            unscoped_matches = stats.unscoped_matches,
            "sheet complete"
        );

        Ok(SheetSummary {
            sheet: sheet.to_string(),
            jobs: job_count,
            column: Some(column),
            stats,
        })
    }
}
