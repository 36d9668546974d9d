//! harvest - dispatch workbook prompts to concurrent sessions and record
//! the answers correlated from each session's network traffic.

mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use harvest_core::bridge::BridgeLauncher;
use harvest_core::run::format_run_date;
use harvest_core::{HarvestRun, RunDeps, RunSummary};
use harvest_store::JsonWorkbook;
use harvest_types::config::{IDENTITY_ENV, SECRET_ENV};
use harvest_types::config_loader::{ConfigLoader, DEFAULT_CONFIG_FILE};
use harvest_types::{Credentials, HarvestConfig};

#[derive(Parser)]
#[command(name = "harvest", version, about = "Concurrent prompt dispatch with answer correlation")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every sheet (or one) and write the results back
    Run {
        /// Only process this sheet
        #[arg(long)]
        sheet: Option<String>,
    },
    /// Validate the config file and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Run { sheet } => run(&cli.config, sheet.as_deref()).await,
        Command::CheckConfig => check_config(&cli.config),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &Path) -> Result<HarvestConfig> {
    ConfigLoader::new(path)
        .load()
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

async fn run(config_path: &Path, sheet: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let _guard = logging::init_logging(&config.logging.directory, &config.logging.file)
        .context("failed to initialize logging")?;

    let credentials = Credentials::from_env();
    if credentials.is_none() {
        info!("{IDENTITY_ENV}/{SECRET_ENV} not set, sessions must already be signed in");
    }

    let store = JsonWorkbook::open(&config.workbook)
        .await
        .context("failed to open workbook")?;
    let launcher = Arc::new(
        BridgeLauncher::connect(&config.bridge).context("failed to connect to automation bridge")?,
    );

    let deps = RunDeps {
        launcher: launcher.clone(),
        credential_flow: launcher,
        store: Box::new(store),
    };
    let run_date = format_run_date(
        &config.workbook.date_format,
        chrono::Local::now().naive_local(),
    )?;

    let mut harvest = HarvestRun::new(deps, &config)?;
    let summary = harvest
        .run(credentials.as_ref(), sheet, &run_date)
        .await
        .context("run failed")?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Run {} ({})", summary.run_id, summary.run_date);
    for sheet in &summary.sheets {
        println!(
            "  {:<20} jobs={:<5} column={:<4} answered={:<5} sentinel={}",
            sheet.sheet,
            sheet.jobs,
            sheet.column.as_deref().unwrap_or("-"),
            sheet.stats.answered,
            sheet.stats.sentinel
        );
    }
    let totals = summary.totals();
    println!(
        "Total: answered={} sentinel={} reloads={} driver_failures={} unscoped={}",
        totals.answered,
        totals.sentinel,
        totals.reload_attempts,
        totals.driver_failures,
        totals.unscoped_matches
    );
}

fn check_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let rendered = serde_yaml::to_string(&config).context("failed to render config")?;
    println!("{} is valid\n\n{rendered}", config_path.display());
    Ok(())
}
