use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hotkey_bench::client::InventoryClient;
use hotkey_bench::config::Config;
use hotkey_bench::executor::run_plan;
use hotkey_bench::report::{print_report, write_report};

/// Exit status when a threshold is breached.
const THRESHOLD_FAILED: u8 = 99;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::parse();
    config.validate().context("invalid configuration")?;
    let plan = config.load_plan().context("failed to load run plan")?;

    let client = InventoryClient::new(config.client_options())
        .context("failed to build inventory client")?;
    let report = run_plan(Arc::new(client), &plan, &config.run_options()).await;

    print_report(&report);
    let (summary, metrics) = write_report(
        &report,
        &config.out_dir,
        &plan.summary_file,
        &plan.metrics_file,
    )
    .context("failed to write report files")?;
    info!(summary = %summary.display(), metrics = %metrics.display(), "report written");

    if report.threshold.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(THRESHOLD_FAILED))
    }
}
