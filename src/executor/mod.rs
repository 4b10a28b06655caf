pub mod driver;
pub mod scheduler;

use std::sync::Arc;

use chrono::Local;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::aggregator::{names, AggregateSnapshot, Aggregator};
use crate::client::InventoryApi;
use crate::models::metrics::{RunReport, ScenarioSummary, ThresholdVerdict};
use crate::models::scenario::{RunPlan, SetupSpec};
use crate::sampler::KeyPool;
use crate::utils::hardware::HostProfile;

use self::driver::RequestDriver;
use self::scheduler::run_scenario;

/// Per-run settings that are not part of the plan itself.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target_url: String,
    pub menu_id: String,
    pub qty: u32,
    pub zipf_keys: usize,
    pub max_failure_rate: f64,
    pub skip_setup: bool,
}

/// Executes every scenario of `plan` and returns the finalized report.
pub async fn run_plan<A: InventoryApi>(
    api: Arc<A>,
    plan: &RunPlan,
    options: &RunOptions,
) -> RunReport {
    let host = HostProfile::detect();
    info!(
        title = %plan.title,
        target = %options.target_url,
        menu_id = %options.menu_id,
        scenarios = plan.scenarios.len(),
        cpu_cores = host.cpu_cores,
        total_mem_mb = host.total_memory_mb(),
        free_mem_mb = host.available_memory_mb(),
        "run started"
    );

    let metrics = Arc::new(Aggregator::new());
    let timestamp = Local::now();

    if options.skip_setup {
        info!("setup hooks skipped");
    } else {
        run_setup(api.as_ref(), &plan.setup, &options.menu_id, &metrics).await;
    }

    let driver = RequestDriver::new(Arc::clone(&api), Arc::clone(&metrics), options.qty);
    let run_start = Instant::now();
    let runs = plan.scenarios.iter().map(|scenario| {
        let pool = KeyPool::for_scenario(scenario, &options.menu_id, options.zipf_keys);
        run_scenario(driver.clone(), scenario.clone(), pool, run_start)
    });
    let scenarios = join_all(runs).await;

    let snapshot = metrics.finalize();
    let report = build_report(plan, options, snapshot, scenarios, timestamp, host);
    info!(
        requests = report.total_requests,
        elapsed_secs = report.elapsed_secs,
        passed = report.threshold.passed(),
        "run finished"
    );
    report
}

async fn run_setup<A: InventoryApi>(
    api: &A,
    setup: &SetupSpec,
    menu_id: &str,
    metrics: &Aggregator,
) {
    if setup.ping {
        let result = api.ping().await;
        let passed = matches!(&result, Ok(status) if status.as_u16() == 200);
        metrics.check(names::CHECK_ADMIN_PING, passed, || format!("{:?}", result));
        if !passed {
            warn!(?result, "admin ping failed");
        }
    }
    if let Some(on) = setup.hot_path {
        if let Err(err) = api.toggle_hot_path(menu_id, on).await {
            warn!(error = %err, on, "hot path toggle failed");
        }
    }
    if let Some((available, reserved)) = setup.seed {
        match api.seed(menu_id, available, reserved).await {
            Ok(status) => info!(%status, available, reserved, "inventory seeded"),
            Err(err) => warn!(error = %err, "inventory seed failed"),
        }
    }
}

/// Rate metrics at or above the ceiling fail the run.
pub fn evaluate_threshold(
    snapshot: &AggregateSnapshot,
    max_failure_rate: f64,
) -> ThresholdVerdict {
    let prefix = format!("{}:", names::UNEXPECTED_FAIL);
    let breaches = snapshot
        .rates
        .iter()
        .filter(|(name, _)| {
            name.as_str() == names::UNEXPECTED_FAIL || name.starts_with(&prefix)
        })
        .filter(|(_, rate)| rate.total > 0 && rate.rate() >= max_failure_rate)
        .map(|(name, rate)| (name.clone(), rate.rate()))
        .collect();
    ThresholdVerdict {
        max_failure_rate,
        breaches,
    }
}

fn build_report(
    plan: &RunPlan,
    options: &RunOptions,
    snapshot: AggregateSnapshot,
    scenarios: Vec<ScenarioSummary>,
    timestamp: chrono::DateTime<Local>,
    host: HostProfile,
) -> RunReport {
    let threshold = evaluate_threshold(&snapshot, options.max_failure_rate);
    let total_requests = snapshot
        .rates
        .get(names::UNEXPECTED_FAIL)
        .map(|r| r.total)
        .unwrap_or(0);
    let throughput = if snapshot.elapsed_secs > 0.0 {
        total_requests as f64 / snapshot.elapsed_secs
    } else {
        0.0
    };

    RunReport {
        title: plan.title.clone(),
        target_url: options.target_url.clone(),
        menu_id: options.menu_id.clone(),
        timestamp,
        elapsed_secs: snapshot.elapsed_secs,
        total_requests,
        throughput,
        host,
        counters: snapshot.counters,
        latencies: snapshot.latencies,
        rates: snapshot.rates,
        checks: snapshot.checks,
        check_failures: snapshot.check_failures,
        scenarios,
        threshold,
    }
}
