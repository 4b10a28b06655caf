//! Process-wide metric accumulation shared by all workers of a run.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::models::metrics::{
    CheckFailure, CheckSummary, LatencySummary, MetricCounter, MetricSample, RateSummary,
};

pub mod names {
    pub const RESERVE_PREFIX: &str = "reserve";
    pub const CONFIRM_OK: &str = "confirm_ok";
    pub const CONFIRM_ERR: &str = "confirm_err";
    pub const NET_FAILED: &str = "net_failed";
    pub const DROPPED_ITERATIONS: &str = "dropped_iterations";

    pub const LATENCY_RESERVE: &str = "latency_reserve";
    pub const LATENCY_CONFIRM: &str = "latency_confirm";

    pub const UNEXPECTED_FAIL: &str = "unexpected_fail";

    pub const CHECK_IDEMPOTENCY: &str = "idempotency_one_success_one_conflict";
    pub const CHECK_ADMIN_PING: &str = "admin_ping_200";
    pub const CHECK_RESERVE_ACCEPTED: &str = "reserve_status_200_or_201";
    pub const CHECK_RESERVE_NOT_500: &str = "reserve_status_not_500";

    /// Per-scenario variant of a metric name, e.g. `unexpected_fail:hot_on`.
    pub fn scoped(metric: &str, scenario: &str) -> String {
        format!("{metric}:{scenario}")
    }
}

pub const REPORTED_PERCENTILES: [f64; 3] = [0.50, 0.95, 0.99];

#[derive(Debug)]
pub struct Aggregator {
    started: Instant,
    counters: Mutex<BTreeMap<String, u64>>,
    trends: Mutex<HashMap<String, Vec<MetricSample>>>,
    rates: Mutex<BTreeMap<String, RateSummary>>,
    checks: Mutex<BTreeMap<String, CheckSummary>>,
    check_failures: Mutex<Vec<CheckFailure>>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: Mutex::new(BTreeMap::new()),
            trends: Mutex::new(HashMap::new()),
            rates: Mutex::new(BTreeMap::new()),
            checks: Mutex::new(BTreeMap::new()),
            check_failures: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, counter: MetricCounter) {
        if counter.delta == 0 {
            return;
        }
        *self.counters.lock().entry(counter.name).or_insert(0) += counter.delta;
    }

    /// Appends a latency observation (milliseconds) to `name`.
    pub fn record_latency(&self, name: &str, millis: f64) {
        let sample = MetricSample {
            value: millis,
            timestamp_millis: self.started.elapsed().as_millis() as u64,
        };
        self.trends
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(sample);
    }

    pub fn add_rate(&self, name: &str, hit: bool) {
        let mut rates = self.rates.lock();
        let rate = rates.entry(name.to_string()).or_default();
        rate.total += 1;
        if hit {
            rate.hits += 1;
        }
    }

    /// Records a pass/fail assertion. `detail` is only rendered on failure.
    pub fn check(&self, name: &str, passed: bool, detail: impl FnOnce() -> String) {
        {
            let mut checks = self.checks.lock();
            let check = checks.entry(name.to_string()).or_default();
            if passed {
                check.passes += 1;
            } else {
                check.fails += 1;
            }
        }
        if !passed {
            self.check_failures.lock().push(CheckFailure {
                check: name.to_string(),
                detail: detail(),
            });
        }
    }

    pub fn samples(&self, name: &str) -> Vec<MetricSample> {
        self.trends.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Computes the report view over the full sample sets. Called once all
    /// workers have finished.
    pub fn finalize(&self) -> AggregateSnapshot {
        let latencies = self
            .trends
            .lock()
            .iter()
            .map(|(name, samples)| {
                let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
                (name.clone(), summarize(values))
            })
            .collect();

        AggregateSnapshot {
            elapsed_secs: self.elapsed_secs(),
            counters: self.counters.lock().clone(),
            latencies,
            rates: self.rates.lock().clone(),
            checks: self.checks.lock().clone(),
            check_failures: self.check_failures.lock().clone(),
        }
    }
}

/// Read-only state of a finalized [`Aggregator`].
#[derive(Debug, Clone, Default)]
pub struct AggregateSnapshot {
    pub elapsed_secs: f64,
    pub counters: BTreeMap<String, u64>,
    pub latencies: BTreeMap<String, LatencySummary>,
    pub rates: BTreeMap<String, RateSummary>,
    pub checks: BTreeMap<String, CheckSummary>,
    pub check_failures: Vec<CheckFailure>,
}

pub fn summarize(mut values: Vec<f64>) -> LatencySummary {
    if values.is_empty() {
        return LatencySummary::default();
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let [p50, p95, p99] = REPORTED_PERCENTILES.map(|p| percentile(&values, p));
    LatencySummary {
        count: values.len() as u64,
        min: values[0],
        max: values[values.len() - 1],
        p50,
        p95,
        p99,
    }
}

/// Value at rank `ceil(p * count)` (1-based) of an ascending sample set.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
