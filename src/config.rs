//! Command line / environment configuration and the built-in run plans.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::client::ClientOptions;
use crate::error::{BenchError, BenchResult};
use crate::executor::RunOptions;
use crate::models::scenario::{
    ArrivalRate, RampProfile, RunPlan, Scenario, ScenarioPhase, SetupSpec, WorkloadKind,
};
use crate::utils::duration::parse_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanKind {
    /// hot path off, hot path on, then Zipf-mixed traffic
    Hotkey,
    /// hot-key reserve storm plus the idempotency double hit
    Concurrency,
    /// constant arrival rate over the hot key, the cold key or a mix of both
    Rate,
}

/// Which menu ids the arrival-rate plan targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyMode {
    Hot,
    Cold,
    Mix,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "hotkey-bench", version, about = "Hot-key inventory reservation load generator")]
pub struct Config {
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    #[arg(long, env = "MENU_ID", default_value = "11111111-1111-1111-1111-111111111111")]
    pub menu_id: String,

    /// Available quantity seeded before the hotkey plan
    #[arg(long, env = "STOCK", default_value_t = 200)]
    pub stock: u64,

    #[arg(long, env = "QTY", default_value_t = 1)]
    pub qty: u32,

    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Workers for the reserve storm
    #[arg(long, env = "VUS", default_value_t = 30)]
    pub vus: u64,

    /// Workers for the idempotency double hit
    #[arg(long, env = "VUS2", default_value_t = 10)]
    pub vus2: u64,

    #[arg(long, env = "DURATION", default_value = "10s", value_parser = parse_duration)]
    pub duration: Duration,

    #[arg(long, env = "SCEN2_START", default_value = "12s", value_parser = parse_duration)]
    pub scen2_start: Duration,

    /// Distinct keys for the Zipf-mixed workload
    #[arg(long, env = "ZIPF_KEYS", default_value_t = 20)]
    pub zipf_keys: usize,

    #[arg(long, env = "PLAN", value_enum, default_value_t = PlanKind::Hotkey)]
    pub plan: PlanKind,

    /// Arrivals per second for the rate plan
    #[arg(long, env = "RATE", default_value_t = 200)]
    pub rate: u64,

    #[arg(long, env = "RATE_DURATION", default_value = "10m", value_parser = parse_duration)]
    pub rate_duration: Duration,

    #[arg(long, env = "PRE_ALLOCATED_VUS", default_value_t = 50)]
    pub pre_allocated_vus: u64,

    #[arg(long, env = "MAX_VUS", default_value_t = 200)]
    pub max_vus: u64,

    /// Cold menu id for the rate plan's `cold` and `mix` modes
    #[arg(long, env = "COLD")]
    pub cold_menu_id: Option<String>,

    #[arg(long, env = "MODE", value_enum, default_value_t = KeyMode::Mix)]
    pub mode: KeyMode,

    /// Share of `mix` arrivals sent to the hot key
    #[arg(long, env = "HOT_RATIO", default_value_t = 0.7)]
    pub hot_ratio: f64,

    /// JSON run plan; replaces the built-in plan
    #[arg(long, env = "PLAN_FILE")]
    pub plan_file: Option<PathBuf>,

    #[arg(long, env = "TIMEOUT_MS", default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Ceiling for the unexpected failure rate
    #[arg(long, env = "MAX_FAILURE_RATE", default_value_t = 0.05)]
    pub max_failure_rate: f64,

    #[arg(long, env = "OUT_DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Do not call the admin ping / toggle / seed hooks
    #[arg(long, env = "SKIP_SETUP")]
    pub skip_setup: bool,
}

impl Config {
    pub fn validate(&self) -> BenchResult<()> {
        if self.menu_id.trim().is_empty() {
            return Err(BenchError::InvalidConfig("menu id must not be empty".into()));
        }
        if self.qty == 0 {
            return Err(BenchError::InvalidConfig("qty must be at least 1".into()));
        }
        if self.zipf_keys == 0 {
            return Err(BenchError::InvalidConfig("zipf keys must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.max_failure_rate) {
            return Err(BenchError::InvalidConfig(format!(
                "max failure rate {} is outside [0, 1]",
                self.max_failure_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.hot_ratio) {
            return Err(BenchError::InvalidConfig(format!(
                "hot ratio {} is outside [0, 1]",
                self.hot_ratio
            )));
        }
        if self.plan == PlanKind::Rate && self.plan_file.is_none() {
            if self.max_vus == 0 || self.max_vus < self.pre_allocated_vus {
                return Err(BenchError::InvalidConfig(format!(
                    "max vus {} must be at least 1 and at least pre-allocated vus {}",
                    self.max_vus, self.pre_allocated_vus
                )));
            }
            let needs_cold = self.mode != KeyMode::Hot;
            if needs_cold && self.cold_menu_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
                return Err(BenchError::InvalidConfig(
                    "cold menu id is required for the cold and mix modes".into(),
                ));
            }
        }
        url::Url::parse(&self.base_url)?;
        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.base_url.clone(),
            auth_token: self.auth_token.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            target_url: self.base_url.clone(),
            menu_id: self.menu_id.clone(),
            qty: self.qty,
            zipf_keys: self.zipf_keys,
            max_failure_rate: self.max_failure_rate,
            skip_setup: self.skip_setup,
        }
    }

    /// Plan file if given, otherwise the selected built-in plan.
    pub fn load_plan(&self) -> BenchResult<RunPlan> {
        match &self.plan_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let plan: RunPlan = serde_json::from_str(&raw)?;
                if plan.scenarios.is_empty() {
                    return Err(BenchError::InvalidConfig(format!(
                        "plan {} has no scenarios",
                        path.display()
                    )));
                }
                Ok(plan)
            }
            None => Ok(match self.plan {
                PlanKind::Hotkey => self.hotkey_plan(),
                PlanKind::Concurrency => self.concurrency_plan(),
                PlanKind::Rate => self.rate_plan(),
            }),
        }
    }

    fn hotkey_plan(&self) -> RunPlan {
        let reserve_confirm = RampProfile::new(vec![
            ScenarioPhase::new(Duration::from_secs(15), 20),
            ScenarioPhase::new(Duration::from_secs(15), 50),
            ScenarioPhase::new(Duration::from_secs(20), 100),
            ScenarioPhase::new(Duration::from_secs(10), 0),
        ]);
        let zipf = RampProfile::new(vec![
            ScenarioPhase::new(Duration::from_secs(20), 100),
            ScenarioPhase::new(Duration::from_secs(20), 200),
            ScenarioPhase::new(Duration::from_secs(20), 0),
        ]);

        RunPlan {
            title: "HOT KEY BENCHMARK SUMMARY".into(),
            setup: SetupSpec {
                ping: true,
                hot_path: Some(false),
                seed: Some((self.stock, 0)),
            },
            scenarios: vec![
                Scenario::new("hot_off", WorkloadKind::ReserveConfirm, reserve_confirm.clone())
                    .with_hot_path(false),
                Scenario::new("hot_on", WorkloadKind::ReserveConfirm, reserve_confirm)
                    .with_hot_path(true)
                    .starting_at(Duration::from_secs(70)),
                Scenario::new("mix_zipf", WorkloadKind::ZipfMixed, zipf)
                    .with_zipf_keys(self.zipf_keys)
                    .starting_at(Duration::from_secs(160)),
            ],
            summary_file: "hotkey_benchmark_summary.txt".into(),
            metrics_file: "hotkey_benchmark_metrics.csv".into(),
        }
    }

    fn concurrency_plan(&self) -> RunPlan {
        let max_duration = Duration::from_secs(30);
        RunPlan {
            title: "Inventory Concurrency Summary".into(),
            setup: SetupSpec::default(),
            scenarios: vec![
                Scenario::new(
                    "hot_key_reserve",
                    WorkloadKind::ReserveStorm,
                    RampProfile::constant(self.vus, self.duration),
                ),
                Scenario::new(
                    "idempotency_dupe",
                    WorkloadKind::IdempotencyDoubleHit,
                    RampProfile::constant(self.vus2, max_duration),
                )
                .with_iterations(1, max_duration)
                .starting_at(self.scen2_start),
            ],
            summary_file: "inventory_summary.txt".into(),
            metrics_file: "inventory_metrics.csv".into(),
        }
    }

    fn rate_plan(&self) -> RunPlan {
        let arrivals = ArrivalRate {
            rate: self.rate,
            time_unit: Duration::from_secs(1),
            duration: self.rate_duration,
            pre_allocated_workers: self.pre_allocated_vus,
            max_workers: self.max_vus,
        };
        let mut scenario =
            Scenario::arrivals("constant_request_rate", WorkloadKind::ReserveCheck, arrivals);
        let cold = self.cold_menu_id.clone().unwrap_or_default();
        scenario = match self.mode {
            KeyMode::Hot => scenario,
            KeyMode::Cold => scenario.with_key_mix(cold, 0.0),
            KeyMode::Mix => scenario.with_key_mix(cold, self.hot_ratio),
        };

        RunPlan {
            title: "Inventory Arrival Rate Summary".into(),
            setup: SetupSpec::default(),
            scenarios: vec![scenario],
            summary_file: "inventory_rate_summary.txt".into(),
            metrics_file: "inventory_rate_metrics.csv".into(),
        }
    }
}
