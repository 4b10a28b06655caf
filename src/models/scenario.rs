use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One segment of a ramp profile: hold `target` concurrent workers for `duration`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioPhase {
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub target: u64,
}

impl ScenarioPhase {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Ordered phase sequence. The span of the profile is the sum of its phases.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct RampProfile(pub Vec<ScenarioPhase>);

impl RampProfile {
    pub fn new(phases: Vec<ScenarioPhase>) -> Self {
        Self(phases)
    }

    /// A single phase holding `target` workers for `duration`.
    pub fn constant(target: u64, duration: Duration) -> Self {
        Self(vec![ScenarioPhase::new(duration, target)])
    }

    pub fn phases(&self) -> &[ScenarioPhase] {
        &self.0
    }

    pub fn total_span(&self) -> Duration {
        self.0.iter().map(|p| p.duration).sum()
    }

    pub fn peak_concurrency(&self) -> u64 {
        self.0.iter().map(|p| p.target).max().unwrap_or(0)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    /// Reserve on the hot key, confirm when the reserve succeeded.
    ReserveConfirm,
    /// Reserve only, on the hot key.
    ReserveStorm,
    /// Reserve+confirm over a Zipf-skewed key pool.
    ZipfMixed,
    /// Two concurrent reserves sharing one order line id.
    IdempotencyDoubleHit,
    /// Reserve only, asserting the status was accepted and was not a 500.
    ReserveCheck,
}

impl WorkloadKind {
    pub fn default_think_time(self) -> Duration {
        match self {
            WorkloadKind::ReserveConfirm => Duration::from_millis(50),
            WorkloadKind::ReserveStorm => Duration::from_millis(100),
            WorkloadKind::ZipfMixed => Duration::from_millis(20),
            WorkloadKind::IdempotencyDoubleHit => Duration::ZERO,
            WorkloadKind::ReserveCheck => Duration::from_millis(10),
        }
    }
}

/// Open-model pacing: iterations start at a fixed rate regardless of how
/// long earlier ones take, up to `max_workers` in flight.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalRate {
    /// Iterations started per `time_unit`.
    pub rate: u64,
    #[serde(default = "default_time_unit", with = "humantime_serde")]
    pub time_unit: Duration,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Expected concurrency; exceeding it is logged.
    pub pre_allocated_workers: u64,
    /// In-flight ceiling; arrivals beyond it are dropped.
    pub max_workers: u64,
}

fn default_time_unit() -> Duration {
    Duration::from_secs(1)
}

impl ArrivalRate {
    /// Spacing between two arrivals, `None` when the rate is zero.
    pub fn period(&self) -> Option<Duration> {
        if self.rate == 0 || self.time_unit.is_zero() {
            return None;
        }
        let rate = u32::try_from(self.rate).unwrap_or(u32::MAX);
        Some((self.time_unit / rate).max(Duration::from_micros(1)))
    }
}

/// Bernoulli split between the hot key and one cold key.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct KeyMix {
    pub cold_key: String,
    /// Probability of drawing the hot key; `1.0` is hot only, `0.0` cold only.
    #[serde(default = "default_hot_ratio")]
    pub hot_ratio: f64,
}

fn default_hot_ratio() -> f64 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct Scenario {
    pub name: String,
    pub workload: WorkloadKind,
    #[serde(default)]
    pub stages: RampProfile,

    #[serde(default, with = "humantime_serde")]
    pub start_offset: Duration,

    #[serde(default = "default_grace", with = "humantime_serde")]
    pub graceful_ramp_down: Duration,

    #[serde(default, with = "humantime_serde")]
    pub think_time: Option<Duration>,

    /// Number of distinct keys for [`WorkloadKind::ZipfMixed`].
    #[serde(default)]
    pub zipf_keys: Option<usize>,

    /// Toggle the hot-path optimization for the target key when the scenario starts.
    #[serde(default)]
    pub hot_path: Option<bool>,

    /// Stop a worker after this many iterations.
    #[serde(default)]
    pub iterations_per_worker: Option<u64>,

    /// Hard bound on how long the scenario keeps starting iterations.
    #[serde(default, with = "humantime_serde")]
    pub max_duration: Option<Duration>,

    /// Replaces the phase controller with fixed-rate arrivals.
    #[serde(default)]
    pub arrival_rate: Option<ArrivalRate>,

    /// Draw between the hot key and a cold key instead of the workload's pool.
    #[serde(default)]
    pub key_mix: Option<KeyMix>,
}

fn default_grace() -> Duration {
    Duration::from_secs(5)
}

impl Scenario {
    pub fn new(name: impl Into<String>, workload: WorkloadKind, stages: RampProfile) -> Self {
        Self {
            name: name.into(),
            workload,
            stages,
            start_offset: Duration::ZERO,
            graceful_ramp_down: default_grace(),
            think_time: None,
            zipf_keys: None,
            hot_path: None,
            iterations_per_worker: None,
            max_duration: None,
            arrival_rate: None,
            key_mix: None,
        }
    }

    /// A scenario paced by arrivals instead of phases.
    pub fn arrivals(name: impl Into<String>, workload: WorkloadKind, rate: ArrivalRate) -> Self {
        let mut scenario = Self::new(name, workload, RampProfile::default());
        scenario.arrival_rate = Some(rate);
        scenario
    }

    pub fn starting_at(mut self, offset: Duration) -> Self {
        self.start_offset = offset;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.graceful_ramp_down = grace;
        self
    }

    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = Some(think_time);
        self
    }

    pub fn with_hot_path(mut self, on: bool) -> Self {
        self.hot_path = Some(on);
        self
    }

    pub fn with_zipf_keys(mut self, n: usize) -> Self {
        self.zipf_keys = Some(n);
        self
    }

    pub fn with_iterations(mut self, iterations: u64, max_duration: Duration) -> Self {
        self.iterations_per_worker = Some(iterations);
        self.max_duration = Some(max_duration);
        self
    }

    pub fn with_key_mix(mut self, cold_key: impl Into<String>, hot_ratio: f64) -> Self {
        self.key_mix = Some(KeyMix {
            cold_key: cold_key.into(),
            hot_ratio,
        });
        self
    }

    pub fn think_time(&self) -> Duration {
        self.think_time
            .unwrap_or_else(|| self.workload.default_think_time())
    }

    /// Time after the scenario's own start at which no new iteration may begin.
    pub fn active_span(&self) -> Duration {
        if let Some(arrivals) = &self.arrival_rate {
            return arrivals.duration;
        }
        match (self.iterations_per_worker, self.max_duration) {
            (Some(_), Some(max)) => max,
            (None, Some(max)) => max.min(self.stages.total_span()),
            _ => self.stages.total_span(),
        }
    }
}

/// Setup hooks run once, before any scenario starts.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SetupSpec {
    #[serde(default)]
    pub ping: bool,
    #[serde(default)]
    pub hot_path: Option<bool>,
    /// `(available, reserved)` seed for the target key.
    #[serde(default)]
    pub seed: Option<(u64, u64)>,
}

/// A full run: setup, scenarios, output naming.
#[derive(Debug, Deserialize, Clone)]
pub struct RunPlan {
    pub title: String,
    #[serde(default)]
    pub setup: SetupSpec,
    pub scenarios: Vec<Scenario>,
    pub summary_file: String,
    pub metrics_file: String,
}

/// Reserve request body.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestUnit {
    pub order_id: String,
    pub order_line_id: String,
    pub menu_id: String,
    pub qty: u32,
}

impl RequestUnit {
    /// Fresh order and order line ids.
    pub fn fresh(menu_id: &str, qty: u32) -> Self {
        Self {
            order_id: uuid::Uuid::new_v4().to_string(),
            order_line_id: uuid::Uuid::new_v4().to_string(),
            menu_id: menu_id.to_string(),
            qty,
        }
    }
}

/// Confirm request body.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmUnit {
    pub order_line_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_profile_span_is_sum_of_phases() {
        let profile = RampProfile::new(vec![
            ScenarioPhase::new(Duration::from_secs(15), 20),
            ScenarioPhase::new(Duration::from_secs(15), 50),
            ScenarioPhase::new(Duration::from_secs(20), 100),
            ScenarioPhase::new(Duration::from_secs(10), 0),
        ]);
        assert_eq!(profile.total_span(), Duration::from_secs(60));
        assert_eq!(profile.peak_concurrency(), 100);
        assert_eq!(RampProfile::default().total_span(), Duration::ZERO);
    }

    #[test]
    fn scenario_deserializes_from_json() {
        let json = r#"{
            "name": "hot_on",
            "workload": "ReserveConfirm",
            "stages": [{"duration": "15s", "target": 20}, {"duration": "500ms", "target": 0}],
            "start_offset": "1m10s",
            "hot_path": true
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.start_offset, Duration::from_secs(70));
        assert_eq!(scenario.graceful_ramp_down, Duration::from_secs(5));
        assert_eq!(scenario.stages.phases()[1].duration, Duration::from_millis(500));
        assert_eq!(scenario.think_time(), Duration::from_millis(50));
        assert_eq!(scenario.hot_path, Some(true));
        assert!(scenario.arrival_rate.is_none());
    }

    #[test]
    fn arrival_rate_scenario_deserializes_without_stages() {
        let json = r#"{
            "name": "constant_request_rate",
            "workload": "ReserveCheck",
            "arrival_rate": {
                "rate": 200,
                "duration": "10m",
                "pre_allocated_workers": 50,
                "max_workers": 200
            },
            "key_mix": {"cold_key": "cold"}
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        let arrivals = scenario.arrival_rate.unwrap();
        assert_eq!(arrivals.time_unit, Duration::from_secs(1));
        assert_eq!(arrivals.period(), Some(Duration::from_millis(5)));
        assert_eq!(scenario.active_span(), Duration::from_secs(600));
        assert_eq!(scenario.key_mix.as_ref().unwrap().hot_ratio, 0.7);
        assert!(scenario.stages.phases().is_empty());
        assert_eq!(scenario.think_time(), Duration::from_millis(10));
    }

    #[test]
    fn zero_rate_has_no_period() {
        let rate = ArrivalRate {
            rate: 0,
            time_unit: Duration::from_secs(1),
            duration: Duration::from_secs(1),
            pre_allocated_workers: 1,
            max_workers: 1,
        };
        assert_eq!(rate.period(), None);
    }

    #[test]
    fn oversized_stage_literal_is_rejected() {
        let json = r#"{"duration": "9999999999999999999m", "target": 1}"#;
        assert!(serde_json::from_str::<ScenarioPhase>(json).is_err());
    }

    #[test]
    fn request_body_uses_camel_case() {
        let unit = RequestUnit {
            order_id: "o".into(),
            order_line_id: "l".into(),
            menu_id: "m".into(),
            qty: 1,
        };
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["orderLineId"], "l");
        assert_eq!(json["menuId"], "m");
    }

    #[test]
    fn fresh_units_do_not_share_ids() {
        let a = RequestUnit::fresh("m", 1);
        let b = RequestUnit::fresh("m", 1);
        assert_ne!(a.order_line_id, b.order_line_id);
        assert_ne!(a.order_id, a.order_line_id);
    }
}
