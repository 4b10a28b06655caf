use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local};

use crate::utils::hardware::HostProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outcome {
    Success,
    Conflict,
    ServiceUnavailable,
    AuthFailure,
    OtherClientError,
    OtherServerError,
    TransportFailure,
}

impl Outcome {
    pub const ALL: [Outcome; 7] = [
        Outcome::Success,
        Outcome::Conflict,
        Outcome::ServiceUnavailable,
        Outcome::AuthFailure,
        Outcome::OtherClientError,
        Outcome::OtherServerError,
        Outcome::TransportFailure,
    ];

    /// Suffix used for the reserve counter of this outcome (`reserve_<suffix>`).
    pub fn counter_suffix(self) -> &'static str {
        match self {
            Outcome::Success => "ok",
            Outcome::Conflict => "409",
            Outcome::ServiceUnavailable => "503",
            Outcome::AuthFailure => "401",
            Outcome::OtherClientError => "other4xx",
            Outcome::OtherServerError => "other5xx",
            Outcome::TransportFailure => "other",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::Success => "success",
            Outcome::Conflict => "conflict",
            Outcome::ServiceUnavailable => "service_unavailable",
            Outcome::AuthFailure => "auth_failure",
            Outcome::OtherClientError => "other_client_error",
            Outcome::OtherServerError => "other_server_error",
            Outcome::TransportFailure => "transport_failure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub outcome: Outcome,
    pub unexpected: bool,
}

/// Latency observation in milliseconds, timestamped relative to run start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub value: f64,
    pub timestamp_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricCounter {
    pub name: String,
    pub delta: u64,
}

impl MetricCounter {
    pub fn new(name: impl Into<String>, delta: u64) -> Self {
        Self {
            name: name.into(),
            delta,
        }
    }

    pub fn one(name: impl Into<String>) -> Self {
        Self::new(name, 1)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateSummary {
    pub hits: u64,
    pub total: u64,
}

impl RateSummary {
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.hits as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub passes: u64,
    pub fails: u64,
}

/// Details of one failed check, kept for post-run inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    pub check: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioSummary {
    pub name: String,
    pub iterations: u64,
    pub workers_started: u64,
    pub stragglers: u64,
    /// Arrivals skipped because every worker slot was busy.
    pub dropped: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdVerdict {
    pub max_failure_rate: f64,
    /// Rate metrics that exceeded the ceiling, with their observed rate.
    pub breaches: Vec<(String, f64)>,
}

impl ThresholdVerdict {
    pub fn passed(&self) -> bool {
        self.breaches.is_empty()
    }
}

/// Final, immutable result of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub title: String,
    pub target_url: String,
    pub menu_id: String,
    pub timestamp: DateTime<Local>,
    pub elapsed_secs: f64,
    pub total_requests: u64,
    pub throughput: f64,
    pub host: HostProfile,

    pub counters: BTreeMap<String, u64>,
    pub latencies: BTreeMap<String, LatencySummary>,
    pub rates: BTreeMap<String, RateSummary>,
    pub checks: BTreeMap<String, CheckSummary>,
    pub check_failures: Vec<CheckFailure>,
    pub scenarios: Vec<ScenarioSummary>,
    pub threshold: ThresholdVerdict,
}
