use std::sync::Arc;

use hyper::StatusCode;
use tokio::time::Instant;
use tracing::warn;

use crate::aggregator::{names, Aggregator};
use crate::classifier::classify_response;
use crate::client::InventoryApi;
use crate::error::TransportError;
use crate::models::metrics::{Classification, MetricCounter, Outcome};
use crate::models::scenario::{ConfirmUnit, RequestUnit, WorkloadKind};
use crate::sampler::KeyPool;

/// Executes one workload iteration and feeds the aggregator.
pub struct RequestDriver<A> {
    api: Arc<A>,
    metrics: Arc<Aggregator>,
    qty: u32,
}

impl<A> Clone for RequestDriver<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            metrics: Arc::clone(&self.metrics),
            qty: self.qty,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Reserve,
    Confirm,
}

type Response = Result<StatusCode, TransportError>;

impl<A: InventoryApi> RequestDriver<A> {
    pub fn new(api: Arc<A>, metrics: Arc<Aggregator>, qty: u32) -> Self {
        Self { api, metrics, qty }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn metrics(&self) -> &Aggregator {
        &self.metrics
    }

    pub async fn run_iteration(&self, scenario: &str, kind: WorkloadKind, pool: &KeyPool) {
        let menu_id = pool.sample_key().to_string();
        match kind {
            WorkloadKind::ReserveConfirm | WorkloadKind::ZipfMixed => {
                self.reserve_then_confirm(scenario, &menu_id).await;
            }
            WorkloadKind::ReserveStorm => {
                let unit = RequestUnit::fresh(&menu_id, self.qty);
                self.timed_reserve(scenario, &unit).await;
            }
            WorkloadKind::IdempotencyDoubleHit => {
                self.idempotency_double_hit(scenario, &menu_id).await;
            }
            WorkloadKind::ReserveCheck => {
                self.checked_reserve(scenario, &menu_id).await;
            }
        }
    }

    /// Reserve, and confirm only when the reserve succeeded.
    pub async fn reserve_then_confirm(&self, scenario: &str, menu_id: &str) -> Outcome {
        let unit = RequestUnit::fresh(menu_id, self.qty);
        let reserved = self.timed_reserve(scenario, &unit).await;

        if reserved.outcome == Outcome::Success {
            let confirm = ConfirmUnit {
                order_line_id: unit.order_line_id,
            };
            let start = Instant::now();
            let response = self.api.confirm(&confirm).await;
            let elapsed = start.elapsed().as_secs_f64() * 1000.0;
            self.record(scenario, Step::Confirm, &response, elapsed);
        }
        reserved.outcome
    }

    /// Two concurrent reserves sharing one order line id. Both responses are
    /// awaited before either is classified. Returns whether exactly one
    /// succeeded and exactly one conflicted.
    pub async fn idempotency_double_hit(&self, scenario: &str, menu_id: &str) -> bool {
        let first = RequestUnit::fresh(menu_id, self.qty);
        let second = first.clone();

        let ((first_response, first_ms), (second_response, second_ms)) =
            tokio::join!(self.send_reserve(&first), self.send_reserve(&second));
        let a = self.record(scenario, Step::Reserve, &first_response, first_ms);
        let b = self.record(scenario, Step::Reserve, &second_response, second_ms);

        let outcomes = [a.outcome, b.outcome];
        let successes = outcomes.iter().filter(|o| **o == Outcome::Success).count();
        let conflicts = outcomes.iter().filter(|o| **o == Outcome::Conflict).count();
        let passed = successes == 1 && conflicts == 1;

        if !passed {
            warn!(
                scenario,
                order_line_id = %first.order_line_id,
                first = %a.outcome,
                second = %b.outcome,
                "idempotency check failed"
            );
        }
        self.metrics.check(names::CHECK_IDEMPOTENCY, passed, || {
            format!(
                "orderLineId {}: {} / {}",
                first.order_line_id, a.outcome, b.outcome
            )
        });
        passed
    }

    /// Reserve only, then assert the status was 200/201 and was not a 500.
    pub async fn checked_reserve(&self, scenario: &str, menu_id: &str) -> Outcome {
        let unit = RequestUnit::fresh(menu_id, self.qty);
        let (response, elapsed) = self.send_reserve(&unit).await;
        let classification = self.record(scenario, Step::Reserve, &response, elapsed);

        let status = response.as_ref().ok().map(StatusCode::as_u16);
        let detail = || match &response {
            Ok(status) => format!("menuId {menu_id}: status {}", status.as_u16()),
            Err(err) => format!("menuId {menu_id}: {err}"),
        };
        self.metrics.check(
            names::CHECK_RESERVE_ACCEPTED,
            matches!(status, Some(200) | Some(201)),
            detail,
        );
        self.metrics
            .check(names::CHECK_RESERVE_NOT_500, status != Some(500), detail);
        classification.outcome
    }

    async fn send_reserve(&self, unit: &RequestUnit) -> (Response, f64) {
        let start = Instant::now();
        let response = self.api.reserve(unit).await;
        (response, start.elapsed().as_secs_f64() * 1000.0)
    }

    async fn timed_reserve(&self, scenario: &str, unit: &RequestUnit) -> Classification {
        let (response, elapsed) = self.send_reserve(unit).await;
        self.record(scenario, Step::Reserve, &response, elapsed)
    }

    fn record(
        &self,
        scenario: &str,
        step: Step,
        response: &Response,
        elapsed_ms: f64,
    ) -> Classification {
        let classification = classify_response(response);
        let m = &self.metrics;

        let latency = match step {
            Step::Reserve => {
                m.add(MetricCounter::one(format!(
                    "{}_{}",
                    names::RESERVE_PREFIX,
                    classification.outcome.counter_suffix()
                )));
                names::LATENCY_RESERVE
            }
            Step::Confirm => {
                // a reservation is already held, so anything but 200 is a confirm error
                let confirmed = matches!(response, Ok(status) if *status == StatusCode::OK);
                m.add(MetricCounter::one(if confirmed {
                    names::CONFIRM_OK
                } else {
                    names::CONFIRM_ERR
                }));
                names::LATENCY_CONFIRM
            }
        };
        m.record_latency(latency, elapsed_ms);
        m.record_latency(&names::scoped(latency, scenario), elapsed_ms);

        m.add_rate(names::UNEXPECTED_FAIL, classification.unexpected);
        m.add_rate(
            &names::scoped(names::UNEXPECTED_FAIL, scenario),
            classification.unexpected,
        );

        if let Err(err) = response {
            m.add(MetricCounter::one(names::NET_FAILED));
            warn!(scenario, step = ?step, error = %err, "net-fail");
        }
        classification
    }
}
