//! Phase-sequenced worker pool.
//!
//! Each scenario gets its own controller. The controller holds the pool at the
//! active phase's target: it spawns workers when the target rises and signals
//! the newest workers to stop when it falls. A stopped worker always finishes
//! its in-flight iteration; the grace window only decides when a slow one is
//! reported as a straggler.
//!
//! Arrival-paced scenarios skip the phase controller: an interval starts one
//! iteration per period as long as a worker slot is free, and counts the
//! arrival as dropped otherwise.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::client::InventoryApi;
use crate::executor::driver::RequestDriver;
use crate::aggregator::names;
use crate::models::metrics::{MetricCounter, ScenarioSummary};
use crate::models::scenario::{ArrivalRate, Scenario, WorkloadKind};
use crate::sampler::KeyPool;

/// What every worker of one scenario needs to iterate.
struct WorkerPlan {
    scenario: String,
    kind: WorkloadKind,
    pool: KeyPool,
    think_time: Duration,
    iterations: Option<u64>,
    deadline: Instant,
}

#[derive(Debug)]
struct WorkerExit {
    id: u64,
    iterations: u64,
}

/// Reports the worker's exit even if the iteration panicked.
struct ExitGuard {
    id: u64,
    iterations: u64,
    exits: mpsc::UnboundedSender<WorkerExit>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.exits.send(WorkerExit {
            id: self.id,
            iterations: self.iterations,
        });
    }
}

struct WorkerSlot {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
    stopping_since: Option<Instant>,
    flagged: bool,
}

async fn worker_loop<A: InventoryApi>(
    driver: RequestDriver<A>,
    plan: Arc<WorkerPlan>,
    mut stop: watch::Receiver<bool>,
    mut guard: ExitGuard,
) {
    loop {
        if *stop.borrow() || Instant::now() >= plan.deadline {
            break;
        }
        if plan.iterations.is_some_and(|limit| guard.iterations >= limit) {
            break;
        }

        driver.run_iteration(&plan.scenario, plan.kind, &plan.pool).await;
        guard.iterations += 1;

        if !plan.think_time.is_zero() {
            tokio::select! {
                _ = sleep(plan.think_time) => {}
                _ = stop.changed() => {}
            }
        }
    }
    debug!(
        scenario = %plan.scenario,
        worker = guard.id,
        iterations = guard.iterations,
        "worker stopped"
    );
}

struct WorkerPool<A> {
    driver: RequestDriver<A>,
    plan: Arc<WorkerPlan>,
    grace: Duration,
    exits_tx: mpsc::UnboundedSender<WorkerExit>,
    exits_rx: mpsc::UnboundedReceiver<WorkerExit>,
    live: BTreeMap<u64, WorkerSlot>,
    /// Workers counted against the current target, in start order.
    assigned: Vec<u64>,
    finished: Vec<JoinHandle<()>>,
    next_id: u64,
    iterations: u64,
    stragglers: u64,
}

impl<A: InventoryApi> WorkerPool<A> {
    fn new(driver: RequestDriver<A>, plan: WorkerPlan, grace: Duration) -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            driver,
            plan: Arc::new(plan),
            grace,
            exits_tx,
            exits_rx,
            live: BTreeMap::new(),
            assigned: Vec::new(),
            finished: Vec::new(),
            next_id: 0,
            iterations: 0,
            stragglers: 0,
        }
    }

    fn scale_to(&mut self, target: u64) {
        let target = target as usize;
        while self.assigned.len() < target {
            self.spawn_worker();
        }
        let now = Instant::now();
        while self.assigned.len() > target {
            let Some(id) = self.assigned.pop() else { break };
            if let Some(slot) = self.live.get_mut(&id) {
                let _ = slot.stop.send(true);
                slot.stopping_since = Some(now);
            }
        }
    }

    fn spawn_worker(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let (stop, stop_rx) = watch::channel(false);
        let guard = ExitGuard {
            id,
            iterations: 0,
            exits: self.exits_tx.clone(),
        };
        let handle = tokio::spawn(worker_loop(
            self.driver.clone(),
            Arc::clone(&self.plan),
            stop_rx,
            guard,
        ));

        self.live.insert(
            id,
            WorkerSlot {
                stop,
                handle,
                stopping_since: None,
                flagged: false,
            },
        );
        self.assigned.push(id);
    }

    fn on_exit(&mut self, exit: WorkerExit) {
        self.iterations += exit.iterations;
        if let Some(slot) = self.live.remove(&exit.id) {
            self.finished.push(slot.handle);
        }
    }

    /// Earliest grace deadline among stopping workers not yet reported.
    fn next_grace_deadline(&self) -> Option<Instant> {
        self.live
            .values()
            .filter(|slot| !slot.flagged)
            .filter_map(|slot| slot.stopping_since.map(|since| since + self.grace))
            .min()
    }

    fn flag_stragglers(&mut self) {
        let now = Instant::now();
        for (id, slot) in self.live.iter_mut() {
            let overdue = slot
                .stopping_since
                .is_some_and(|since| since + self.grace <= now);
            if overdue && !slot.flagged {
                slot.flagged = true;
                self.stragglers += 1;
                warn!(
                    scenario = %self.plan.scenario,
                    worker = id,
                    grace_ms = self.grace.as_millis() as u64,
                    "worker still finishing its iteration after the ramp-down window"
                );
            }
        }
    }

    /// Processes worker exits until `until`. Returns early when an
    /// iteration-bounded pool has no live workers left.
    async fn wait_until(&mut self, until: Instant, stop_when_idle: bool) {
        loop {
            if stop_when_idle && self.live.is_empty() {
                return;
            }
            let grace_deadline = self.next_grace_deadline();
            tokio::select! {
                _ = sleep_until(until) => return,
                Some(exit) = self.exits_rx.recv() => self.on_exit(exit),
                _ = sleep_until(grace_deadline.unwrap_or(until)), if grace_deadline.is_some() => {
                    self.flag_stragglers();
                }
            }
        }
    }

    /// Stops every worker and waits for their in-flight iterations.
    async fn drain(mut self) -> (u64, u64, u64) {
        self.scale_to(0);
        while !self.live.is_empty() {
            let grace_deadline = self.next_grace_deadline();
            tokio::select! {
                exit = self.exits_rx.recv() => match exit {
                    Some(exit) => self.on_exit(exit),
                    None => break,
                },
                _ = sleep_until(grace_deadline.unwrap_or_else(Instant::now)), if grace_deadline.is_some() => {
                    self.flag_stragglers();
                }
            }
        }
        for result in join_all(self.finished).await {
            if let Err(err) = result {
                warn!(scenario = %self.plan.scenario, error = %err, "worker task failed");
            }
        }
        (self.next_id, self.iterations, self.stragglers)
    }
}

/// Counts reported by one scenario run.
#[derive(Debug, Default)]
struct RunCounts {
    workers: u64,
    iterations: u64,
    stragglers: u64,
    dropped: u64,
}

/// Starts one iteration per period until the plan deadline, never more than
/// `max_workers` at once. `workers` is the peak number in flight.
async fn run_arrivals<A: InventoryApi>(
    driver: RequestDriver<A>,
    plan: Arc<WorkerPlan>,
    arrivals: ArrivalRate,
    grace: Duration,
    started: Instant,
) -> RunCounts {
    let mut counts = RunCounts::default();
    let Some(period) = arrivals.period() else {
        warn!(scenario = %plan.scenario, "arrival rate is zero, no iterations started");
        return counts;
    };

    let mut tasks = JoinSet::new();
    let mut ticker = interval_at(started, period);
    let mut over_allocation_logged = false;

    loop {
        tokio::select! {
            biased;
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                counts.iterations += 1;
                if let Err(err) = result {
                    warn!(scenario = %plan.scenario, error = %err, "iteration task failed");
                }
            }
            _ = sleep_until(plan.deadline) => break,
            _ = ticker.tick() => {
                let in_flight = tasks.len() as u64;
                if in_flight >= arrivals.max_workers {
                    counts.dropped += 1;
                    driver.metrics().add(MetricCounter::one(names::DROPPED_ITERATIONS));
                    continue;
                }
                if in_flight >= arrivals.pre_allocated_workers && !over_allocation_logged {
                    over_allocation_logged = true;
                    warn!(
                        scenario = %plan.scenario,
                        pre_allocated = arrivals.pre_allocated_workers,
                        "arrival rate needs more workers than pre-allocated"
                    );
                }

                let driver = driver.clone();
                let plan = Arc::clone(&plan);
                tasks.spawn(async move {
                    driver.run_iteration(&plan.scenario, plan.kind, &plan.pool).await;
                    if !plan.think_time.is_zero() {
                        sleep(plan.think_time).await;
                    }
                });
                counts.workers = counts.workers.max(tasks.len() as u64);
            }
        }
    }
    if counts.dropped > 0 {
        warn!(
            scenario = %plan.scenario,
            dropped = counts.dropped,
            "arrivals dropped, every worker was busy"
        );
    }

    let grace_deadline = sleep_until(Instant::now() + grace);
    tokio::pin!(grace_deadline);
    let mut flagged = false;
    while !tasks.is_empty() {
        tokio::select! {
            Some(result) = tasks.join_next() => {
                counts.iterations += 1;
                if let Err(err) = result {
                    warn!(scenario = %plan.scenario, error = %err, "iteration task failed");
                }
            }
            _ = &mut grace_deadline, if !flagged => {
                flagged = true;
                counts.stragglers = tasks.len() as u64;
                warn!(
                    scenario = %plan.scenario,
                    in_flight = counts.stragglers,
                    grace_ms = grace.as_millis() as u64,
                    "iterations still running after the ramp-down window"
                );
            }
        }
    }
    counts
}

/// Runs one scenario to completion. `run_start` anchors the start offset.
pub async fn run_scenario<A: InventoryApi>(
    driver: RequestDriver<A>,
    scenario: Scenario,
    pool: KeyPool,
    run_start: Instant,
) -> ScenarioSummary {
    sleep_until(run_start + scenario.start_offset).await;

    if let Some(on) = scenario.hot_path {
        match driver.api().toggle_hot_path(pool.hot_key(), on).await {
            Ok(status) => info!(scenario = %scenario.name, on, %status, "hot path toggled"),
            Err(err) => warn!(scenario = %scenario.name, on, error = %err, "hot path toggle failed"),
        }
    }

    let started = Instant::now();
    let deadline = started + scenario.active_span();
    info!(
        scenario = %scenario.name,
        workload = ?scenario.workload,
        phases = scenario.stages.phases().len(),
        span_ms = scenario.active_span().as_millis() as u64,
        "scenario started"
    );

    let plan = WorkerPlan {
        scenario: scenario.name.clone(),
        kind: scenario.workload,
        pool,
        think_time: scenario.think_time(),
        iterations: scenario.iterations_per_worker,
        deadline,
    };
    let counts = match scenario.arrival_rate {
        Some(arrivals) => {
            run_arrivals(
                driver,
                Arc::new(plan),
                arrivals,
                scenario.graceful_ramp_down,
                started,
            )
            .await
        }
        None => run_phases(driver, &scenario, plan, started, deadline).await,
    };
    info!(
        scenario = %scenario.name,
        iterations = counts.iterations,
        workers = counts.workers,
        dropped = counts.dropped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scenario finished"
    );

    ScenarioSummary {
        name: scenario.name,
        iterations: counts.iterations,
        workers_started: counts.workers,
        stragglers: counts.stragglers,
        dropped: counts.dropped,
    }
}

async fn run_phases<A: InventoryApi>(
    driver: RequestDriver<A>,
    scenario: &Scenario,
    plan: WorkerPlan,
    started: Instant,
    deadline: Instant,
) -> RunCounts {
    let mut workers = WorkerPool::new(driver, plan, scenario.graceful_ramp_down);
    let bounded = scenario.iterations_per_worker.is_some();

    let phases = scenario.stages.phases();
    let mut phase_end = started;
    for (index, phase) in phases.iter().enumerate() {
        if phase_end >= deadline {
            break;
        }
        phase_end = (phase_end + phase.duration).min(deadline);
        info!(scenario = %scenario.name, phase = index, target = phase.target, "phase started");
        workers.scale_to(phase.target);

        let last = index + 1 == phases.len();
        workers.wait_until(phase_end, bounded && last).await;
    }
    if bounded && phase_end < deadline {
        workers.wait_until(deadline, true).await;
    }

    let (workers, iterations, stragglers) = workers.drain().await;
    RunCounts {
        workers,
        iterations,
        stragglers,
        dropped: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{names, Aggregator};
    use crate::models::scenario::{ArrivalRate, RampProfile, ScenarioPhase};
    use crate::testing::FakeInventory;
    use futures::future::join;

    const HOT: &str = "11111111-1111-1111-1111-111111111111";

    type Harness = (RequestDriver<FakeInventory>, Arc<FakeInventory>, Arc<Aggregator>);

    fn setup(api: FakeInventory) -> Harness {
        let api = Arc::new(api);
        let metrics = Arc::new(Aggregator::new());
        let driver = RequestDriver::new(Arc::clone(&api), Arc::clone(&metrics), 1);
        (driver, api, metrics)
    }

    fn storm(name: &str, phases: Vec<ScenarioPhase>) -> Scenario {
        Scenario::new(name, WorkloadKind::ReserveStorm, RampProfile::new(phases))
            .with_think_time(Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_down_drains_in_flight_iterations() {
        let (driver, api, _metrics) =
            setup(FakeInventory::idempotent().with_latency(Duration::from_secs(3)));
        let scenario = storm(
            "rampdown",
            vec![
                ScenarioPhase::new(Duration::from_secs(10), 10),
                ScenarioPhase::new(Duration::from_secs(5), 0),
            ],
        )
        .with_grace(Duration::from_secs(5));

        let summary = run_scenario(driver, scenario, KeyPool::single(HOT), Instant::now()).await;

        assert_eq!(summary.workers_started, 10);
        assert_eq!(summary.iterations, 40);
        assert_eq!(summary.stragglers, 0);
        assert_eq!(api.started(), api.completed());

        let after_transition = api
            .completions
            .lock()
            .iter()
            .filter(|at| **at > Duration::from_secs(10))
            .count();
        assert_eq!(after_transition, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_end_waits_for_last_iteration() {
        let (driver, api, _metrics) =
            setup(FakeInventory::idempotent().with_latency(Duration::from_secs(3)));
        let scenario = storm("drain", vec![ScenarioPhase::new(Duration::from_secs(1), 2)]);

        let start = Instant::now();
        let summary = run_scenario(driver, scenario, KeyPool::single(HOT), start).await;

        assert_eq!(summary.iterations, 2);
        assert_eq!(api.completed(), 2);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ramp_down_is_reported_but_not_aborted() {
        let (driver, api, _metrics) =
            setup(FakeInventory::idempotent().with_latency(Duration::from_secs(10)));
        let scenario = storm("slow", vec![ScenarioPhase::new(Duration::from_secs(1), 3)])
            .with_grace(Duration::from_secs(2));

        let summary = run_scenario(driver, scenario, KeyPool::single(HOT), Instant::now()).await;

        assert_eq!(summary.stragglers, 3);
        assert_eq!(summary.iterations, 3);
        assert_eq!(api.completed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_target_starts_no_workers() {
        let (driver, api, _metrics) = setup(FakeInventory::idempotent());
        let scenario = storm("idle", vec![ScenarioPhase::new(Duration::from_secs(2), 0)]);

        let start = Instant::now();
        let summary = run_scenario(driver, scenario, KeyPool::single(HOT), start).await;

        assert_eq!(summary.workers_started, 0);
        assert_eq!(summary.iterations, 0);
        assert_eq!(api.started(), 0);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_up_adds_workers_between_phases() {
        let (driver, _api, _metrics) =
            setup(FakeInventory::idempotent().with_latency(Duration::from_millis(300)));
        let scenario = storm(
            "ramp",
            vec![
                ScenarioPhase::new(Duration::from_secs(1), 2),
                ScenarioPhase::new(Duration::from_secs(1), 5),
                ScenarioPhase::new(Duration::from_secs(1), 1),
            ],
        );

        let summary = run_scenario(driver, scenario, KeyPool::single(HOT), Instant::now()).await;

        assert_eq!(summary.workers_started, 5);
        // worker 0 runs all 3s, worker 1 until 2s, workers 2..5 from 1s to 2s,
        // each stopped worker finishing the iteration it had in flight
        assert_eq!(summary.iterations, 29);
    }

    #[tokio::test(start_paused = true)]
    async fn iteration_bounded_scenario_ends_when_workers_finish() {
        let (driver, api, metrics) =
            setup(FakeInventory::idempotent().with_latency(Duration::from_millis(20)));
        let scenario = Scenario::new(
            "idempotency_dupe",
            WorkloadKind::IdempotencyDoubleHit,
            RampProfile::constant(10, Duration::from_secs(30)),
        )
        .with_iterations(1, Duration::from_secs(30));

        let start = Instant::now();
        let summary = run_scenario(driver, scenario, KeyPool::single(HOT), start).await;

        assert_eq!(summary.iterations, 10);
        assert_eq!(api.started(), 20);
        assert!(start.elapsed() < Duration::from_secs(1));
        let snapshot = metrics.finalize();
        assert_eq!(snapshot.checks[names::CHECK_IDEMPOTENCY].passes, 10);
        assert_eq!(snapshot.counters["reserve_ok"], 10);
        assert_eq!(snapshot.counters["reserve_409"], 10);
    }

    #[tokio::test(start_paused = true)]
    async fn scenarios_start_at_their_offsets() {
        let (driver, api, metrics) = setup(FakeInventory::idempotent());
        let early = storm("early", vec![ScenarioPhase::new(Duration::from_secs(2), 1)])
            .with_think_time(Duration::from_millis(100));
        let late = storm("late", vec![ScenarioPhase::new(Duration::from_secs(2), 1)])
            .with_think_time(Duration::from_millis(100))
            .starting_at(Duration::from_secs(5))
            .with_hot_path(true);

        let run_start = Instant::now();
        let (a, b) = join(
            run_scenario(driver.clone(), early, KeyPool::single(HOT), run_start),
            run_scenario(driver, late, KeyPool::single(HOT), run_start),
        )
        .await;

        assert!(a.iterations > 0 && b.iterations > 0);
        let late_samples = metrics.samples(&names::scoped(names::LATENCY_RESERVE, "late"));
        assert!(late_samples.iter().all(|s| s.timestamp_millis >= 5000));
        let early_samples = metrics.samples(&names::scoped(names::LATENCY_RESERVE, "early"));
        assert!(early_samples.iter().all(|s| s.timestamp_millis < 2100));
        assert_eq!(api.toggles.lock().as_slice(), &[(HOT.to_string(), true)]);
    }

    fn arrivals(rate: u64, duration: Duration, max_workers: u64) -> ArrivalRate {
        ArrivalRate {
            rate,
            time_unit: Duration::from_secs(1),
            duration,
            pre_allocated_workers: 1,
            max_workers,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn arrivals_start_at_a_fixed_rate() {
        let (driver, api, metrics) =
            setup(FakeInventory::idempotent().with_latency(Duration::from_millis(50)));
        let scenario = Scenario::arrivals(
            "constant_request_rate",
            WorkloadKind::ReserveCheck,
            arrivals(10, Duration::from_secs(1), 5),
        );

        let summary = run_scenario(driver, scenario, KeyPool::single(HOT), Instant::now()).await;

        assert_eq!(summary.iterations, 10);
        assert_eq!(summary.dropped, 0);
        assert_eq!(api.completed(), 10);
        let snapshot = metrics.finalize();
        assert_eq!(snapshot.checks[names::CHECK_RESERVE_ACCEPTED].passes, 10);
        assert!(!snapshot.counters.contains_key(names::DROPPED_ITERATIONS));
    }

    #[tokio::test(start_paused = true)]
    async fn arrivals_beyond_max_workers_are_dropped() {
        let (driver, api, metrics) =
            setup(FakeInventory::idempotent().with_latency(Duration::from_secs(1)));
        let scenario = Scenario::arrivals(
            "saturated",
            WorkloadKind::ReserveStorm,
            arrivals(10, Duration::from_secs(1), 2),
        );

        let summary = run_scenario(driver, scenario, KeyPool::single(HOT), Instant::now()).await;

        // arrivals at 0ms and 100ms take the two slots until after the deadline
        assert_eq!(summary.workers_started, 2);
        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.dropped, 8);
        assert_eq!(summary.stragglers, 0);
        assert_eq!(api.completed(), 2);
        assert_eq!(metrics.counter(names::DROPPED_ITERATIONS), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_arrivals_are_reported_but_not_aborted() {
        let (driver, api, _metrics) =
            setup(FakeInventory::idempotent().with_latency(Duration::from_secs(10)));
        let scenario = Scenario::arrivals(
            "slow_arrivals",
            WorkloadKind::ReserveStorm,
            arrivals(2, Duration::from_secs(1), 5),
        )
        .with_grace(Duration::from_secs(2));

        let summary = run_scenario(driver, scenario, KeyPool::single(HOT), Instant::now()).await;

        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.stragglers, 2);
        assert_eq!(api.completed(), 2);
    }
}
