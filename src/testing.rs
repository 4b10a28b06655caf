//! Scripted in-memory inventory service for driver and scheduler tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hyper::StatusCode;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use crate::client::InventoryApi;
use crate::error::TransportError;
use crate::models::scenario::{ConfirmUnit, RequestUnit};

#[derive(Debug, Clone)]
pub enum ReserveBehavior {
    /// First reserve per order line id succeeds, repeats get 409.
    Idempotent,
    Always(u16),
    Fail(TransportError),
}

pub struct FakeInventory {
    behavior: ReserveBehavior,
    confirm_status: u16,
    latency: Duration,
    latency_steps: Mutex<VecDeque<Duration>>,
    created: Instant,
    seen: Mutex<HashSet<String>>,
    pub reserves_started: AtomicU64,
    pub reserves_completed: AtomicU64,
    pub confirms: AtomicU64,
    pub completions: Mutex<Vec<Duration>>,
    pub menu_ids: Mutex<Vec<String>>,
    pub toggles: Mutex<Vec<(String, bool)>>,
    pub seeds: Mutex<Vec<(String, u64, u64)>>,
    pub pings: AtomicU64,
}

impl FakeInventory {
    pub fn new(behavior: ReserveBehavior) -> Self {
        Self {
            behavior,
            confirm_status: 200,
            latency: Duration::ZERO,
            latency_steps: Mutex::new(VecDeque::new()),
            created: Instant::now(),
            seen: Mutex::new(HashSet::new()),
            reserves_started: AtomicU64::new(0),
            reserves_completed: AtomicU64::new(0),
            confirms: AtomicU64::new(0),
            completions: Mutex::new(Vec::new()),
            menu_ids: Mutex::new(Vec::new()),
            toggles: Mutex::new(Vec::new()),
            seeds: Mutex::new(Vec::new()),
            pings: AtomicU64::new(0),
        }
    }

    pub fn idempotent() -> Self {
        Self::new(ReserveBehavior::Idempotent)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Per-call reserve latencies, in call order; later calls use the fixed latency.
    pub fn with_latency_steps(self, steps: Vec<Duration>) -> Self {
        *self.latency_steps.lock() = steps.into();
        self
    }

    pub fn with_confirm_status(mut self, status: u16) -> Self {
        self.confirm_status = status;
        self
    }

    pub fn started(&self) -> u64 {
        self.reserves_started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.reserves_completed.load(Ordering::SeqCst)
    }

    fn status(code: u16) -> StatusCode {
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

#[async_trait]
impl InventoryApi for FakeInventory {
    async fn reserve(&self, unit: &RequestUnit) -> Result<StatusCode, TransportError> {
        self.reserves_started.fetch_add(1, Ordering::SeqCst);
        self.menu_ids.lock().push(unit.menu_id.clone());
        let result = match &self.behavior {
            ReserveBehavior::Idempotent => {
                if self.seen.lock().insert(unit.order_line_id.clone()) {
                    Ok(StatusCode::OK)
                } else {
                    Ok(StatusCode::CONFLICT)
                }
            }
            ReserveBehavior::Always(code) => Ok(Self::status(*code)),
            ReserveBehavior::Fail(err) => Err(err.clone()),
        };
        let latency = self.latency_steps.lock().pop_front().unwrap_or(self.latency);
        if !latency.is_zero() {
            sleep(latency).await;
        }
        self.completions.lock().push(self.created.elapsed());
        self.reserves_completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn confirm(&self, _unit: &ConfirmUnit) -> Result<StatusCode, TransportError> {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        Ok(Self::status(self.confirm_status))
    }

    async fn seed(
        &self,
        menu_id: &str,
        available: u64,
        reserved: u64,
    ) -> Result<StatusCode, TransportError> {
        self.seeds.lock().push((menu_id.to_string(), available, reserved));
        Ok(StatusCode::OK)
    }

    async fn toggle_hot_path(
        &self,
        menu_id: &str,
        on: bool,
    ) -> Result<StatusCode, TransportError> {
        self.toggles.lock().push((menu_id.to_string(), on));
        Ok(StatusCode::OK)
    }

    async fn ping(&self) -> Result<StatusCode, TransportError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(StatusCode::OK)
    }
}
