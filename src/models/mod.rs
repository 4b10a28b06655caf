pub mod metrics;
pub mod scenario;
