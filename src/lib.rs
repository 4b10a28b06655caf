//! Load generator for a hot-key inventory reservation API.
//!
//! Workers drive reserve/confirm traffic at a configured concurrency ramp,
//! every response is classified into an [`Outcome`](models::metrics::Outcome),
//! and the run ends with a text + CSV report whose threshold verdict only
//! counts unexpected failures.

pub mod aggregator;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod report;
pub mod sampler;
pub mod utils;

#[cfg(test)]
mod testing;
