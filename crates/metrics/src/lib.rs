//! Training metrics for distributed pretraining
//!
//! This crate provides:
//! - **Reduction** of per-worker step statistics into one group-wide view
//! - **Derived metrics**: mean loss, gradient norm, token counts, throughput
//! - **Emission** to the structured log and an optional experiment tracker
//!
//! Derivation and emission happen on the reporting worker only; the
//! reduction and the accumulator reset happen on every worker.

mod aggregator;
mod sink;
mod tracker;

pub use aggregator::{tokens_in_interval, GlobalMetrics, MetricsAggregator, ReportReadings};
pub use sink::emit_report;
pub use tracker::open_tracker;
#[cfg(feature = "tracking")]
pub use tracker::{JsonlTracker, RunConfig};
