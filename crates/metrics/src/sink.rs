//! Emission of derived metrics to the log and the experiment tracker

use crate::aggregator::GlobalMetrics;
use runtime_core::ExperimentTracker;
use tracing::{info, warn};

/// Emit one report to the structured log and, if present, the tracker.
///
/// Call on the reporting worker only. A tracker failure is logged and
/// swallowed; losing a dashboard point must not stop training.
pub async fn emit_report(
    metrics: &GlobalMetrics,
    report_interval: u64,
    tracker: Option<&mut (dyn ExperimentTracker + '_)>,
) {
    info!(
        step = metrics.step,
        tokens_seen = metrics.tokens_seen,
        loss = metrics.loss,
        gradient_norm = metrics.grad_norm,
        learning_rate = metrics.learning_rate,
        report_interval = report_interval,
        interval_secs_per_step = metrics.interval_seconds_per_step,
        overall_secs_per_step = metrics.overall_seconds_per_step,
        reserved_memory = metrics.reserved_memory_bytes,
        allocated_memory = metrics.allocated_memory_bytes,
        tokens_per_worker_per_sec = metrics.throughput_per_worker,
        tokens_per_day = metrics.tokens_per_day,
        "Training report"
    );

    if let Some(tracker) = tracker {
        if let Err(e) = tracker.log(&metrics.tracker_fields(), metrics.step).await {
            warn!(step = metrics.step, error = %e, "Failed to send metrics to experiment tracker");
        }
    }
}
