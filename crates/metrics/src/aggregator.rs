//! Cross-worker reduction of step statistics

use runtime_core::{
    Collective, ResumptionState, Result, Step, TrackerFields, TrainingConfig, WorkerStats,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const SECONDS_PER_DAY: f64 = 3600.0 * 24.0;

/// Tokens the whole group consumed between `start_step` and `step`.
///
/// Recomputed from the step delta at every boundary rather than accumulated,
/// so the first interval after a resume is counted correctly.
pub fn tokens_in_interval(
    step: Step,
    start_step: Step,
    world_size: u32,
    tokens_per_worker_step: u64,
) -> u64 {
    step.saturating_sub(start_step) * world_size as u64 * tokens_per_worker_step
}

/// Readings only the caller can take at a report boundary
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReportReadings {
    pub learning_rate: f64,
    pub reserved_memory_bytes: u64,
    pub allocated_memory_bytes: u64,
}

/// Group-wide view of one report interval, derived on the reporting worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub step: Step,

    /// Mean loss over every step of every worker in the interval
    pub loss: f64,

    /// Mean pre-clip gradient norm over the same samples
    pub grad_norm: f64,

    pub learning_rate: f64,

    /// Cumulative tokens, including those seen before a resume
    pub tokens_seen: u64,

    /// Tokens consumed since the loop started
    pub run_tokens: u64,

    /// Wall time since the loop started
    pub elapsed: Duration,

    /// Seconds per step over the interval that just ended
    pub interval_seconds_per_step: f64,

    /// Seconds per step since the loop started
    pub overall_seconds_per_step: f64,

    /// Tokens per worker per second since the loop started
    pub throughput_per_worker: u64,

    /// Group-wide throughput extrapolated to a day
    pub tokens_per_day: u64,

    pub reserved_memory_bytes: u64,
    pub allocated_memory_bytes: u64,
}

impl GlobalMetrics {
    /// Field set sent to the experiment tracker
    pub fn tracker_fields(&self) -> TrackerFields {
        [
            ("learning rate", self.learning_rate),
            ("loss", self.loss),
            ("gradient norm", self.grad_norm),
            ("token seen", self.tokens_seen as f64),
            (
                "throughput (token per gpu per sec)",
                self.throughput_per_worker as f64,
            ),
            ("gpu reserved memory", self.reserved_memory_bytes as f64),
            ("gpu allocated memory", self.allocated_memory_bytes as f64),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }
}

/// Combines per-worker [`WorkerStats`] into [`GlobalMetrics`] at report
/// boundaries. Every worker owns one and calls it at the same steps.
#[derive(Debug)]
pub struct MetricsAggregator {
    report_interval: u64,
    tokens_per_worker_step: u64,
    world_size: u32,
    start: ResumptionState,
    loop_start: Instant,
    interval_start: Instant,
}

impl MetricsAggregator {
    pub fn new(config: &TrainingConfig, world_size: u32, start: ResumptionState) -> Self {
        let now = Instant::now();
        Self {
            report_interval: config.report_interval.max(1),
            tokens_per_worker_step: config.tokens_per_worker_step(),
            world_size,
            start,
            loop_start: now,
            interval_start: now,
        }
    }

    /// Restart both wall clocks, e.g. right before the first step
    pub fn start_clock(&mut self) {
        let now = Instant::now();
        self.loop_start = now;
        self.interval_start = now;
    }

    /// Whether `step` is a report boundary. An interval of 0 reports every step.
    pub fn is_report_step(&self, step: Step) -> bool {
        step % self.report_interval == 0
    }

    /// Cumulative tokens at `step`, counting everything before the resume point
    pub fn tokens_seen_at(&self, step: Step) -> u64 {
        self.start.tokens_seen + self.run_tokens_at(step)
    }

    fn run_tokens_at(&self, step: Step) -> u64 {
        tokens_in_interval(step, self.start.step, self.world_size, self.tokens_per_worker_step)
    }

    /// Sum `stats` over every worker and, on the reporter, derive metrics.
    ///
    /// Every worker must call this at the same step; it blocks until all have.
    /// `stats` is zeroed before returning on every worker, reporter or not,
    /// and even if the reduction fails.
    pub async fn reduce_and_report(
        &mut self,
        stats: &mut WorkerStats,
        step: Step,
        collective: &dyn Collective,
        readings: ReportReadings,
        is_reporter: bool,
    ) -> Result<Option<GlobalMetrics>> {
        let mut slots = *stats.slots();
        let reduction = collective.all_reduce_sum(&mut slots).await;
        stats.reset();
        reduction?;

        let now = Instant::now();
        let metrics = is_reporter
            .then(|| self.derive(&WorkerStats::from_slots(slots), step, now, readings));
        self.interval_start = now;

        debug!(step = step, steps_reduced = slots[2], "Worker stats reduced");
        Ok(metrics)
    }

    fn derive(
        &self,
        reduced: &WorkerStats,
        step: Step,
        now: Instant,
        readings: ReportReadings,
    ) -> GlobalMetrics {
        let elapsed = now.duration_since(self.loop_start);
        let interval_elapsed = now.duration_since(self.interval_start);
        let run_tokens = self.run_tokens_at(step);
        let run_steps = step.saturating_sub(self.start.step);

        let elapsed_secs = elapsed.as_secs_f64();
        let (throughput_per_worker, tokens_per_day) = if elapsed_secs > 0.0 {
            (
                (run_tokens as f64 / self.world_size as f64 / elapsed_secs) as u64,
                (run_tokens as f64 / elapsed_secs * SECONDS_PER_DAY) as u64,
            )
        } else {
            (0, 0)
        };

        GlobalMetrics {
            step,
            loss: reduced.mean_loss().unwrap_or(f64::NAN),
            grad_norm: reduced.mean_grad_norm().unwrap_or(f64::NAN),
            learning_rate: readings.learning_rate,
            tokens_seen: self.start.tokens_seen + run_tokens,
            run_tokens,
            elapsed,
            interval_seconds_per_step: interval_elapsed.as_secs_f64()
                / self.report_interval as f64,
            overall_seconds_per_step: if run_steps > 0 {
                elapsed_secs / run_steps as f64
            } else {
                0.0
            },
            throughput_per_worker,
            tokens_per_day,
            reserved_memory_bytes: readings.reserved_memory_bytes,
            allocated_memory_bytes: readings.allocated_memory_bytes,
        }
    }
}
