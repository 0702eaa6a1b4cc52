//! Contracts for the collaborators the step loop drives.
//!
//! The driver never computes forward or backward passes, optimizer updates,
//! batches or checkpoint encodings itself; it only calls through these
//! traits. Every implementation must be `Send + Sync` so a worker's loop can
//! run as a tokio task.

use crate::{Batch, Logits, ResumptionState, Result, Step};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Sharded model replica held by one worker
pub trait Model: Send + Sync {
    /// Switch layers such as dropout into training behaviour
    fn train_mode(&mut self);

    /// Run the forward pass, returning one row of logits per label position
    fn forward(&mut self, batch: &Batch) -> Result<Logits>;

    /// Backpropagate the loss gradient with respect to the logits
    fn backward(&mut self, grad_logits: &Logits) -> Result<()>;

    /// Clip gradients to `max_norm` and return the norm measured before clipping
    fn clip_grad_norm(&mut self, max_norm: f64) -> Result<f64>;

    /// Opaque encoding of this worker's parameter shard
    fn state_dict(&self) -> Result<Bytes>;
}

/// Optimizer step rule
pub trait Optimizer: Send + Sync {
    fn zero_grad(&mut self);

    fn step(&mut self) -> Result<()>;

    /// Opaque encoding of this worker's optimizer shard
    fn state_dict(&self) -> Result<Bytes>;
}

/// Learning-rate schedule
pub trait LrScheduler: Send + Sync {
    fn step(&mut self);

    /// Learning rate applied by the most recent optimizer step
    fn last_lr(&self) -> f64;
}

/// Lazy, logically infinite batch stream
#[async_trait]
pub trait DataLoader: Send + Sync {
    /// Next batch, or `None` if the stream is exhausted. May block on I/O.
    async fn next_batch(&mut self) -> Result<Option<Batch>>;

    /// Opaque shard position so a restarted loader resumes where this one stopped
    fn resume_state(&self) -> Result<Bytes>;
}

/// Process-group wide collective operations
#[async_trait]
pub trait Collective: Send + Sync {
    /// Number of workers taking part in each reduction
    fn world_size(&self) -> u32;

    /// Replace `values` with the element-wise sum over every worker.
    ///
    /// Blocks until all workers have contributed. A worker that never
    /// arrives stalls the others.
    async fn all_reduce_sum(&self, values: &mut [f64]) -> Result<()>;
}

/// Durable persistence of training state
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist everything needed to resume after `step`. Returns only once
    /// the write is durable.
    async fn save(
        &mut self,
        step: Step,
        model: &dyn Model,
        optimizer: &dyn Optimizer,
        loader: &dyn DataLoader,
        state: &ResumptionState,
    ) -> Result<()>;
}

/// Metric name to value, as sent to an experiment tracker
pub type TrackerFields = BTreeMap<String, f64>;

/// External experiment-tracking sink
#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    async fn log(&mut self, fields: &TrackerFields, step: Step) -> Result<()>;
}

/// Step-driven profiler
pub trait Profiler: Send + Sync {
    /// Advance the profiler by one training step
    fn step(&mut self);
}

/// Peak device memory readings
pub trait MemoryMonitor: Send + Sync {
    fn max_reserved_bytes(&self) -> u64;

    fn max_allocated_bytes(&self) -> u64;

    /// Start a new peak measurement window
    fn reset_peak(&mut self);
}
