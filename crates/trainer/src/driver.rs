//! The per-worker training step loop

use crate::loss::cross_entropy;
use checkpoint::CheckpointTrigger;
use metrics::{emit_report, MetricsAggregator, ReportReadings};
use runtime_core::{
    Batch, Checkpointer, Collective, DataLoader, DistEnv, Error, ExperimentTracker, LrScheduler,
    MemoryMonitor, Model, Optimizer, Profiler, ResumptionState, Result, Step, TrainingConfig,
    WorkerStats,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Lifecycle of a [`Trainer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainerState {
    /// Constructed, no step taken yet
    Idle,

    /// Executing a training step
    Running,

    /// Reducing and reporting metrics at a report boundary
    Reporting,

    /// Handing state to the checkpointer at a checkpoint boundary
    Checkpointing,

    /// Step budget exhausted or data stream ended
    Completed,
}

/// Collaborators one worker's loop drives
pub struct TrainerParts {
    pub model: Box<dyn Model>,
    pub optimizer: Box<dyn Optimizer>,
    pub scheduler: Box<dyn LrScheduler>,
    pub loader: Box<dyn DataLoader>,
    pub collective: Box<dyn Collective>,
    pub checkpointer: Box<dyn Checkpointer>,
    pub profiler: Option<Box<dyn Profiler>>,
    pub tracker: Option<Box<dyn ExperimentTracker>>,
    pub memory: Option<Box<dyn MemoryMonitor>>,
}

/// Result of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainOutcome {
    /// Group-wide mean loss of the last report, reporter only
    pub last_reported_loss: Option<f64>,

    /// This worker's loss at the last executed step
    pub final_step_loss: Option<f64>,

    /// Last executed step, or the start step if none ran
    pub final_step: Step,

    /// Cumulative tokens seen by the group at `final_step`
    pub tokens_seen: u64,
}

/// Drives one worker through `start.step + 1 ..= num_steps`.
///
/// Every worker of the group runs its own `Trainer` with the same
/// configuration; report boundaries are where they synchronize.
pub struct Trainer {
    config: TrainingConfig,
    env: DistEnv,
    parts: TrainerParts,
    start: ResumptionState,
    aggregator: MetricsAggregator,
    trigger: CheckpointTrigger,
    stats: WorkerStats,
    state: TrainerState,
}

impl Trainer {
    /// Check the run can start and assemble the loop.
    ///
    /// Fails before any batch is pulled if the configuration is invalid, the
    /// collective's group size disagrees with the environment, or tracking is
    /// enabled while the reporter has no tracker.
    pub fn new(
        config: TrainingConfig,
        env: DistEnv,
        parts: TrainerParts,
        start: ResumptionState,
    ) -> Result<Self> {
        config.validate()?;

        let group_size = parts.collective.world_size();
        if group_size != env.world_size {
            return Err(Error::InvalidConfig {
                message: format!(
                    "collective spans {} workers but WORLD_SIZE is {}",
                    group_size, env.world_size
                ),
            });
        }

        if config.use_tracking && env.is_reporter() && parts.tracker.is_none() {
            return Err(Error::TrackerUnavailable {
                reason: "use_tracking is set but no experiment tracker was provided".to_string(),
            });
        }

        let aggregator = MetricsAggregator::new(&config, env.world_size, start);
        let trigger = CheckpointTrigger::from_config(&config, env.is_reporter());

        Ok(Self {
            config,
            env,
            parts,
            start,
            aggregator,
            trigger,
            stats: WorkerStats::new(),
            state: TrainerState::Idle,
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn env(&self) -> &DistEnv {
        &self.env
    }

    /// Give the collaborators back, e.g. to inspect them after a run
    pub fn into_parts(self) -> TrainerParts {
        self.parts
    }

    /// Run the loop to completion.
    ///
    /// Any collaborator error, including a failed checkpoint, ends the run.
    #[instrument(skip(self), fields(rank = self.env.rank))]
    pub async fn run(&mut self) -> Result<TrainOutcome> {
        let is_reporter = self.env.is_reporter();
        if is_reporter {
            info!(
                start_step = self.start.step,
                tokens_seen = self.start.tokens_seen,
                num_steps = self.config.num_steps,
                world_size = self.env.world_size,
                "Training starting"
            );
        }

        self.parts.model.train_mode();
        self.aggregator.start_clock();

        let mut step = self.start.step;
        let mut last_reported_loss = None;
        let mut final_step_loss = None;

        while step < self.config.num_steps {
            self.state = TrainerState::Running;
            let Some(batch) = self.parts.loader.next_batch().await? else {
                if is_reporter {
                    warn!(step = step, "Data stream ended before the step budget");
                }
                break;
            };
            step += 1;

            let loss = self.train_step(batch)?;
            final_step_loss = Some(loss);

            if self.aggregator.is_report_step(step) {
                self.state = TrainerState::Reporting;
                if let Some(reported) = self.report(step, is_reporter).await? {
                    last_reported_loss = Some(reported);
                }
            }

            if let Some(memory) = self.parts.memory.as_mut() {
                memory.reset_peak();
            }

            if self.trigger.should_fire(step) {
                self.state = TrainerState::Checkpointing;
                let resumption = ResumptionState::new(step, self.aggregator.tokens_seen_at(step));
                self.trigger
                    .maybe_checkpoint(
                        step,
                        &resumption,
                        self.parts.checkpointer.as_mut(),
                        self.parts.model.as_ref(),
                        self.parts.optimizer.as_ref(),
                        self.parts.loader.as_ref(),
                    )
                    .await?;
            }
        }

        self.state = TrainerState::Completed;
        let outcome = TrainOutcome {
            last_reported_loss,
            final_step_loss,
            final_step: step,
            tokens_seen: self.aggregator.tokens_seen_at(step),
        };
        if is_reporter {
            info!(
                final_step = outcome.final_step,
                tokens_seen = outcome.tokens_seen,
                "Training complete"
            );
        }
        Ok(outcome)
    }

    /// One optimization step; returns this worker's loss
    fn train_step(&mut self, batch: Batch) -> Result<f64> {
        let parts = &mut self.parts;
        let batch = batch.to_device(self.env.device());

        parts.optimizer.zero_grad();
        let logits = parts.model.forward(&batch)?;
        let (loss, grad) = cross_entropy(&logits, &batch.label)?;
        parts.model.backward(&grad)?;
        let grad_norm = parts.model.clip_grad_norm(self.config.grad_clip_thresh)?;
        parts.optimizer.step()?;
        parts.scheduler.step();

        self.stats.accumulate(loss, grad_norm);
        if let Some(profiler) = parts.profiler.as_mut() {
            profiler.step();
        }
        Ok(loss)
    }

    async fn report(&mut self, step: Step, is_reporter: bool) -> Result<Option<f64>> {
        let readings = ReportReadings {
            learning_rate: self.parts.scheduler.last_lr(),
            reserved_memory_bytes: self
                .parts
                .memory
                .as_ref()
                .map_or(0, |m| m.max_reserved_bytes()),
            allocated_memory_bytes: self
                .parts
                .memory
                .as_ref()
                .map_or(0, |m| m.max_allocated_bytes()),
        };

        let metrics = self
            .aggregator
            .reduce_and_report(
                &mut self.stats,
                step,
                self.parts.collective.as_ref(),
                readings,
                is_reporter,
            )
            .await?;

        let Some(metrics) = metrics else {
            debug!(step = step, "Stats reduced");
            return Ok(None);
        };
        emit_report(
            &metrics,
            self.config.report_interval,
            self.parts.tracker.as_deref_mut(),
        )
        .await;
        Ok(Some(metrics.loss))
    }
}
