//! Fixed-cadence checkpoint triggering

use runtime_core::{
    Checkpointer, DataLoader, Error, Model, Optimizer, ResumptionState, Result, Step,
    TrainingConfig,
};
use tracing::{error, info};

/// Decides when to hand training state to the checkpoint collaborator
#[derive(Debug, Clone, Copy)]
pub struct CheckpointTrigger {
    interval: u64,
    is_reporter: bool,
}

impl CheckpointTrigger {
    /// An `interval` of 0 is treated as 1, saving every step
    pub fn new(interval: u64, is_reporter: bool) -> Self {
        Self {
            interval: interval.max(1),
            is_reporter,
        }
    }

    pub fn from_config(config: &TrainingConfig, is_reporter: bool) -> Self {
        Self::new(config.checkpoint_interval, is_reporter)
    }

    /// True exactly on multiples of the checkpoint interval
    pub fn should_fire(&self, step: Step) -> bool {
        step % self.interval == 0
    }

    /// Save through `checkpointer` if `step` is a checkpoint boundary.
    ///
    /// Returns whether a checkpoint was written. A failed save is never
    /// retried here; it surfaces as [`Error::CheckpointWriteFailed`] and
    /// should end the run.
    pub async fn maybe_checkpoint(
        &self,
        step: Step,
        state: &ResumptionState,
        checkpointer: &mut dyn Checkpointer,
        model: &dyn Model,
        optimizer: &dyn Optimizer,
        loader: &dyn DataLoader,
    ) -> Result<bool> {
        if !self.should_fire(step) {
            return Ok(false);
        }

        if let Err(e) = checkpointer
            .save(step, model, optimizer, loader, state)
            .await
        {
            error!(step = step, error = %e, "Checkpoint save failed");
            return Err(match e {
                Error::CheckpointWriteFailed { .. } => e,
                other => Error::CheckpointWriteFailed {
                    step,
                    message: other.to_string(),
                },
            });
        }

        if self.is_reporter {
            info!(
                step = state.step,
                tokens_seen = state.tokens_seen,
                "Checkpoint saved"
            );
        }
        Ok(true)
    }
}
