//! Pre-loop setup shared by every worker

use checkpoint::LocalCheckpointer;
use metrics::open_tracker;
use policy::{select_policies, HardwareProbe, PolicyChoice};
use runtime_core::{DistEnv, ExperimentTracker, ResumptionState, Result, TrainingConfig};
use tracing::info;

/// What a worker needs decided before it builds its collaborators
pub struct Startup {
    pub policy: PolicyChoice,
    pub tracker: Option<Box<dyn ExperimentTracker>>,
    pub resume_from: ResumptionState,
}

/// Validate the configuration, pick policies, open the tracker and find
/// the state to resume from.
///
/// Everything here fails before the first batch is requested.
pub async fn prepare(
    config: &TrainingConfig,
    env: &DistEnv,
    probe: &dyn HardwareProbe,
) -> Result<Startup> {
    config.validate()?;
    let is_reporter = env.is_reporter();

    let policy = select_policies(config, probe, is_reporter);
    let tracker = open_tracker(config, is_reporter).await?;

    let resume_from = if config.ckpt_load_path.is_empty() {
        ResumptionState::default()
    } else {
        LocalCheckpointer::latest_resumption_state(&config.ckpt_load_path)
            .await?
            .unwrap_or_default()
    };

    if is_reporter {
        info!(
            world_size = env.world_size,
            start_step = resume_from.step,
            tokens_seen = resume_from.tokens_seen,
            "Startup complete"
        );
    }

    Ok(Startup {
        policy,
        tracker,
        resume_from,
    })
}
