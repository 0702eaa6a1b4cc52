//! End-to-end training simulation
//!
//! Runs the full step loop against scripted collaborators:
//! - a single worker with known losses, reports and checkpoints
//! - a four-worker in-process group reducing through a shared barrier
//! - fatal checkpoint failures

mod common;

use anyhow::Result;
use common::*;
use runtime_core::{DistEnv, Error, LocalProcessGroup, ResumptionState, TrainingConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use trainer::{ProfileSchedule, ScheduledProfiler, TraceRecorder, Trainer, TrainerState};

const BATCH_SIZE: usize = 2;
const SEQ_LENGTH: usize = 4;

fn config(num_steps: u64, report_interval: u64, checkpoint_interval: u64) -> TrainingConfig {
    TrainingConfig {
        num_steps,
        report_interval,
        checkpoint_interval,
        batch_size: BATCH_SIZE as u64,
        seq_length: SEQ_LENGTH as u64,
        ..Default::default()
    }
}

#[derive(Clone, Default)]
struct CountingRecorder(Arc<AtomicUsize>);

impl TraceRecorder for CountingRecorder {
    fn start(&mut self, _cycle: u64) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&mut self, _cycle: u64) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_three_step_single_worker_run() -> Result<()> {
    init_logging();
    let loader = ZeroLoader::new(BATCH_SIZE, SEQ_LENGTH);
    let served = loader.served.clone();
    let checkpointer = RecordingCheckpointer::default();
    let saved = checkpointer.saved.clone();
    let tracker = RecordingTracker::default();
    let logged = tracker.logged.clone();
    let resets = Arc::new(AtomicUsize::new(0));
    let recorder = CountingRecorder::default();

    let mut parts = single_worker_parts(
        vec![1.0, 2.0, 3.0],
        vec![0.1, 0.2, 0.3],
        loader,
        Box::new(checkpointer),
    );
    parts.tracker = Some(Box::new(tracker));
    parts.memory = Some(Box::new(FixedMemory {
        resets: resets.clone(),
    }));
    parts.profiler = Some(Box::new(ScheduledProfiler::new(
        ProfileSchedule::default(),
        recorder.clone(),
    )));

    let config = TrainingConfig {
        use_tracking: true,
        use_profiler: true,
        ..config(3, 2, 2)
    };
    let mut trainer = Trainer::new(config, DistEnv::single(), parts, ResumptionState::default())?;
    let outcome = trainer.run().await?;

    assert_eq!(trainer.state(), TrainerState::Completed);
    assert_eq!(outcome.final_step, 3);
    assert!((outcome.final_step_loss.unwrap() - 3.0).abs() < 1e-5);
    assert!((outcome.last_reported_loss.unwrap() - 1.5).abs() < 1e-5);

    // no batch is pulled past the step budget
    assert_eq!(served.load(Ordering::SeqCst), 3);
    assert_eq!(resets.load(Ordering::SeqCst), 3);
    // three steps only reach the start of the recording window
    assert_eq!(recorder.0.load(Ordering::SeqCst), 1);

    let logged = logged.lock().unwrap().clone();
    assert_eq!(logged.len(), 1);
    let (step, fields) = &logged[0];
    assert_eq!(*step, 2);
    assert!((fields["loss"] - 1.5).abs() < 1e-5);
    assert!((fields["gradient norm"] - 0.15).abs() < 1e-12);
    assert_eq!(fields["token seen"], (2 * BATCH_SIZE * SEQ_LENGTH) as f64);
    assert_eq!(fields["learning rate"], 3e-4);
    assert_eq!(fields["gpu reserved memory"], 2048.0);

    let saved = saved.lock().unwrap().clone();
    assert_eq!(
        saved,
        vec![(2, ResumptionState::new(2, (2 * BATCH_SIZE * SEQ_LENGTH) as u64))]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_four_workers_report_global_mean() -> Result<()> {
    init_logging();
    let world_size = 4u32;
    let scripts: Vec<Vec<f64>> = vec![
        vec![1.0, 2.0],
        vec![0.5, 4.0],
        vec![3.0, 3.0],
        vec![2.5, 0.25],
    ];
    let expected_loss =
        scripts.iter().flatten().sum::<f64>() / scripts.iter().flatten().count() as f64;

    let mut recorders = Vec::new();
    let mut tasks = Vec::new();
    for (handle, losses) in LocalProcessGroup::new(world_size).into_iter().zip(scripts) {
        let rank = handle.rank();
        let env = DistEnv {
            rank,
            local_rank: rank,
            world_size,
        };
        let checkpointer = RecordingCheckpointer::default();
        recorders.push(checkpointer.saved.clone());

        let parts = parts_with_collective(
            losses,
            vec![1.0],
            ZeroLoader::new(BATCH_SIZE, SEQ_LENGTH),
            Box::new(checkpointer),
            Box::new(handle),
        );
        let mut trainer = Trainer::new(config(4, 2, 2), env, parts, ResumptionState::default())?;
        tasks.push(tokio::spawn(async move { trainer.run().await }));
    }

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await??);
    }

    let reported: Vec<f64> = outcomes.iter().filter_map(|o| o.last_reported_loss).collect();
    assert_eq!(reported.len(), 1);
    assert!((reported[0] - expected_loss).abs() < 1e-5);
    assert_eq!(outcomes[0].last_reported_loss, reported.first().copied());

    let tokens_per_step = (world_size as usize * BATCH_SIZE * SEQ_LENGTH) as u64;
    for (outcome, saved) in outcomes.iter().zip(recorders) {
        assert_eq!(outcome.final_step, 4);
        assert_eq!(outcome.tokens_seen, 4 * tokens_per_step);
        let saved = saved.lock().unwrap().clone();
        assert_eq!(
            saved,
            vec![
                (2, ResumptionState::new(2, 2 * tokens_per_step)),
                (4, ResumptionState::new(4, 4 * tokens_per_step)),
            ]
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_checkpoint_failure_ends_run() -> Result<()> {
    init_logging();
    let loader = ZeroLoader::new(BATCH_SIZE, SEQ_LENGTH);
    let served = loader.served.clone();
    let checkpointer = RecordingCheckpointer {
        fail: true,
        ..Default::default()
    };
    let parts = single_worker_parts(vec![1.0], vec![0.1], loader, Box::new(checkpointer));

    let mut trainer = Trainer::new(config(10, 5, 3), DistEnv::single(), parts, ResumptionState::default())?;
    let err = trainer.run().await.unwrap_err();

    assert!(matches!(err, Error::CheckpointWriteFailed { step: 3, .. }));
    assert!(err.is_fatal());
    assert_eq!(served.load(Ordering::SeqCst), 3);
    assert_eq!(trainer.state(), TrainerState::Checkpointing);
    Ok(())
}
