//! Integration tests across startup, checkpointing and tracking

mod common;

use anyhow::Result;
use checkpoint::LocalCheckpointer;
use common::*;
use policy::{PrecisionMode, ShardingStrategy, StaticProbe};
use runtime_core::{DistEnv, Error, ResumptionState, TrainingConfig};
use std::collections::HashMap;
use tempfile::TempDir;
use trainer::{prepare, Trainer};

const BATCH_SIZE: usize = 1;
const SEQ_LENGTH: usize = 8;

fn config(dir: &TempDir, num_steps: u64) -> TrainingConfig {
    let path = dir.path().join("ckpt").to_string_lossy().to_string();
    TrainingConfig {
        num_steps,
        report_interval: 2,
        checkpoint_interval: 2,
        checkpoint_keep_count: 2,
        batch_size: BATCH_SIZE as u64,
        seq_length: SEQ_LENGTH as u64,
        ckpt_load_path: path.clone(),
        ckpt_save_path: path,
        tracking_dir: dir.path().join("tracking").to_string_lossy().to_string(),
        ..Default::default()
    }
}

async fn run_local(config: &TrainingConfig, start: ResumptionState) -> Result<trainer::TrainOutcome> {
    let env = DistEnv::single();
    let parts = single_worker_parts(
        vec![2.0],
        vec![0.5],
        ZeroLoader::new(BATCH_SIZE, SEQ_LENGTH),
        Box::new(LocalCheckpointer::from_config(config, &env)),
    );
    let mut trainer = Trainer::new(config.clone(), env, parts, start)?;
    Ok(trainer.run().await?)
}

#[test]
fn test_missing_world_size_is_fatal() {
    let vars: HashMap<&str, &str> = [("RANK", "0"), ("LOCAL_RANK", "0")].into_iter().collect();
    let err = DistEnv::from_lookup(|var| vars.get(var).map(|v| v.to_string())).unwrap_err();
    assert!(matches!(err, Error::MissingEnv { .. }));
    assert!(err.is_startup_error());
}

#[tokio::test]
async fn test_resume_from_local_checkpoints() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let first = config(&dir, 6);

    let outcome = run_local(&first, ResumptionState::default()).await?;
    assert_eq!(outcome.final_step, 6);

    let tokens_per_step = (BATCH_SIZE * SEQ_LENGTH) as u64;
    let resume = LocalCheckpointer::latest_resumption_state(&first.ckpt_load_path)
        .await?
        .expect("checkpoint written");
    assert_eq!(resume, ResumptionState::new(6, 6 * tokens_per_step));

    // keep count of 2 leaves steps 4 and 6
    let base = std::path::Path::new(&first.ckpt_save_path);
    assert!(!LocalCheckpointer::step_dir(base, 2).exists());
    assert!(LocalCheckpointer::step_dir(base, 4).exists());

    let shard = LocalCheckpointer::read_shard(LocalCheckpointer::shard_path(
        &LocalCheckpointer::step_dir(base, 6),
        0,
    ))
    .await?;
    assert_eq!(shard.state, resume);
    assert_eq!(&shard.optimizer[..], b"6");
    assert_eq!(&shard.loader[..], b"6");

    let startup = prepare(&first, &DistEnv::single(), &StaticProbe::cpu_only()).await?;
    assert_eq!(startup.resume_from, resume);

    let second = config(&dir, 8);
    let outcome = run_local(&second, startup.resume_from).await?;
    assert_eq!(outcome.final_step, 8);
    assert_eq!(outcome.tokens_seen, 8 * tokens_per_step);
    assert!((outcome.last_reported_loss.unwrap() - 2.0).abs() < 1e-5);
    Ok(())
}

#[tokio::test]
async fn test_startup_opens_tracker_and_selects_policy() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let config = TrainingConfig {
        use_tracking: true,
        mixed_precision: true,
        sharding_strategy: "xyz".to_string(),
        ..config(&dir, 4)
    };

    let startup = prepare(&config, &DistEnv::single(), &StaticProbe::cpu_only()).await?;
    assert_eq!(startup.policy.precision, PrecisionMode::Fp16);
    assert_eq!(startup.policy.sharding, ShardingStrategy::FullShard);
    assert_eq!(startup.resume_from, ResumptionState::default());

    let env = DistEnv::single();
    let mut parts = single_worker_parts(
        vec![1.0],
        vec![0.1],
        ZeroLoader::new(BATCH_SIZE, SEQ_LENGTH),
        Box::new(RecordingCheckpointer::default()),
    );
    parts.tracker = startup.tracker;
    let mut trainer = Trainer::new(config.clone(), env, parts, startup.resume_from)?;
    trainer.run().await?;

    let log = std::path::Path::new(&config.tracking_dir)
        .join(&config.tracking_project)
        .join(format!("{}.jsonl", config.tracking_run_id));
    let lines: Vec<serde_json::Value> = std::fs::read_to_string(log)?
        .lines()
        .map(serde_json::from_str::<serde_json::Value>)
        .collect::<std::result::Result<_, _>>()?;
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["kind"], "run");
    assert_eq!(lines[1]["step"], 2);
    assert_eq!(lines[2]["step"], 4);
    Ok(())
}

#[tokio::test]
async fn test_tracking_without_tracker_fails_before_first_batch() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let config = TrainingConfig {
        use_tracking: true,
        ..config(&dir, 4)
    };
    let loader = ZeroLoader::new(BATCH_SIZE, SEQ_LENGTH);
    let served = loader.served.clone();
    let parts = single_worker_parts(
        vec![1.0],
        vec![0.1],
        loader,
        Box::new(RecordingCheckpointer::default()),
    );

    let err = Trainer::new(config, DistEnv::single(), parts, ResumptionState::default())
        .err()
        .expect("tracker is required");
    assert!(matches!(err, Error::TrackerUnavailable { .. }));
    assert!(err.is_startup_error());
    assert_eq!(served.load(std::sync::atomic::Ordering::SeqCst), 0);
    Ok(())
}
