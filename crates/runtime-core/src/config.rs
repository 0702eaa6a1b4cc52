//! Training configuration types

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Immutable hyperparameter record shared read-only by every worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    // Model
    /// Model size variant, used for naming only
    pub model_variant: String,

    /// Directory scanned for a checkpoint to resume from
    pub ckpt_load_path: String,

    /// Directory new checkpoints are written under
    pub ckpt_save_path: String,

    // Dataset and data loader
    pub use_dummy_dataset: bool,
    pub data_path: String,

    /// Tokens per sample
    pub seq_length: u64,

    pub sep_token: u32,

    /// Comma-separated dataset names
    pub datasets: String,

    /// Comma-separated sampling weights, one per dataset
    pub weights: String,

    pub logical_shards: u32,

    // Sharding policies
    pub mixed_precision: bool,
    pub fsdp_activation_checkpointing: bool,

    /// Checkpoint every n-th block when activation checkpointing is on
    pub selective_checkpointing: u32,

    /// One of "fsdp", "hsdp", "ddp"; anything else means full sharding
    pub sharding_strategy: String,

    pub low_cpu_fsdp: bool,

    // Training
    pub seed: u64,

    /// Per-worker batch size
    pub batch_size: u64,

    /// Step budget; the loop stops once the step index exceeds it
    pub num_steps: u64,

    pub learning_rate: f64,
    pub grad_clip_thresh: f64,

    // Profiling and logging
    pub use_profiler: bool,
    pub use_tracking: bool,
    pub tracking_dir: String,
    pub tracking_project: String,

    /// Stable id so a restarted job appends to the same run
    pub tracking_run_id: String,

    pub report_interval: u64,
    pub checkpoint_interval: u64,

    /// Number of checkpoint directories kept on disk
    pub checkpoint_keep_count: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let model_variant = "7b".to_string();
        Self {
            tracking_project: format!("llama-{}", model_variant),
            model_variant,
            ckpt_load_path: "/lustre/pretrain/ckpt".to_string(),
            ckpt_save_path: "/lustre/pretrain/ckpt".to_string(),
            use_dummy_dataset: false,
            data_path: "/lustre/data".to_string(),
            seq_length: 4096,
            sep_token: 1,
            datasets: [
                "lang=en/dataset=commoncrawl",
                "lang=en/dataset=webhose",
                "lang=en/dataset=github_clean",
                "lang=de/dataset=wikipedia",
                "lang=es/dataset=wikipedia",
                "lang=fr/dataset=wikipedia",
                "lang=ja/dataset=wikipedia",
                "lang=pt/dataset=wikipedia",
                "lang=en/dataset=wikimedia",
                "lang=en/dataset=uspto",
                "lang=en/dataset=pubmedcentral",
                "lang=en/dataset=arxiv",
                "lang=en/dataset=stackexchange",
                "lang=en/dataset=PG19",
            ]
            .join(","),
            weights: "7700,500,550,28,17,22,25,8,100,500,175,250,100,25".to_string(),
            logical_shards: 768,
            mixed_precision: true,
            fsdp_activation_checkpointing: false,
            selective_checkpointing: 1,
            sharding_strategy: "hsdp".to_string(),
            low_cpu_fsdp: false,
            seed: 2023,
            batch_size: 2,
            num_steps: 2_000_000,
            learning_rate: 3e-4,
            grad_clip_thresh: 1.0,
            use_profiler: false,
            use_tracking: false,
            tracking_dir: "/lustre/pretrain/tracking".to_string(),
            tracking_run_id: "aabbccdd".to_string(),
            report_interval: 200,
            checkpoint_interval: 20000,
            checkpoint_keep_count: 5,
        }
    }
}

impl TrainingConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&raw)
    }

    /// Reject values that would make the step loop divide by zero or
    /// produce meaningless metrics
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(Error::InvalidConfig {
                message: message.to_string(),
            })
        };

        if self.batch_size == 0 {
            return invalid("batch_size must be > 0");
        }
        if self.seq_length == 0 {
            return invalid("seq_length must be > 0");
        }
        if self.report_interval == 0 {
            return invalid("report_interval must be > 0");
        }
        if self.checkpoint_interval == 0 {
            return invalid("checkpoint_interval must be > 0");
        }
        if !self.grad_clip_thresh.is_finite() || self.grad_clip_thresh <= 0.0 {
            return invalid("grad_clip_thresh must be a positive finite number");
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return invalid("learning_rate must be a positive finite number");
        }
        if self.checkpoint_keep_count == 0 {
            return invalid("checkpoint_keep_count must be > 0");
        }

        Ok(())
    }

    /// Tokens one worker consumes per step
    pub fn tokens_per_worker_step(&self) -> u64 {
        self.batch_size * self.seq_length
    }

    /// Parse the comma-separated dataset sampling weights
    pub fn dataset_weights(&self) -> Result<Vec<u64>> {
        self.weights
            .split(',')
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(|w| {
                w.parse::<u64>().map_err(|e| Error::InvalidConfig {
                    message: format!("invalid dataset weight {:?}: {}", w, e),
                })
            })
            .collect()
    }
}
