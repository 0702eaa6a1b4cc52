//! Filesystem checkpointer writing one shard file per worker

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use runtime_core::{
    Checkpointer, DataLoader, DistEnv, Error, Model, Optimizer, Rank, ResumptionState, Result,
    Step, TrainingConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

/// Magic bytes for shard files
pub const SHARD_MAGIC: [u8; 4] = *b"CKPT";

/// Shard format version
pub const SHARD_VERSION: u32 = 1;

/// Magic, version, step, tokens seen and three section lengths
const SHARD_HEADER_LEN: u64 = 4 + 4 + 8 + 8 + 3 * 8;

const METADATA_FILE: &str = "metadata.json";

/// Checkpoint-wide record written by the reporting worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub state: ResumptionState,
    pub world_size: u32,
    pub created_at: DateTime<Utc>,
}

/// Decoded contents of one worker's shard file
#[derive(Debug, Clone, PartialEq)]
pub struct ShardContents {
    pub state: ResumptionState,
    pub model: Bytes,
    pub optimizer: Bytes,
    pub loader: Bytes,
}

/// Writes `<save_dir>/step_<N>_ckp/rank_<r>.ckpt` on every worker, plus
/// `metadata.json` and pruning of old checkpoints on the reporter.
#[derive(Debug, Clone)]
pub struct LocalCheckpointer {
    save_dir: PathBuf,
    rank: Rank,
    world_size: u32,
    keep_count: usize,
}

impl LocalCheckpointer {
    pub fn new(save_dir: impl Into<PathBuf>, env: &DistEnv, keep_count: usize) -> Self {
        Self {
            save_dir: save_dir.into(),
            rank: env.rank,
            world_size: env.world_size,
            keep_count: keep_count.max(1),
        }
    }

    pub fn from_config(config: &TrainingConfig, env: &DistEnv) -> Self {
        Self::new(&config.ckpt_save_path, env, config.checkpoint_keep_count)
    }

    /// Directory holding every shard of the checkpoint taken at `step`
    pub fn step_dir(base: &Path, step: Step) -> PathBuf {
        base.join(format!("step_{}_ckp", step))
    }

    /// Path of one worker's shard inside a checkpoint directory
    pub fn shard_path(step_dir: &Path, rank: Rank) -> PathBuf {
        step_dir.join(format!("rank_{}.ckpt", rank))
    }

    fn parse_step_dir(name: &str) -> Option<Step> {
        name.strip_prefix("step_")?
            .strip_suffix("_ckp")?
            .parse()
            .ok()
    }

    /// Step directories under `base`, oldest first
    async fn list_checkpoints(base: &Path) -> Result<Vec<(Step, PathBuf)>> {
        let mut entries = match tokio::fs::read_dir(base).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(step) = name.to_str().and_then(Self::parse_step_dir) {
                if entry.file_type().await?.is_dir() {
                    found.push((step, entry.path()));
                }
            }
        }
        found.sort_by_key(|(step, _)| *step);
        Ok(found)
    }

    /// Newest complete checkpoint under `load_dir`, as the state to resume from.
    ///
    /// A checkpoint is complete when its metadata exists and every rank's
    /// shard is present. `None` means start from scratch.
    pub async fn latest_resumption_state(load_dir: impl AsRef<Path>) -> Result<Option<ResumptionState>> {
        let load_dir = load_dir.as_ref();
        for (step, dir) in Self::list_checkpoints(load_dir).await?.into_iter().rev() {
            match Self::read_metadata(&dir).await {
                Ok(metadata) => {
                    if Self::shards_complete(&dir, metadata.world_size).await {
                        info!(
                            step = metadata.state.step,
                            tokens_seen = metadata.state.tokens_seen,
                            path = %dir.display(),
                            "Found checkpoint to resume from"
                        );
                        return Ok(Some(metadata.state));
                    }
                    warn!(step = step, path = %dir.display(), "Skipping checkpoint with missing shards");
                }
                Err(e) => {
                    warn!(step = step, error = %e, "Skipping unreadable checkpoint");
                }
            }
        }
        Ok(None)
    }

    async fn read_metadata(dir: &Path) -> Result<CheckpointMetadata> {
        let path = dir.join(METADATA_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::CheckpointNotFound {
                    path: path.display().to_string(),
                })
            }
            Err(e) => return Err(Error::Io(e)),
        };
        serde_json::from_slice(&raw).map_err(|e| Error::CheckpointCorrupted {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    async fn shards_complete(dir: &Path, world_size: u32) -> bool {
        for rank in 0..world_size {
            if tokio::fs::metadata(Self::shard_path(dir, rank)).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Encode a shard: fixed header followed by the three opaque sections
    fn encode_shard(state: &ResumptionState, model: &[u8], optimizer: &[u8], loader: &[u8]) -> Bytes {
        let body_len = model.len() + optimizer.len() + loader.len();
        let mut buf = BytesMut::with_capacity(SHARD_HEADER_LEN as usize + body_len);
        buf.put_slice(&SHARD_MAGIC);
        buf.put_u32_le(SHARD_VERSION);
        buf.put_u64_le(state.step);
        buf.put_u64_le(state.tokens_seen);
        buf.put_u64_le(model.len() as u64);
        buf.put_u64_le(optimizer.len() as u64);
        buf.put_u64_le(loader.len() as u64);
        buf.put_slice(model);
        buf.put_slice(optimizer);
        buf.put_slice(loader);
        buf.freeze()
    }

    /// Read one worker's shard file back
    pub async fn read_shard(path: impl AsRef<Path>) -> Result<ShardContents> {
        let path = path.as_ref();
        let corrupted = |reason: String| Error::CheckpointCorrupted {
            path: path.display().to_string(),
            reason,
        };
        let truncated = |e: std::io::Error| corrupted(format!("truncated shard: {}", e));

        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::CheckpointNotFound {
                    path: path.display().to_string(),
                })
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).await.map_err(truncated)?;
        if magic != SHARD_MAGIC {
            return Err(corrupted("invalid shard magic".to_string()));
        }

        let version = file.read_u32_le().await.map_err(truncated)?;
        if version != SHARD_VERSION {
            return Err(corrupted(format!(
                "unsupported shard version {} (expected {})",
                version, SHARD_VERSION
            )));
        }

        let step = file.read_u64_le().await.map_err(truncated)?;
        let tokens_seen = file.read_u64_le().await.map_err(truncated)?;
        let mut lengths = [0u64; 3];
        for len in lengths.iter_mut() {
            *len = file.read_u64_le().await.map_err(truncated)?;
        }

        let file_len = file.metadata().await?.len();
        let expected_len = lengths
            .iter()
            .try_fold(SHARD_HEADER_LEN, |total, len| total.checked_add(*len));
        if expected_len != Some(file_len) {
            return Err(corrupted(format!(
                "section lengths {:?} do not match shard size {}",
                lengths, file_len
            )));
        }

        let mut sections = Vec::with_capacity(lengths.len());
        for len in lengths {
            let mut section = vec![0u8; len as usize];
            file.read_exact(&mut section).await.map_err(truncated)?;
            sections.push(Bytes::from(section));
        }
        let loader = sections.pop().unwrap_or_default();
        let optimizer = sections.pop().unwrap_or_default();
        let model = sections.pop().unwrap_or_default();

        Ok(ShardContents {
            state: ResumptionState::new(step, tokens_seen),
            model,
            optimizer,
            loader,
        })
    }

    /// Write to a temporary file, sync, then rename into place
    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }

    /// Delete all but the newest `keep_count` checkpoints
    async fn prune(&self) -> Result<()> {
        let checkpoints = Self::list_checkpoints(&self.save_dir).await?;
        let excess = checkpoints.len().saturating_sub(self.keep_count);
        for (step, dir) in checkpoints.into_iter().take(excess) {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!(step = step, path = %dir.display(), "Deleted old checkpoint"),
                Err(e) => warn!(step = step, path = %dir.display(), error = %e, "Failed to delete old checkpoint"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Checkpointer for LocalCheckpointer {
    #[instrument(skip_all, fields(step = step, rank = self.rank))]
    async fn save(
        &mut self,
        step: Step,
        model: &dyn Model,
        optimizer: &dyn Optimizer,
        loader: &dyn DataLoader,
        state: &ResumptionState,
    ) -> Result<()> {
        let start = std::time::Instant::now();
        let write_failed = |e: Error| Error::CheckpointWriteFailed {
            step,
            message: e.to_string(),
        };

        let step_dir = Self::step_dir(&self.save_dir, step);
        tokio::fs::create_dir_all(&step_dir)
            .await
            .map_err(|e| write_failed(Error::Io(e)))?;

        let shard = Self::encode_shard(
            state,
            &model.state_dict()?,
            &optimizer.state_dict()?,
            &loader.resume_state()?,
        );
        Self::write_atomic(&Self::shard_path(&step_dir, self.rank), &shard)
            .await
            .map_err(write_failed)?;

        if self.rank == 0 {
            let metadata = CheckpointMetadata {
                state: *state,
                world_size: self.world_size,
                created_at: Utc::now(),
            };
            let json = serde_json::to_vec_pretty(&metadata)?;
            Self::write_atomic(&step_dir.join(METADATA_FILE), &json)
                .await
                .map_err(write_failed)?;
            self.prune().await?;
        }

        debug!(
            size_bytes = shard.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Checkpoint shard written"
        );
        Ok(())
    }
}
