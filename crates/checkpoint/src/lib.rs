//! Checkpointing for distributed pretraining
//!
//! Provides step-cadence triggering and a local filesystem checkpointer
//! that writes one shard per worker and finds the newest resumable state.

pub mod local;
pub mod trigger;

pub use local::{CheckpointMetadata, LocalCheckpointer, ShardContents, SHARD_MAGIC, SHARD_VERSION};
pub use trigger::CheckpointTrigger;
