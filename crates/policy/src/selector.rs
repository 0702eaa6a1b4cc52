//! Policy selection from configuration and hardware capabilities

use crate::hardware::{HardwareProbe, Version, MIN_COLLECTIVE_VERSION, MIN_PLATFORM_VERSION};
use runtime_core::{Result, TrainingConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Numeric precision used for parameters, reductions and buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrecisionMode {
    /// Full precision, mixed precision disabled
    Disabled,
    Fp16,
    Bf16,
}

impl fmt::Display for PrecisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrecisionMode::Disabled => "none",
            PrecisionMode::Fp16 => "fp16",
            PrecisionMode::Bf16 => "bf16",
        };
        f.write_str(name)
    }
}

/// How parameters and gradients are partitioned across workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShardingStrategy {
    FullShard,
    HybridShard,
    NoShard,
}

impl ShardingStrategy {
    /// Map a configuration string, or `None` if the string is not recognized
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fsdp" => Some(ShardingStrategy::FullShard),
            "hsdp" => Some(ShardingStrategy::HybridShard),
            "ddp" => Some(ShardingStrategy::NoShard),
            _ => None,
        }
    }
}

impl fmt::Display for ShardingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShardingStrategy::FullShard => "full-shard",
            ShardingStrategy::HybridShard => "hybrid-shard",
            ShardingStrategy::NoShard => "no-shard",
        };
        f.write_str(name)
    }
}

/// Which transformer blocks recompute activations in the backward pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationCheckpointing {
    Disabled,

    /// Checkpoint every `every_n`-th block; 1 means every block
    Selective { every_n: u32 },
}

/// Policies fixed for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyChoice {
    pub precision: PrecisionMode,
    pub sharding: ShardingStrategy,
    pub activation_checkpointing: ActivationCheckpointing,
}

/// Choose precision, sharding and activation-checkpointing policies.
///
/// Deterministic in its inputs. Probe failures never escape: a failing probe
/// counts as the capability being absent, so the worst case is fp16.
/// Only the reporting worker logs the decision.
pub fn select_policies(
    config: &TrainingConfig,
    probe: &dyn HardwareProbe,
    is_reporter: bool,
) -> PolicyChoice {
    let precision = if !config.mixed_precision {
        PrecisionMode::Disabled
    } else if bf16_ready(probe) {
        if is_reporter {
            info!("bf16 enabled for mixed precision");
        }
        PrecisionMode::Bf16
    } else {
        if is_reporter {
            info!("fp16 enabled for mixed precision");
        }
        PrecisionMode::Fp16
    };

    let sharding = match ShardingStrategy::parse(&config.sharding_strategy) {
        Some(strategy) => strategy,
        None => {
            if is_reporter {
                warn!(
                    requested = %config.sharding_strategy,
                    "Unrecognized sharding strategy, falling back to full-shard"
                );
            }
            ShardingStrategy::FullShard
        }
    };

    let activation_checkpointing = if config.fsdp_activation_checkpointing {
        ActivationCheckpointing::Selective {
            every_n: config.selective_checkpointing.max(1),
        }
    } else {
        ActivationCheckpointing::Disabled
    };

    if is_reporter {
        info!(
            precision = %precision,
            sharding = %sharding,
            configured_sharding = %config.sharding_strategy,
            activation_checkpointing = ?activation_checkpointing,
            "Training policies selected"
        );
    }

    PolicyChoice {
        precision,
        sharding,
        activation_checkpointing,
    }
}

/// All bf16 prerequisites hold. Evaluation stops at the first missing one.
fn bf16_ready(probe: &dyn HardwareProbe) -> bool {
    probe_or_absent("bf16_supported", probe.bf16_supported())
        && meets(
            "platform_version",
            probe.platform_version(),
            MIN_PLATFORM_VERSION,
        )
        && meets(
            "collective_version",
            probe.collective_version(),
            MIN_COLLECTIVE_VERSION,
        )
}

fn meets(name: &str, version: Result<Option<Version>>, minimum: Version) -> bool {
    version
        .map(|v| v.map(|v| v >= minimum).unwrap_or(false))
        .map_or_else(|e| probe_failed(name, &e), |ok| ok)
}

fn probe_or_absent(name: &str, result: Result<bool>) -> bool {
    result.map_or_else(|e| probe_failed(name, &e), |ok| ok)
}

fn probe_failed(name: &str, error: &runtime_core::Error) -> bool {
    debug!(probe = name, error = %error, "Hardware probe failed, treating capability as absent");
    false
}
