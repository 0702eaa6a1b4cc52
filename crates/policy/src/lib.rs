//! Training policy selection
//!
//! Picks the mixed-precision mode, sharding strategy and activation
//! checkpointing policy once, before training starts, from the run
//! configuration and runtime hardware probes. Unsupported or unprobeable
//! hardware degrades to a safe choice instead of failing.

pub mod hardware;
pub mod selector;

pub use hardware::{EnvProbe, HardwareProbe, StaticProbe, Version};
pub use selector::{
    select_policies, ActivationCheckpointing, PolicyChoice, PrecisionMode, ShardingStrategy,
};
