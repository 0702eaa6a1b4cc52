//! Runtime Core - Foundation for the pretraining driver
//!
//! Provides core types, configuration, error handling, process-group
//! identity, collective reduction backends and the contracts of every
//! external collaborator the step loop drives.

pub mod collaborators;
pub mod collective;
pub mod config;
pub mod env;
pub mod error;
pub mod logging;
pub mod types;

pub use collaborators::{
    Checkpointer, Collective, DataLoader, ExperimentTracker, LrScheduler, MemoryMonitor, Model,
    Optimizer, Profiler, TrackerFields,
};
pub use collective::{LocalCollective, LocalProcessGroup, SingleProcess};
pub use config::TrainingConfig;
pub use env::DistEnv;
pub use error::{Error, Result};
pub use types::*;
