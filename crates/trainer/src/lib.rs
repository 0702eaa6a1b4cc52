//! Pretraining step loop
//!
//! Ties the per-step work (loss, clipping, optimizer and scheduler steps)
//! to metrics reporting and checkpointing at fixed step boundaries.

pub mod driver;
pub mod loss;
pub mod profiler;
pub mod startup;

pub use driver::{TrainOutcome, Trainer, TrainerParts, TrainerState};
pub use loss::cross_entropy;
pub use profiler::{ProfilePhase, ProfileSchedule, ScheduledProfiler, TraceRecorder};
pub use startup::{prepare, Startup};
