//! Core type definitions for the pretraining driver

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Training step counter; the first step of a fresh run is 1
pub type Step = u64;

/// Ordinal identity of a worker in the process group
pub type Rank = u32;

/// Per-worker running sums between two reductions.
///
/// Slot layout is shared with the collective reduction: summed loss,
/// summed gradient norm, step count.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkerStats {
    values: [f64; WorkerStats::LEN],
}

impl WorkerStats {
    /// Number of slots reduced across workers
    pub const LEN: usize = 3;

    const LOSS: usize = 0;
    const GRAD_NORM: usize = 1;
    const STEPS: usize = 2;

    /// Create a zeroed accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Build stats from raw slot values, e.g. after a reduction
    pub fn from_slots(values: [f64; WorkerStats::LEN]) -> Self {
        Self { values }
    }

    /// Record one optimizer step
    pub fn accumulate(&mut self, loss: f64, grad_norm: f64) {
        self.values[Self::LOSS] += loss;
        self.values[Self::GRAD_NORM] += grad_norm;
        self.values[Self::STEPS] += 1.0;
    }

    pub fn loss_sum(&self) -> f64 {
        self.values[Self::LOSS]
    }

    pub fn grad_norm_sum(&self) -> f64 {
        self.values[Self::GRAD_NORM]
    }

    pub fn steps(&self) -> f64 {
        self.values[Self::STEPS]
    }

    /// Mean loss over the recorded steps, if any
    pub fn mean_loss(&self) -> Option<f64> {
        (self.steps() > 0.0).then(|| self.loss_sum() / self.steps())
    }

    /// Mean gradient norm over the recorded steps, if any
    pub fn mean_grad_norm(&self) -> Option<f64> {
        (self.steps() > 0.0).then(|| self.grad_norm_sum() / self.steps())
    }

    pub fn slots(&self) -> &[f64; WorkerStats::LEN] {
        &self.values
    }

    /// Mutable view handed to the collective reduction
    pub fn slots_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Zero every slot
    pub fn reset(&mut self) {
        self.values = [0.0; Self::LEN];
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }
}

/// Minimal data needed to continue training after a restart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumptionState {
    /// Last completed step
    pub step: Step,

    /// Tokens consumed by the whole process group up to `step`
    pub tokens_seen: u64,
}

impl ResumptionState {
    pub fn new(step: Step, tokens_seen: u64) -> Self {
        Self { step, tokens_seen }
    }
}

/// Where a batch currently lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    /// Host memory
    #[default]
    Cpu,

    /// Accelerator identified by the worker's local rank
    Accelerator(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(ordinal) => write!(f, "accelerator:{}", ordinal),
        }
    }
}

/// One (input, label) batch of token ids, row-major `batch_size x seq_length`
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub input: Vec<u32>,
    pub label: Vec<u32>,
    pub batch_size: usize,
    pub seq_length: usize,
    pub device: Device,
}

impl Batch {
    /// Create a host-side batch, checking both tensors have the stated shape
    pub fn new(
        input: Vec<u32>,
        label: Vec<u32>,
        batch_size: usize,
        seq_length: usize,
    ) -> Result<Self> {
        let expected = batch_size * seq_length;
        for (name, len) in [("input", input.len()), ("label", label.len())] {
            if len != expected {
                return Err(Error::ShapeMismatch {
                    expected: format!("{} of {}x{}", name, batch_size, seq_length),
                    actual: format!("{} elements", len),
                });
            }
        }

        Ok(Self {
            input,
            label,
            batch_size,
            seq_length,
            device: Device::Cpu,
        })
    }

    /// Move the batch to the given device
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Number of label positions in the batch
    pub fn num_positions(&self) -> usize {
        self.batch_size * self.seq_length
    }
}

/// Model predictions flattened to `positions x vocab_size`, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct Logits {
    pub data: Vec<f32>,
    pub vocab_size: usize,
}

impl Logits {
    pub fn new(data: Vec<f32>, vocab_size: usize) -> Result<Self> {
        if vocab_size == 0 || data.len() % vocab_size != 0 {
            return Err(Error::ShapeMismatch {
                expected: format!("a multiple of vocab size {}", vocab_size),
                actual: format!("{} logits", data.len()),
            });
        }
        Ok(Self { data, vocab_size })
    }

    pub fn num_positions(&self) -> usize {
        self.data.len() / self.vocab_size
    }

    /// Scores for one position
    pub fn row(&self, position: usize) -> &[f32] {
        let start = position * self.vocab_size;
        &self.data[start..start + self.vocab_size]
    }
}
