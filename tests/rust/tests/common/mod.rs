//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::{
    Batch, Checkpointer, Collective, DataLoader, Error, ExperimentTracker, Logits, LrScheduler,
    MemoryMonitor, Model, Optimizer, ResumptionState, Result, SingleProcess, Step, TrackerFields,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use trainer::TrainerParts;

/// Route driver logs to the test output; `RUST_LOG` overrides
pub fn init_logging() {
    runtime_core::logging::init(runtime_core::logging::DEFAULT_DIRECTIVE);
}

/// Produces logits whose loss against label 0 is the next scripted value
pub struct ScriptedModel {
    losses: Vec<f64>,
    norms: Vec<f64>,
    calls: usize,
}

impl ScriptedModel {
    pub fn new(losses: Vec<f64>, norms: Vec<f64>) -> Self {
        Self {
            losses,
            norms,
            calls: 0,
        }
    }
}

impl Model for ScriptedModel {
    fn train_mode(&mut self) {}

    fn forward(&mut self, batch: &Batch) -> Result<Logits> {
        let loss = self.losses[self.calls % self.losses.len()];
        let other = (loss.exp() - 1.0).ln() as f32;
        let data = (0..batch.num_positions())
            .flat_map(|_| [0.0, other])
            .collect();
        Logits::new(data, 2)
    }

    fn backward(&mut self, _grad_logits: &Logits) -> Result<()> {
        Ok(())
    }

    fn clip_grad_norm(&mut self, _max_norm: f64) -> Result<f64> {
        let norm = self.norms[self.calls % self.norms.len()];
        self.calls += 1;
        Ok(norm)
    }

    fn state_dict(&self) -> Result<Bytes> {
        Ok(Bytes::from(format!("model@{}", self.calls)))
    }
}

#[derive(Clone, Default)]
pub struct CountingOptimizer {
    pub steps: Arc<AtomicUsize>,
}

impl Optimizer for CountingOptimizer {
    fn zero_grad(&mut self) {}

    fn step(&mut self) -> Result<()> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn state_dict(&self) -> Result<Bytes> {
        Ok(Bytes::from(self.steps.load(Ordering::SeqCst).to_string()))
    }
}

pub struct ConstantLr(pub f64);

impl LrScheduler for ConstantLr {
    fn step(&mut self) {}

    fn last_lr(&self) -> f64 {
        self.0
    }
}

/// Endless all-zero batches; counts how many were handed out
#[derive(Clone)]
pub struct ZeroLoader {
    pub batch_size: usize,
    pub seq_length: usize,
    pub served: Arc<AtomicUsize>,
}

impl ZeroLoader {
    pub fn new(batch_size: usize, seq_length: usize) -> Self {
        Self {
            batch_size,
            seq_length,
            served: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl DataLoader for ZeroLoader {
    async fn next_batch(&mut self) -> Result<Option<Batch>> {
        self.served.fetch_add(1, Ordering::SeqCst);
        let len = self.batch_size * self.seq_length;
        Batch::new(vec![0; len], vec![0; len], self.batch_size, self.seq_length).map(Some)
    }

    fn resume_state(&self) -> Result<Bytes> {
        Ok(Bytes::from(self.served.load(Ordering::SeqCst).to_string()))
    }
}

/// Records every save; optionally fails every save
#[derive(Clone, Default)]
pub struct RecordingCheckpointer {
    pub saved: Arc<Mutex<Vec<(Step, ResumptionState)>>>,
    pub fail: bool,
}

#[async_trait]
impl Checkpointer for RecordingCheckpointer {
    async fn save(
        &mut self,
        step: Step,
        _model: &dyn Model,
        _optimizer: &dyn Optimizer,
        _loader: &dyn DataLoader,
        state: &ResumptionState,
    ) -> Result<()> {
        if self.fail {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no space left on device",
            )));
        }
        self.saved
            .lock()
            .map_err(|_| Error::Internal {
                message: "poisoned".to_string(),
            })?
            .push((step, *state));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingTracker {
    pub logged: Arc<Mutex<Vec<(Step, TrackerFields)>>>,
}

#[async_trait]
impl ExperimentTracker for RecordingTracker {
    async fn log(&mut self, fields: &TrackerFields, step: Step) -> Result<()> {
        if let Ok(mut logged) = self.logged.lock() {
            logged.push((step, fields.clone()));
        }
        Ok(())
    }
}

pub struct FixedMemory {
    pub resets: Arc<AtomicUsize>,
}

impl MemoryMonitor for FixedMemory {
    fn max_reserved_bytes(&self) -> u64 {
        2048
    }

    fn max_allocated_bytes(&self) -> u64 {
        1024
    }

    fn reset_peak(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Single-worker parts driven by the given loss and norm scripts
pub fn single_worker_parts(
    losses: Vec<f64>,
    norms: Vec<f64>,
    loader: ZeroLoader,
    checkpointer: Box<dyn Checkpointer>,
) -> TrainerParts {
    parts_with_collective(losses, norms, loader, checkpointer, Box::new(SingleProcess))
}

pub fn parts_with_collective(
    losses: Vec<f64>,
    norms: Vec<f64>,
    loader: ZeroLoader,
    checkpointer: Box<dyn Checkpointer>,
    collective: Box<dyn Collective>,
) -> TrainerParts {
    TrainerParts {
        model: Box::new(ScriptedModel::new(losses, norms)),
        optimizer: Box::new(CountingOptimizer::default()),
        scheduler: Box::new(ConstantLr(3e-4)),
        loader: Box::new(loader),
        collective,
        checkpointer,
        profiler: None,
        tracker: None,
        memory: None,
    }
}
