//! Collective reduction backends

use crate::{Collective, Error, Rank, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;
use tracing::debug;

/// Identity reduction for a one-worker run
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

#[async_trait]
impl Collective for SingleProcess {
    fn world_size(&self) -> u32 {
        1
    }

    async fn all_reduce_sum(&self, _values: &mut [f64]) -> Result<()> {
        Ok(())
    }
}

/// Outcome of one reduction round, shared with every participant
type RoundOutcome = std::result::Result<Vec<f64>, (usize, usize)>;

struct GroupState {
    world_size: u32,
    barrier: Barrier,

    /// Contribution per rank for the round in flight
    slots: Mutex<Vec<Option<Vec<f64>>>>,

    /// Result published by the round leader
    outcome: Mutex<Option<RoundOutcome>>,

    rounds: AtomicU64,
}

/// In-process group of workers reducing through shared memory.
///
/// Each handle plays one rank; handles are meant to run on separate tokio
/// tasks, one per simulated worker.
pub struct LocalProcessGroup;

impl LocalProcessGroup {
    /// Create one handle per rank, ordered by rank
    pub fn new(world_size: u32) -> Vec<LocalCollective> {
        assert!(world_size > 0, "world size must be at least 1");

        let state = Arc::new(GroupState {
            world_size,
            barrier: Barrier::new(world_size as usize),
            slots: Mutex::new(vec![None; world_size as usize]),
            outcome: Mutex::new(None),
            rounds: AtomicU64::new(0),
        });

        (0..world_size)
            .map(|rank| LocalCollective {
                rank,
                state: Arc::clone(&state),
            })
            .collect()
    }
}

/// One rank's handle into a [`LocalProcessGroup`]
#[derive(Clone)]
pub struct LocalCollective {
    rank: Rank,
    state: Arc<GroupState>,
}

impl LocalCollective {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Completed reduction rounds across the group
    pub fn rounds(&self) -> u64 {
        self.state.rounds.load(Ordering::SeqCst)
    }

    /// Sum contributions in rank order so every run produces identical bits
    fn reduce(contributions: Vec<Vec<f64>>) -> RoundOutcome {
        let expected = contributions.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = contributions.iter().find(|c| c.len() != expected) {
            return Err((expected, bad.len()));
        }

        let mut sum = vec![0.0; expected];
        for contribution in &contributions {
            for (total, value) in sum.iter_mut().zip(contribution) {
                *total += value;
            }
        }
        Ok(sum)
    }
}

#[async_trait]
impl Collective for LocalCollective {
    fn world_size(&self) -> u32 {
        self.state.world_size
    }

    async fn all_reduce_sum(&self, values: &mut [f64]) -> Result<()> {
        self.state.slots.lock()[self.rank as usize] = Some(values.to_vec());

        // Everyone has contributed once the first barrier releases
        if self.state.barrier.wait().await.is_leader() {
            let contributions = self
                .state
                .slots
                .lock()
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            *self.state.outcome.lock() = Some(Self::reduce(contributions));

            let round = self.state.rounds.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(round = round, world_size = self.state.world_size, "All-reduce round complete");
        }

        // Nobody reads until the leader has published
        self.state.barrier.wait().await;

        let outcome = self.state.outcome.lock().clone();
        match outcome {
            Some(Ok(sum)) if sum.len() == values.len() => {
                values.copy_from_slice(&sum);
                Ok(())
            }
            Some(Ok(sum)) => Err(Error::CollectiveLengthMismatch {
                expected: sum.len(),
                actual: values.len(),
            }),
            Some(Err((expected, actual))) => {
                Err(Error::CollectiveLengthMismatch { expected, actual })
            }
            None => Err(Error::Collective {
                message: "reduction round finished without a result".to_string(),
            }),
        }
    }
}
