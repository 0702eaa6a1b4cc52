//! Step-scheduled profiling

use runtime_core::Profiler;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Wait, warmup and active phase lengths in steps, repeated `repeat` times.
/// A `repeat` of 0 cycles forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSchedule {
    pub wait: u64,
    pub warmup: u64,
    pub active: u64,
    pub repeat: u64,
}

impl Default for ProfileSchedule {
    fn default() -> Self {
        Self {
            wait: 1,
            warmup: 2,
            active: 3,
            repeat: 1,
        }
    }
}

/// Where the profiler sits in its schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilePhase {
    Waiting,
    WarmingUp,
    Recording,
    Finished,
}

impl ProfileSchedule {
    fn cycle_len(&self) -> u64 {
        self.wait + self.warmup + self.active
    }

    /// Phase after `steps` profiler steps
    pub fn phase_at(&self, steps: u64) -> ProfilePhase {
        let cycle = self.cycle_len();
        if cycle == 0 || (self.repeat > 0 && steps >= cycle * self.repeat) {
            return ProfilePhase::Finished;
        }
        let offset = steps % cycle;
        if offset < self.wait {
            ProfilePhase::Waiting
        } else if offset < self.wait + self.warmup {
            ProfilePhase::WarmingUp
        } else {
            ProfilePhase::Recording
        }
    }
}

/// Receives the boundaries of each recording window; owns the trace format
pub trait TraceRecorder: Send + Sync {
    fn start(&mut self, cycle: u64);

    fn stop(&mut self, cycle: u64);
}

/// [`Profiler`] driving a [`TraceRecorder`] through a [`ProfileSchedule`]
pub struct ScheduledProfiler<R> {
    schedule: ProfileSchedule,
    recorder: R,
    steps: u64,
}

impl<R: TraceRecorder> ScheduledProfiler<R> {
    pub fn new(schedule: ProfileSchedule, recorder: R) -> Self {
        Self {
            schedule,
            recorder,
            steps: 0,
        }
    }

    pub fn phase(&self) -> ProfilePhase {
        self.schedule.phase_at(self.steps)
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// Cycle whose recording window covers `steps`, if any
    fn window_at(&self, steps: u64) -> Option<u64> {
        (self.schedule.phase_at(steps) == ProfilePhase::Recording)
            .then(|| steps / self.schedule.cycle_len().max(1))
    }
}

impl<R: TraceRecorder> Profiler for ScheduledProfiler<R> {
    fn step(&mut self) {
        // a schedule without wait or warmup records from the very first step
        if self.steps == 0 {
            if let Some(cycle) = self.window_at(0) {
                debug!(cycle = cycle, step = 0u64, "Profiler recording started");
                self.recorder.start(cycle);
            }
        }

        let before = self.window_at(self.steps);
        self.steps += 1;
        let after = self.window_at(self.steps);
        if before == after {
            return;
        }

        if let Some(cycle) = before {
            debug!(cycle = cycle, step = self.steps, "Profiler recording stopped");
            self.recorder.stop(cycle);
        }
        if let Some(cycle) = after {
            debug!(cycle = cycle, step = self.steps, "Profiler recording started");
            self.recorder.start(cycle);
        }
    }
}
