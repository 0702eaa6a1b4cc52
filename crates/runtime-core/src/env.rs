//! Process-group identity read from the launcher environment

use crate::{Device, Error, Rank, Result};

pub const WORLD_SIZE_VAR: &str = "WORLD_SIZE";
pub const RANK_VAR: &str = "RANK";
pub const LOCAL_RANK_VAR: &str = "LOCAL_RANK";

/// This worker's place in the process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistEnv {
    /// Global rank
    pub rank: Rank,

    /// Rank within the host, selects the accelerator
    pub local_rank: u32,

    /// Number of workers in the group
    pub world_size: u32,
}

impl DistEnv {
    /// Identity for a single-process run
    pub fn single() -> Self {
        Self {
            rank: 0,
            local_rank: 0,
            world_size: 1,
        }
    }

    /// Read the identity from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the identity through an arbitrary lookup.
    ///
    /// `WORLD_SIZE` is required; `RANK` and `LOCAL_RANK` default to 0.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let world_size = lookup(WORLD_SIZE_VAR).ok_or_else(|| Error::MissingEnv {
            var: WORLD_SIZE_VAR.to_string(),
        })?;
        let world_size = parse_var(WORLD_SIZE_VAR, &world_size)?;
        if world_size == 0 {
            return Err(Error::InvalidEnv {
                var: WORLD_SIZE_VAR.to_string(),
                value: "0".to_string(),
                reason: "world size must be at least 1".to_string(),
            });
        }

        let rank = match lookup(RANK_VAR) {
            Some(value) => parse_var(RANK_VAR, &value)?,
            None => 0,
        };
        let local_rank = match lookup(LOCAL_RANK_VAR) {
            Some(value) => parse_var(LOCAL_RANK_VAR, &value)?,
            None => 0,
        };

        if rank >= world_size {
            return Err(Error::InvalidEnv {
                var: RANK_VAR.to_string(),
                value: rank.to_string(),
                reason: format!("rank must be below world size {}", world_size),
            });
        }

        Ok(Self {
            rank,
            local_rank,
            world_size,
        })
    }

    /// Only the lowest rank performs logging and tracking side effects
    pub fn is_reporter(&self) -> bool {
        self.rank == 0
    }

    /// Compute device for this worker's batches
    pub fn device(&self) -> Device {
        Device::Accelerator(self.local_rank)
    }
}

fn parse_var(var: &str, value: &str) -> Result<u32> {
    value.trim().parse::<u32>().map_err(|e| Error::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
