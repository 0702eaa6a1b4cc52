//! Hardware capability probes

use runtime_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum accelerator platform version for bf16
pub const MIN_PLATFORM_VERSION: Version = Version::new(11, 0);

/// Minimum collective-library version for bf16 reductions
pub const MIN_COLLECTIVE_VERSION: Version = Version::new(2, 10);

/// Compute capability from which accelerators support bf16
pub const MIN_BF16_COMPUTE_CAPABILITY: Version = Version::new(8, 0);

pub const PLATFORM_VERSION_VAR: &str = "CUDA_VERSION";
pub const COLLECTIVE_VERSION_VAR: &str = "NCCL_VERSION";
pub const COMPUTE_CAPABILITY_VAR: &str = "GPU_COMPUTE_CAPABILITY";

/// `major.minor` version; trailing components are ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = |reason: &str| Error::Probe {
            probe: "version".to_string(),
            message: format!("cannot parse {:?}: {}", s, reason),
        };

        let mut parts = s.trim().split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| bad("empty"))?
            .parse::<u32>()
            .map_err(|e| bad(&e.to_string()))?;
        let minor = match parts.next() {
            Some(p) => p.parse::<u32>().map_err(|e| bad(&e.to_string()))?,
            None => 0,
        };

        Ok(Self { major, minor })
    }
}

/// Runtime questions the policy selector asks about the host.
///
/// Every probe may fail; the selector treats a failure as "capability absent".
pub trait HardwareProbe {
    /// Whether the accelerator can compute in bf16
    fn bf16_supported(&self) -> Result<bool>;

    /// Accelerator platform version, `None` when no accelerator platform exists
    fn platform_version(&self) -> Result<Option<Version>>;

    /// Collective-communication library version, `None` when unavailable
    fn collective_version(&self) -> Result<Option<Version>>;
}

/// Probe with fixed answers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticProbe {
    pub bf16: bool,
    pub platform: Option<Version>,
    pub collective: Option<Version>,
}

impl StaticProbe {
    /// A host that satisfies every bf16 requirement
    pub fn bf16_capable() -> Self {
        Self {
            bf16: true,
            platform: Some(Version::new(12, 1)),
            collective: Some(Version::new(2, 18)),
        }
    }

    /// A host with no accelerator at all
    pub fn cpu_only() -> Self {
        Self::default()
    }
}

impl HardwareProbe for StaticProbe {
    fn bf16_supported(&self) -> Result<bool> {
        Ok(self.bf16)
    }

    fn platform_version(&self) -> Result<Option<Version>> {
        Ok(self.platform)
    }

    fn collective_version(&self) -> Result<Option<Version>> {
        Ok(self.collective)
    }
}

/// Probe reading the version variables accelerator container images publish:
/// `CUDA_VERSION`, `NCCL_VERSION` and `GPU_COMPUTE_CAPABILITY`.
pub struct EnvProbe<F = fn(&str) -> Option<String>> {
    lookup: F,
}

impl EnvProbe {
    /// Probe the real process environment
    pub fn new() -> Self {
        Self {
            lookup: |var| std::env::var(var).ok(),
        }
    }
}

impl Default for EnvProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> EnvProbe<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Probe through an arbitrary lookup
    pub fn with_lookup(lookup: F) -> Self {
        Self { lookup }
    }

    fn version(&self, var: &str) -> Result<Option<Version>> {
        (self.lookup)(var)
            .map(|raw| {
                raw.parse::<Version>().map_err(|e| Error::Probe {
                    probe: var.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }
}

impl<F> HardwareProbe for EnvProbe<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn bf16_supported(&self) -> Result<bool> {
        Ok(self
            .version(COMPUTE_CAPABILITY_VAR)?
            .map(|cc| cc >= MIN_BF16_COMPUTE_CAPABILITY)
            .unwrap_or(false))
    }

    fn platform_version(&self) -> Result<Option<Version>> {
        self.version(PLATFORM_VERSION_VAR)
    }

    fn collective_version(&self) -> Result<Option<Version>> {
        self.version(COLLECTIVE_VERSION_VAR)
    }
}
