use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource limits applied to a single verification attempt.
///
/// Every axis is enforced by the backend that solves the task; the scheduling
/// core only chooses the numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory size in bytes.
    #[serde(default = "default_memory_size")]
    pub memory_size: u64,
    /// CPU time in seconds.
    #[serde(default = "default_cpu_time")]
    pub cpu_time: u64,
    /// Wall time in seconds.
    #[serde(default = "default_wall_time")]
    pub wall_time: u64,
    /// Number of CPU cores.
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: u32,
}

fn default_memory_size() -> u64 { 1_000_000_000 }
fn default_cpu_time() -> u64 { 900 }
fn default_wall_time() -> u64 { 1800 }
fn default_cpu_cores() -> u32 { 1 }

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_size: default_memory_size(),
            cpu_time: default_cpu_time(),
            wall_time: default_wall_time(),
            cpu_cores: default_cpu_cores(),
        }
    }
}

impl ResourceLimits {
    /// Default ceiling used when the configuration does not name one.
    pub fn default_ceiling() -> Self {
        Self {
            memory_size: 8_000_000_000,
            cpu_time: 3600,
            wall_time: 7200,
            cpu_cores: 4,
        }
    }

    /// True when no axis of `self` is below the matching axis of `other`.
    pub fn dominates(&self, other: &ResourceLimits) -> bool {
        self.memory_size >= other.memory_size
            && self.cpu_time >= other.cpu_time
            && self.wall_time >= other.wall_time
            && self.cpu_cores >= other.cpu_cores
    }

    /// Clamp every axis to `ceiling`.
    pub fn capped_by(&self, ceiling: &ResourceLimits) -> Self {
        Self {
            memory_size: self.memory_size.min(ceiling.memory_size),
            cpu_time: self.cpu_time.min(ceiling.cpu_time),
            wall_time: self.wall_time.min(ceiling.wall_time),
            cpu_cores: self.cpu_cores.min(ceiling.cpu_cores),
        }
    }
}

/// Ceiling table as written in the configuration; absent axes fall back to
/// [`ResourceLimits::default_ceiling`], not to first-attempt limits.
#[derive(Deserialize)]
struct CeilingTable {
    memory_size: Option<u64>,
    cpu_time: Option<u64>,
    wall_time: Option<u64>,
    cpu_cores: Option<u32>,
}

/// `deserialize_with` helper for ceiling fields.
pub fn deserialize_ceiling<'de, D>(deserializer: D) -> Result<ResourceLimits, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let table = CeilingTable::deserialize(deserializer)?;
    let base = ResourceLimits::default_ceiling();
    Ok(ResourceLimits {
        memory_size: table.memory_size.unwrap_or(base.memory_size),
        cpu_time: table.cpu_time.unwrap_or(base.cpu_time),
        wall_time: table.wall_time.unwrap_or(base.wall_time),
        cpu_cores: table.cpu_cores.unwrap_or(base.cpu_cores),
    })
}

impl fmt::Display for ResourceLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mem={}MB cpu={}s wall={}s cores={}",
            self.memory_size / 1_000_000,
            self.cpu_time,
            self.wall_time,
            self.cpu_cores
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_dominates_defaults() {
        assert!(ResourceLimits::default_ceiling().dominates(&ResourceLimits::default()));
        assert!(!ResourceLimits::default().dominates(&ResourceLimits::default_ceiling()));
    }

    #[test]
    fn capped_by_clamps_each_axis() {
        let big = ResourceLimits {
            memory_size: 10_000_000_000,
            cpu_time: 100,
            wall_time: 10_000,
            cpu_cores: 8,
        };
        let capped = big.capped_by(&ResourceLimits::default_ceiling());
        assert_eq!(capped.memory_size, 8_000_000_000);
        assert_eq!(capped.cpu_time, 100);
        assert_eq!(capped.wall_time, 7200);
        assert_eq!(capped.cpu_cores, 4);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let limits: ResourceLimits = toml::from_str("memory_size = 2000000000").unwrap();
        assert_eq!(limits.memory_size, 2_000_000_000);
        assert_eq!(limits.cpu_time, 900);
        assert_eq!(limits.cpu_cores, 1);
    }

    #[test]
    fn display_is_compact() {
        let s = ResourceLimits::default().to_string();
        assert_eq!(s, "mem=1000MB cpu=900s wall=1800s cores=1");
    }
}
