use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Resource axis a backend reported as exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustedResource {
    Memory,
    CpuTime,
    WallTime,
}

/// Outcome kind of one scheduled attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SolutionStatus {
    Finished,
    Failed,
    ResourceExhausted { resource: ExhaustedResource },
    Crashed,
}

impl SolutionStatus {
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, SolutionStatus::ResourceExhausted { .. })
    }
}

/// Outcome of one scheduled attempt as reported by the scheduler session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    #[serde(flatten)]
    pub status: SolutionStatus,
    /// Backend-specific details, passed through untouched.
    #[serde(default)]
    pub diagnostics: Value,
    #[serde(default = "Utc::now")]
    pub reported_at: DateTime<Utc>,
}

impl Solution {
    pub fn new(status: SolutionStatus) -> Self {
        Self {
            status,
            diagnostics: Value::Null,
            reported_at: Utc::now(),
        }
    }

    pub fn finished() -> Self {
        Self::new(SolutionStatus::Finished)
    }

    pub fn exhausted(resource: ExhaustedResource) -> Self {
        Self::new(SolutionStatus::ResourceExhausted { resource })
    }

    /// A pipeline stage failed before anything was submitted.
    pub fn stage_failed(reason: impl Into<String>) -> Self {
        Self {
            diagnostics: json!({ "stage error": reason.into() }),
            ..Self::new(SolutionStatus::Failed)
        }
    }

    /// The worker itself died or was aborted.
    pub fn crashed(reason: impl Into<String>) -> Self {
        Self {
            diagnostics: json!({ "worker error": reason.into() }),
            ..Self::new(SolutionStatus::Crashed)
        }
    }
}

/// Terminal status reported to the progress sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    Finished,
    Failed,
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalStatus::Finished => f.write_str("finished"),
            FinalStatus::Failed => f.write_str("failed"),
        }
    }
}
