//! Plugin stage execution.
//!
//! Stages talk through files only: each one reads an abstract task
//! description, gets its options as a `<stage> conf.json` document and writes
//! a new description. Stage implementations are resolved once per run through
//! the [`StageRegistry`].

pub mod command;
pub mod registry;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use vtg_catalog::{StageKind, StageOptions};
use vtg_core::{CoreError, ResourceLimits};

use crate::scheduler::paths::stage_conf;

pub use self::command::CommandStage;
pub use self::registry::StageRegistry;

/// Error raised by a plugin stage. Always final for the item being processed.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("fragment error: {0}")]
    Fragment(#[from] CoreError),
    #[error("no runner registered for stage {0}")]
    NoRunner(StageKind),
    #[error("unknown stage \"{0}\" in plugin configuration")]
    UnknownStage(String),
    #[error("stage {stage} could not be started: {reason}")]
    Spawn { stage: StageKind, reason: String },
    #[error("stage {stage} exited with {status}")]
    Exit { stage: StageKind, status: String },
    #[error("stage {stage} produced no output at {}", .path.display())]
    MissingOutput { stage: StageKind, path: PathBuf },
    #[error("stage {stage} failed: {reason}")]
    Failed { stage: StageKind, reason: String },
}

/// Everything a stage needs to process one item.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub stage: StageKind,
    /// Options after template inheritance and requirement overrides.
    pub options: StageOptions,
    pub input: PathBuf,
    pub output: PathBuf,
    pub work_dir: PathBuf,
    /// Requirement the output is specialised for. `None` for shared stages.
    pub requirement: Option<String>,
    pub limits: Option<ResourceLimits>,
}

impl StageInvocation {
    /// Options document as written for the stage: configured options plus
    /// the per-task `solution class` and `override resource limits` entries.
    pub fn conf(&self) -> Value {
        let mut conf = self.options.clone();
        if let Some(requirement) = &self.requirement {
            conf.insert("solution class".into(), json!(requirement));
        }
        if let Some(limits) = &self.limits {
            conf.insert("override resource limits".into(), json!(limits));
        }
        Value::Object(conf)
    }

    pub fn conf_path(&self) -> PathBuf {
        self.work_dir.join(stage_conf(self.stage))
    }
}

/// A black-box plugin stage.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Process `invocation.input` into `invocation.output`.
    async fn run(&self, invocation: &StageInvocation) -> Result<(), StageError>;
}

/// Run one stage: write its options document, invoke the runner and check
/// that the output artifact exists.
pub async fn execute_stage(
    registry: &StageRegistry,
    invocation: &StageInvocation,
) -> Result<(), StageError> {
    let runner = registry.get(invocation.stage)?;
    tokio::fs::create_dir_all(&invocation.work_dir).await?;
    let conf = serde_json::to_vec_pretty(&invocation.conf())?;
    tokio::fs::write(invocation.conf_path(), conf).await?;

    debug!(
        stage = %invocation.stage,
        input = %invocation.input.display(),
        output = %invocation.output.display(),
        "Running stage"
    );
    runner.run(invocation).await?;

    if !exists(&invocation.output).await {
        return Err(StageError::MissingOutput {
            stage: invocation.stage,
            path: invocation.output.clone(),
        });
    }
    Ok(())
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}
