use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::types::Solution;

/// Spooled task description file name.
const SPOOL_TASK: &str = "task.json";
/// File a backend drops next to the task once it is solved.
const SPOOL_SOLUTION: &str = "solution.json";
/// Records where the task's file bundle lives.
const SPOOL_BUNDLE: &str = "bundle";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown remote task {0}")]
    UnknownTask(RemoteTaskId),
    #[error("scheduler rejected the task: {0}")]
    Rejected(String),
}

/// Opaque identifier handed back by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteTaskId(pub String);

impl fmt::Display for RemoteTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Interface to the external scheduler that solves verification tasks.
#[async_trait]
pub trait SchedulerSession: Send + Sync {
    /// Submit a final task description together with its file bundle.
    async fn schedule_task(&self, task_desc: &Path, bundle: &Path) -> Result<RemoteTaskId, SessionError>;

    /// Solution of a submitted task, `None` while it is still being solved.
    async fn solution(&self, task: &RemoteTaskId) -> Result<Option<Solution>, SessionError>;
}

/// File based session: every task gets its own spool directory that a
/// backend picks up and answers with a `solution.json`.
#[derive(Debug, Clone)]
pub struct SpoolSession {
    root: PathBuf,
}

impl SpoolSession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn task_dir(&self, task: &RemoteTaskId) -> PathBuf {
        self.root.join(&task.0)
    }
}

#[async_trait]
impl SchedulerSession for SpoolSession {
    async fn schedule_task(&self, task_desc: &Path, bundle: &Path) -> Result<RemoteTaskId, SessionError> {
        let id = RemoteTaskId(Uuid::new_v4().to_string());
        let dir = self.task_dir(&id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::copy(task_desc, dir.join(SPOOL_TASK)).await?;
        tokio::fs::write(dir.join(SPOOL_BUNDLE), bundle.to_string_lossy().as_bytes()).await?;
        debug!(remote = %id, spool = %dir.display(), "Task spooled");
        Ok(id)
    }

    async fn solution(&self, task: &RemoteTaskId) -> Result<Option<Solution>, SessionError> {
        let dir = self.task_dir(task);
        if tokio::fs::metadata(&dir).await.is_err() {
            return Err(SessionError::UnknownTask(task.clone()));
        }
        match tokio::fs::read(dir.join(SPOOL_SOLUTION)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
