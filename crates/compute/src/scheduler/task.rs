use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use vtg_core::ResourceLimits;

use super::types::Solution;

/// Shared-prefix unit of work: one (fragment, requirement class) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbstractTaskId {
    pub fragment: String,
    pub class_key: String,
}

impl AbstractTaskId {
    pub fn new(fragment: impl Into<String>, class_key: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            class_key: class_key.into(),
        }
    }
}

impl fmt::Display for AbstractTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.fragment, self.class_key)
    }
}

/// One concrete verification job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    pub fragment: String,
    pub class_key: String,
    pub env_model: String,
    pub requirement: String,
}

impl TaskId {
    pub fn abstract_id(&self) -> AbstractTaskId {
        AbstractTaskId::new(&self.fragment, &self.class_key)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.fragment, self.class_key, self.env_model, self.requirement
        )
    }
}

/// An environment model produced for an abstract task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvModel {
    pub id: String,
    /// Directory holding the model artifacts and derived task directories.
    pub dir: PathBuf,
    /// Abstract task description every derived task starts from.
    pub artifact: PathBuf,
}

/// An abstract task ready to be handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct AbstractTask {
    pub id: AbstractTaskId,
    /// Fragment descriptor produced by extraction.
    pub descriptor: PathBuf,
}

/// A concrete task at a specific attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    /// 0 for the first try.
    pub attempt: u32,
    pub limits: ResourceLimits,
    /// Shared environment model artifact, read-only for the task.
    pub model_artifact: PathBuf,
}

/// Item on the pending-work channel.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    Abstract(AbstractTask),
    Task(Task),
}

impl WorkItem {
    pub fn key(&self) -> ItemKey {
        match self {
            WorkItem::Abstract(a) => ItemKey::Abstract(a.id.clone()),
            WorkItem::Task(t) => ItemKey::Task(t.id.clone()),
        }
    }

    pub fn fragment(&self) -> &str {
        match self {
            WorkItem::Abstract(a) => &a.id.fragment,
            WorkItem::Task(t) => &t.id.fragment,
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Abstract(a) => write!(f, "abstract task {}", a.id),
            WorkItem::Task(t) => write!(f, "task {} (attempt {})", t.id, t.attempt),
        }
    }
}

/// Identity of an admitted work item. A task keeps its key across attempts,
/// so it can never be in flight twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKey {
    Abstract(AbstractTaskId),
    Task(TaskId),
}

/// Exactly one completion is produced per accepted work item.
#[derive(Debug, Clone)]
pub enum Completion {
    Abstract {
        task: AbstractTask,
        /// Generated models, or the reason generation failed.
        models: Result<Vec<EnvModel>, String>,
    },
    Task {
        task: Task,
        solution: Solution,
    },
}

impl Completion {
    /// Synthetic failure for an item whose worker could not report.
    pub fn failed(item: WorkItem, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match item {
            WorkItem::Abstract(task) => Completion::Abstract {
                task,
                models: Err(reason),
            },
            WorkItem::Task(task) => Completion::Task {
                task,
                solution: Solution::crashed(reason),
            },
        }
    }

    pub fn key(&self) -> ItemKey {
        match self {
            Completion::Abstract { task, .. } => ItemKey::Abstract(task.id.clone()),
            Completion::Task { task, .. } => ItemKey::Task(task.id.clone()),
        }
    }
}
