//! Fixed-size pool of workers draining the pending-work channel.
//!
//! Every item a worker takes off the channel yields exactly one completion
//! on the results channel, including when the item fails, panics or is
//! picked up after shutdown.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use vtg_catalog::RequirementClasses;

use crate::pipeline::{execute_stage, StageError, StageInvocation, StageRegistry};

use super::factory::AbstractTaskFactory;
use super::paths::{stage_output, WorkPaths, FINAL_TASK};
use super::runner::ShutdownHandle;
use super::session::{SchedulerSession, SessionError};
use super::task::{AbstractTask, Completion, EnvModel, Task, WorkItem};
use super::types::Solution;

/// Why a concrete task could not produce a solution.
#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("scheduler session: {0}")]
    Session(#[from] SessionError),
    #[error("requirement {requirement} is not a member of class {class_key}")]
    UnknownRequirement { requirement: String, class_key: String },
}

/// Read-only state shared by every worker.
pub struct WorkerContext {
    pub factory: AbstractTaskFactory,
    pub registry: Arc<StageRegistry>,
    pub session: Arc<dyn SchedulerSession>,
    pub classes: Arc<RequirementClasses>,
    pub paths: WorkPaths,
    pub solution_poll_interval: Duration,
    pub shutdown: ShutdownHandle,
}

pub struct WorkPool {
    workers: JoinSet<()>,
    size: usize,
    busy: Arc<AtomicUsize>,
}

impl WorkPool {
    /// Spawn `size` workers sharing one pending-work receiver.
    pub fn start(
        size: usize,
        ctx: Arc<WorkerContext>,
        pending: mpsc::Receiver<WorkItem>,
        results: mpsc::Sender<Completion>,
    ) -> Self {
        let size = size.max(1);
        let pending = Arc::new(Mutex::new(pending));
        let busy = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();
        for idx in 0..size {
            workers.spawn(worker_loop(
                idx,
                Arc::clone(&ctx),
                Arc::clone(&pending),
                results.clone(),
                Arc::clone(&busy),
            ));
        }
        info!(workers = size, "Work pool started");
        Self { workers, size, busy }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently processing an item.
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    /// Wait for every worker to exit. Workers exit once the pending channel
    /// is closed and drained.
    pub async fn join(mut self) {
        while let Some(res) = self.workers.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "Worker terminated abnormally");
            }
        }
        debug!("Work pool stopped");
    }

    /// Forcibly stop every worker. In-flight items produce no completion.
    pub async fn abort(mut self) {
        self.workers.abort_all();
        while self.workers.join_next().await.is_some() {}
        warn!("Work pool aborted");
    }
}

async fn worker_loop(
    idx: usize,
    ctx: Arc<WorkerContext>,
    pending: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    results: mpsc::Sender<Completion>,
    busy: Arc<AtomicUsize>,
) {
    loop {
        let item = {
            let mut rx = pending.lock().await;
            rx.recv().await
        };
        let Some(item) = item else {
            debug!(worker = idx, "Pending channel closed, worker exiting");
            break;
        };

        let completion = if ctx.shutdown.is_triggered() {
            Completion::failed(item, "cancelled before start")
        } else {
            busy.fetch_add(1, Ordering::Relaxed);
            debug!(worker = idx, item = %item, "Processing");
            let outcome = AssertUnwindSafe(process(&ctx, item.clone()))
                .catch_unwind()
                .await;
            busy.fetch_sub(1, Ordering::Relaxed);
            match outcome {
                Ok(completion) => completion,
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(worker = idx, item = %item, reason = %reason, "Worker panicked");
                    Completion::failed(item, format!("worker panicked: {reason}"))
                }
            }
        };

        if results.send(completion).await.is_err() {
            warn!(worker = idx, "Results channel closed, worker exiting");
            break;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn process(ctx: &WorkerContext, item: WorkItem) -> Completion {
    match item {
        WorkItem::Abstract(task) => {
            let models = generate(ctx, &task).await;
            Completion::Abstract { task, models }
        }
        WorkItem::Task(task) => {
            let solution = match solve(ctx, &task).await {
                Ok(solution) => solution,
                Err(WorkerError::Session(e)) => {
                    warn!(task = %task.id, error = %e, "Scheduler session failed");
                    Solution::crashed(e.to_string())
                }
                Err(e) => {
                    warn!(task = %task.id, attempt = task.attempt, error = %e, "Task pipeline failed");
                    Solution::stage_failed(e.to_string())
                }
            };
            Completion::Task { task, solution }
        }
    }
}

async fn generate(ctx: &WorkerContext, task: &AbstractTask) -> Result<Vec<EnvModel>, String> {
    let class = ctx
        .classes
        .get(&task.id.class_key)
        .ok_or_else(|| format!("unknown requirement class {}", task.id.class_key))?;
    ctx.factory.generate(task, class).await.map_err(|e| {
        warn!(task = %task.id, error = %e, "Environment model generation failed");
        e.to_string()
    })
}

/// Run the per-requirement stages, submit the result and wait for its solution.
async fn solve(ctx: &WorkerContext, task: &Task) -> Result<Solution, WorkerError> {
    let final_task = prepare(ctx, task).await?;
    let bundle = ctx.paths.attempt_dir(&task.id, task.attempt);
    let remote = ctx.session.schedule_task(&final_task, &bundle).await?;
    info!(task = %task.id, attempt = task.attempt, remote = %remote, "Task submitted");

    loop {
        if let Some(solution) = ctx.session.solution(&remote).await? {
            debug!(task = %task.id, status = ?solution.status, "Solution received");
            return Ok(solution);
        }
        tokio::time::sleep(ctx.solution_poll_interval).await;
    }
}

/// Produce the final task description of one attempt.
///
/// The first attempt runs every per-requirement stage starting from the
/// environment model. A rescheduled attempt re-runs only the last stage on
/// the previous attempt's final description with the escalated limits.
async fn prepare(ctx: &WorkerContext, task: &Task) -> Result<PathBuf, WorkerError> {
    let spec = ctx
        .classes
        .get(&task.id.class_key)
        .and_then(|class| class.member(&task.id.requirement))
        .ok_or_else(|| WorkerError::UnknownRequirement {
            requirement: task.id.requirement.clone(),
            class_key: task.id.class_key.clone(),
        })?;

    let dir = ctx.paths.attempt_dir(&task.id, task.attempt);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(StageError::from)?;

    let stages = spec.model_stages();
    let (stages, mut input) = if task.attempt == 0 {
        (stages, task.model_artifact.clone())
    } else {
        let last = stages.len().saturating_sub(1);
        let previous = ctx.paths.attempt_dir(&task.id, task.attempt - 1).join(FINAL_TASK);
        (&stages[last..], previous)
    };

    for stage in stages {
        let output = dir.join(stage_output(stage.name));
        let invocation = StageInvocation {
            stage: stage.name,
            options: stage.options.clone(),
            input,
            output: output.clone(),
            work_dir: dir.join(stage.name.dir_name()),
            requirement: Some(task.id.requirement.clone()),
            limits: Some(task.limits),
        };
        execute_stage(&ctx.registry, &invocation).await?;
        input = output;
    }

    let final_task = dir.join(FINAL_TASK);
    if input != final_task {
        tokio::fs::copy(&input, &final_task)
            .await
            .map_err(StageError::from)?;
    }
    Ok(final_task)
}
