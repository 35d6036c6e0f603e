use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use vtg_core::FragmentSet;

use crate::scheduler::error::GenerationError;
use crate::scheduler::factory::AbstractTaskFactory;
use crate::scheduler::governor::Verdict;
use crate::scheduler::metrics::{ABSTRACT_KIND, TASK_KIND};
use crate::scheduler::pool::{WorkPool, WorkerContext};
use crate::scheduler::report::{GenerationReport, TaskOutcome};
use crate::scheduler::task::{AbstractTask, Completion, EnvModel, Task, TaskId, WorkItem};
use crate::scheduler::types::{FinalStatus, Solution};

use super::scheduling::RunState;
use super::Orchestrator;

impl Orchestrator {
    /// Generate and schedule every task for `fragments`. Returns once every
    /// requirement of every fragment has a terminal status.
    pub async fn run_fragments(
        &self,
        fragments: FragmentSet,
    ) -> Result<GenerationReport, GenerationError> {
        tokio::fs::create_dir_all(self.paths.root()).await?;

        let scheduling = &self.config.scheduling;
        let mut state = RunState::new(self.governor(), &self.config.sub_job_id);
        self.build_backlog(&fragments, &mut state);
        if self.config.single_environment_model_per_fragment {
            let total = fragments.len() * self.classes.total_requirements();
            self.report_total(&mut state, total);
        }
        if state.is_done() {
            self.report_total(&mut state, 0);
            state.report.metrics.finish();
            return Ok(state.report);
        }

        let capacity = scheduling.max_solving_tasks;
        let (pending_tx, pending_rx) = mpsc::channel(capacity);
        let (results_tx, mut results_rx) = mpsc::channel(capacity);
        let ctx = Arc::new(WorkerContext {
            factory: AbstractTaskFactory::new(Arc::clone(&self.registry), self.paths.clone()),
            registry: Arc::clone(&self.registry),
            session: Arc::clone(&self.session),
            classes: Arc::clone(&self.classes),
            paths: self.paths.clone(),
            solution_poll_interval: scheduling.solution_poll_interval(),
            shutdown: self.shutdown.clone(),
        });
        let pool = WorkPool::start(
            scheduling.resolved_parallelism(),
            ctx,
            pending_rx,
            results_tx,
        );
        info!(
            sub_job = %self.config.sub_job_id,
            workers = pool.size(),
            max_solving_tasks = capacity,
            "Generation started"
        );

        let poll = scheduling.poll_interval();
        let mut workers_lost = false;
        loop {
            if self.shutdown.is_triggered() {
                break;
            }
            for refused in self.admit(&mut state, &pending_tx) {
                self.on_completion(&mut state, refused).await;
            }
            if state.is_done() {
                break;
            }

            tokio::select! {
                _ = self.shutdown.notified() => break,
                received = timeout(poll, results_rx.recv()) => match received {
                    Ok(Some(completion)) => {
                        self.on_completion(&mut state, completion).await;
                        while let Ok(completion) = results_rx.try_recv() {
                            self.on_completion(&mut state, completion).await;
                        }
                    }
                    Ok(None) => {
                        error!("Every worker exited while items were still in flight");
                        workers_lost = true;
                        break;
                    }
                    Err(_) => {
                        debug!(
                            in_flight = state.in_flight.len(),
                            backlog = state.backlog.len(),
                            retries = state.retry_backlog.len(),
                            busy = pool.busy(),
                            "Waiting for completions"
                        );
                    }
                },
            }
        }

        if state.is_done() && !workers_lost {
            drop(pending_tx);
            pool.join().await;
        } else {
            self.cancel(&mut state, pending_tx, &mut results_rx, pool).await;
        }

        let total = state.expected_total;
        self.report_total(&mut state, total);
        state.report.metrics.finish();
        let report = state.report;
        info!(
            abstract_tasks = report.abstract_tasks,
            env_models = report.env_models,
            tasks = report.tasks_constructed,
            finished = report.finished,
            failed = report.failed,
            rescheduled = report.rescheduled,
            cancelled = report.cancelled,
            "Generation finished"
        );
        Ok(report)
    }

    /// Stop admitting, give in-flight workers the grace period, then abort
    /// them and fail everything that did not reach a terminal status.
    async fn cancel(
        &self,
        state: &mut RunState,
        pending_tx: mpsc::Sender<WorkItem>,
        results_rx: &mut mpsc::Receiver<Completion>,
        pool: WorkPool,
    ) {
        state.cancelling = true;
        state.report.cancelled = true;
        warn!(
            in_flight = state.in_flight.len(),
            backlog = state.backlog.len() + state.retry_backlog.len(),
            "Generation cancelled, draining in-flight items"
        );
        drop(pending_tx);

        let deadline = Instant::now() + self.config.scheduling.shutdown_grace();
        while !state.in_flight.is_empty() {
            match timeout_at(deadline, results_rx.recv()).await {
                Ok(Some(completion)) => self.on_completion(state, completion).await,
                Ok(None) | Err(_) => break,
            }
        }

        pool.abort().await;
        while let Ok(completion) = results_rx.try_recv() {
            self.on_completion(state, completion).await;
        }

        let stranded: Vec<WorkItem> = state.in_flight.values().map(|f| f.item.clone()).collect();
        for item in stranded {
            let completion = Completion::failed(item, "aborted after shutdown grace period");
            self.on_completion(state, completion).await;
        }

        let leftover: Vec<WorkItem> = state
            .backlog
            .drain(..)
            .chain(state.retry_backlog.drain(..))
            .collect();
        for item in leftover {
            match item {
                WorkItem::Abstract(task) => {
                    self.on_abstract(state, task, Err("cancelled before admission".into()))
                        .await;
                }
                WorkItem::Task(task) => {
                    let attempts = task.attempt;
                    self.finish_task(state, &task, FinalStatus::Failed, attempts)
                        .await;
                }
            }
        }
    }

    pub(super) async fn on_completion(&self, state: &mut RunState, completion: Completion) {
        let key = completion.key();
        let Some(admitted) = state.in_flight.remove(&key) else {
            error!(key = ?key, "Completion for an item that is not in flight, ignoring");
            return;
        };

        match completion {
            Completion::Abstract { task, models } => {
                state
                    .report
                    .metrics
                    .record_completion(ABSTRACT_KIND, admitted.admitted.elapsed());
                self.on_abstract(state, task, models).await;
            }
            Completion::Task { task, solution } => {
                state
                    .report
                    .metrics
                    .record_completion(TASK_KIND, admitted.admitted.elapsed());
                self.on_task(state, task, solution).await;
            }
        }
    }

    /// Fan an abstract task out into one task per (model, requirement), or
    /// fail the whole class on this fragment when no model exists.
    async fn on_abstract(
        &self,
        state: &mut RunState,
        task: AbstractTask,
        models: Result<Vec<EnvModel>, String>,
    ) {
        state.pending_abstract = state.pending_abstract.saturating_sub(1);
        state.report.abstract_tasks += 1;

        let Some(class) = self.classes.get(&task.id.class_key) else {
            error!(task = %task.id, "Abstract task refers to an unknown requirement class");
            return;
        };

        let models = match models {
            Ok(models) if !models.is_empty() => models,
            outcome => {
                match outcome {
                    Err(reason) => warn!(task = %task.id, reason = %reason, "Abstract task failed"),
                    Ok(_) => warn!(task = %task.id, "No environment models, every requirement fails"),
                }
                state.expected_total += class.len();
                for requirement in class.requirement_ids() {
                    self.record_outcome(
                        state,
                        TaskOutcome {
                            fragment: task.id.fragment.clone(),
                            class_key: task.id.class_key.clone(),
                            env_model: None,
                            requirement: requirement.to_string(),
                            status: FinalStatus::Failed,
                            attempts: 0,
                        },
                    );
                }
                self.release(&self.paths.abstract_dir(&task.id)).await;
                self.after_abstract(state);
                return;
            }
        };

        let tasks = models.len() * class.len();
        state.report.env_models += models.len();
        state.report.tasks_constructed += tasks;
        state.expected_total += tasks;
        state.open_tasks.insert(task.id.clone(), tasks);

        for model in &models {
            for requirement in class.requirement_ids() {
                let id = TaskId {
                    fragment: task.id.fragment.clone(),
                    class_key: task.id.class_key.clone(),
                    env_model: model.id.clone(),
                    requirement: requirement.to_string(),
                };
                let limits = state.governor.resource_limits(&id);
                state.backlog.push_back(WorkItem::Task(Task {
                    id,
                    attempt: 0,
                    limits,
                    model_artifact: model.artifact.clone(),
                }));
            }
        }
        debug!(task = %task.id, models = models.len(), tasks, "Tasks constructed");
        self.after_abstract(state);
    }

    fn after_abstract(&self, state: &mut RunState) {
        if state.pending_abstract == 0 {
            let total = state.expected_total;
            self.report_total(state, total);
        }
    }

    async fn on_task(&self, state: &mut RunState, task: Task, solution: Solution) {
        let status = match state.governor.add_solution(&task.id, &solution) {
            Verdict::Final(status) => status,
            Verdict::Reschedulable if state.cancelling => FinalStatus::Failed,
            Verdict::Reschedulable => match state.governor.do_rescheduling(&task.id) {
                Some(attempt) => {
                    let limits = state.governor.resource_limits(&task.id);
                    state.report.rescheduled += 1;
                    self.enqueue_retry(
                        state,
                        WorkItem::Task(Task {
                            attempt,
                            limits,
                            ..task
                        }),
                    );
                    return;
                }
                None => FinalStatus::Failed,
            },
        };
        let attempts = task.attempt + 1;
        self.finish_task(state, &task, status, attempts).await;
    }

    /// Record the terminal status of a task and release what it held.
    async fn finish_task(&self, state: &mut RunState, task: &Task, status: FinalStatus, attempts: u32) {
        self.record_outcome(
            state,
            TaskOutcome {
                fragment: task.id.fragment.clone(),
                class_key: task.id.class_key.clone(),
                env_model: Some(task.id.env_model.clone()),
                requirement: task.id.requirement.clone(),
                status,
                attempts,
            },
        );
        state.governor.forget(&task.id);
        self.release(&self.paths.task_dir(&task.id)).await;

        let abstract_id = task.id.abstract_id();
        if let Some(open) = state.open_tasks.get_mut(&abstract_id) {
            *open = open.saturating_sub(1);
            if *open == 0 {
                state.open_tasks.remove(&abstract_id);
                debug!(task = %abstract_id, "Every task of the abstract task is terminal");
                self.release(&self.paths.abstract_dir(&abstract_id)).await;
            }
        }
    }

    fn record_outcome(&self, state: &mut RunState, outcome: TaskOutcome) {
        self.progress
            .task_completed(&self.config.sub_job_id, &outcome.requirement, outcome.status);
        state.report.record(outcome);
    }

    /// Remove a working directory unless intermediate files are kept.
    async fn release(&self, dir: &Path) {
        if self.config.keep_intermediate_files {
            return;
        }
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove working directory"),
        }
    }
}
