use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use vtg_core::FragmentSet;

use crate::scheduler::governor::ResourceGovernor;
use crate::scheduler::report::GenerationReport;
use crate::scheduler::task::{AbstractTask, AbstractTaskId, Completion, ItemKey, WorkItem};

use super::Orchestrator;

/// An admitted item and when it was admitted.
pub(super) struct InFlight {
    pub item: WorkItem,
    pub admitted: Instant,
}

/// Bookkeeping of one run. Owned by the control loop alone.
pub(super) struct RunState {
    /// First attempts and abstract tasks, in admission order.
    pub backlog: VecDeque<WorkItem>,
    /// Rescheduled attempts held back until the backlog is drained.
    pub retry_backlog: VecDeque<WorkItem>,
    pub in_flight: HashMap<ItemKey, InFlight>,
    /// Abstract tasks whose completion has not been handled yet.
    pub pending_abstract: usize,
    /// Non-terminal tasks per abstract task.
    pub open_tasks: HashMap<AbstractTaskId, usize>,
    /// Terminal statuses this run will report, as known so far.
    pub expected_total: usize,
    pub governor: ResourceGovernor,
    pub report: GenerationReport,
    pub cancelling: bool,
}

impl RunState {
    pub fn new(governor: ResourceGovernor, sub_job: &str) -> Self {
        Self {
            backlog: VecDeque::new(),
            retry_backlog: VecDeque::new(),
            in_flight: HashMap::new(),
            pending_abstract: 0,
            open_tasks: HashMap::new(),
            expected_total: 0,
            governor,
            report: GenerationReport::new(sub_job),
            cancelling: false,
        }
    }

    /// Nothing left to admit, nothing in flight.
    pub fn is_done(&self) -> bool {
        self.backlog.is_empty()
            && self.retry_backlog.is_empty()
            && self.in_flight.is_empty()
            && self.pending_abstract == 0
    }

    fn next_admissible(&mut self) -> Option<WorkItem> {
        self.backlog
            .pop_front()
            .or_else(|| self.retry_backlog.pop_front())
    }
}

impl Orchestrator {
    /// Queue one abstract task per (fragment, requirement class) pair.
    pub(super) fn build_backlog(&self, fragments: &FragmentSet, state: &mut RunState) {
        if self.classes.is_empty() {
            for fragment in fragments.ids() {
                warn!(fragment, "No requirement specifications selected, skipping fragment");
            }
            return;
        }

        for fragment in fragments.ids() {
            let Some(descriptor) = fragments.descriptor_path(fragment) else {
                continue;
            };
            for class in self.classes.iter() {
                state.backlog.push_back(WorkItem::Abstract(AbstractTask {
                    id: AbstractTaskId::new(fragment, class.key()),
                    descriptor: descriptor.to_path_buf(),
                }));
                state.pending_abstract += 1;
            }
        }
        info!(
            fragments = fragments.len(),
            classes = self.classes.len(),
            abstract_tasks = state.pending_abstract,
            "Abstract tasks queued"
        );
    }

    /// Report the total number of terminal statuses to expect, once.
    pub(super) fn report_total(&self, state: &mut RunState, total: usize) {
        if state.report.total_reported.is_some() {
            return;
        }
        self.progress.total_tasks(&self.config.sub_job_id, total);
        state.report.total_reported = Some(total);
        info!(total, "Total number of tasks reported");
    }

    /// Queue a rescheduled attempt.
    pub(super) fn enqueue_retry(&self, state: &mut RunState, item: WorkItem) {
        if self.config.scheduling.defer_rescheduling {
            state.retry_backlog.push_back(item);
        } else {
            state.backlog.push_front(item);
        }
    }

    /// Move backlog items onto the pending channel while below the
    /// admission limit.
    ///
    /// Items the channel refuses because it is closed come back as failed
    /// completions for the caller to account for.
    pub(super) fn admit(
        &self,
        state: &mut RunState,
        pending: &mpsc::Sender<WorkItem>,
    ) -> Vec<Completion> {
        let max = self.config.scheduling.max_solving_tasks;
        let mut refused = Vec::new();

        while state.in_flight.len() < max {
            let Some(item) = state.next_admissible() else {
                break;
            };
            let key = item.key();
            match pending.try_send(item.clone()) {
                Ok(()) => {
                    debug!(item = %item, "Admitted");
                    let previous = state.in_flight.insert(
                        key,
                        InFlight {
                            item,
                            admitted: Instant::now(),
                        },
                    );
                    if let Some(previous) = previous {
                        error!(item = %previous.item, "Item admitted while already in flight");
                    }
                }
                Err(TrySendError::Full(item)) => {
                    state.backlog.push_front(item);
                    break;
                }
                Err(TrySendError::Closed(item)) => {
                    state.in_flight.insert(
                        key,
                        InFlight {
                            item: item.clone(),
                            admitted: Instant::now(),
                        },
                    );
                    refused.push(Completion::failed(item, "pending-work channel closed"));
                }
            }
        }

        state.report.metrics.observe_in_flight(state.in_flight.len());
        refused
    }
}
