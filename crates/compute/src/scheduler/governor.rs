//! Per-task rescheduling policy.
//!
//! Only resource exhaustion is ever retried. Every other failure is final on
//! the spot, whatever attempt budget remains.

use std::collections::HashMap;

use tracing::{debug, info};
use vtg_core::{ReschedulingConfig, ResourceLimits};

use super::task::TaskId;
use super::types::{ExhaustedResource, FinalStatus, Solution, SolutionStatus};

/// Monotone limit escalation bounded by an absolute ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationPolicy {
    pub defaults: ResourceLimits,
    pub ceiling: ResourceLimits,
    pub memory_factor: f64,
    pub time_factor: f64,
    /// Total attempts, the first one included.
    pub max_attempts: u32,
}

impl EscalationPolicy {
    pub fn new(defaults: ResourceLimits, config: &ReschedulingConfig) -> Self {
        Self {
            defaults,
            ceiling: config.ceiling,
            memory_factor: config.memory_factor,
            time_factor: config.time_factor,
            max_attempts: config.max_attempts,
        }
    }

    /// Limits for the next attempt after `current` ran out of `resource`.
    ///
    /// Only the exhausted axis grows. CPU time exhaustion also lifts wall time
    /// so the backend does not kill the task on the other clock first. The
    /// result never drops below `current` on any axis.
    pub fn escalate(&self, current: &ResourceLimits, resource: ExhaustedResource) -> ResourceLimits {
        let mut next = *current;
        match resource {
            ExhaustedResource::Memory => {
                next.memory_size = scale(current.memory_size, self.memory_factor);
            }
            ExhaustedResource::CpuTime => {
                next.cpu_time = scale(current.cpu_time, self.time_factor);
                next.wall_time = next.wall_time.max(next.cpu_time);
            }
            ExhaustedResource::WallTime => {
                next.wall_time = scale(current.wall_time, self.time_factor);
            }
        }
        let capped = next.capped_by(&self.ceiling);
        ResourceLimits {
            memory_size: capped.memory_size.max(current.memory_size),
            cpu_time: capped.cpu_time.max(current.cpu_time),
            wall_time: capped.wall_time.max(current.wall_time),
            cpu_cores: capped.cpu_cores.max(current.cpu_cores),
        }
    }
}

fn scale(value: u64, factor: f64) -> u64 {
    let scaled = (value as f64 * factor).ceil();
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}

/// What the orchestrator should do after a solution was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The task reached a terminal state.
    Final(FinalStatus),
    /// The task exhausted a resource and has attempts left.
    Reschedulable,
}

#[derive(Debug, Clone)]
struct TaskRecord {
    attempt: u32,
    limits: ResourceLimits,
    history: Vec<SolutionStatus>,
    finalized: Option<FinalStatus>,
}

/// Owns attempt bookkeeping for every task of the run.
///
/// Only ever called from the orchestrator loop, so it holds no locks.
#[derive(Debug)]
pub struct ResourceGovernor {
    policy: EscalationPolicy,
    records: HashMap<TaskId, TaskRecord>,
    rescheduled: usize,
}

impl ResourceGovernor {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            records: HashMap::new(),
            rescheduled: 0,
        }
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// Limits for the task's next attempt. Attempt 0 uses the defaults.
    pub fn resource_limits(&mut self, task: &TaskId) -> ResourceLimits {
        let defaults = self.policy.defaults;
        self.records
            .entry(task.clone())
            .or_insert_with(|| TaskRecord {
                attempt: 0,
                limits: defaults,
                history: Vec::new(),
                finalized: None,
            })
            .limits
    }

    /// Current attempt number of a task (0 when unknown).
    pub fn attempt(&self, task: &TaskId) -> u32 {
        self.records.get(task).map(|r| r.attempt).unwrap_or(0)
    }

    /// Every status recorded for a task, oldest first.
    pub fn history(&self, task: &TaskId) -> &[SolutionStatus] {
        self.records
            .get(task)
            .map(|r| r.history.as_slice())
            .unwrap_or_default()
    }

    /// Number of reschedulings granted so far.
    pub fn rescheduled(&self) -> usize {
        self.rescheduled
    }

    /// Record the outcome of the task's current attempt.
    pub fn add_solution(&mut self, task: &TaskId, solution: &Solution) -> Verdict {
        self.resource_limits(task);
        let max_attempts = self.policy.max_attempts;
        let Some(record) = self.records.get_mut(task) else {
            return Verdict::Final(FinalStatus::Failed);
        };
        record.history.push(solution.status);

        let verdict = match solution.status {
            SolutionStatus::Finished => Verdict::Final(FinalStatus::Finished),
            SolutionStatus::ResourceExhausted { .. } if record.attempt + 1 < max_attempts => {
                Verdict::Reschedulable
            }
            _ => Verdict::Final(FinalStatus::Failed),
        };
        if let Verdict::Final(status) = verdict {
            record.finalized = Some(status);
        }
        debug!(
            task = %task,
            attempt = record.attempt,
            status = ?solution.status,
            verdict = ?verdict,
            "Solution recorded"
        );
        verdict
    }

    /// Advance a resource-exhausted task to its next attempt.
    ///
    /// Returns the new attempt number with escalated limits in place, or
    /// `None` when no attempt is left. A task refused here is permanently
    /// failed and must not be resubmitted.
    pub fn do_rescheduling(&mut self, task: &TaskId) -> Option<u32> {
        let record = self.records.get_mut(task)?;
        if record.finalized.is_some() {
            return None;
        }
        let resource = match record.history.last() {
            Some(SolutionStatus::ResourceExhausted { resource }) => *resource,
            _ => {
                record.finalized = Some(FinalStatus::Failed);
                return None;
            }
        };
        if record.attempt + 1 >= self.policy.max_attempts {
            record.finalized = Some(FinalStatus::Failed);
            return None;
        }

        record.attempt += 1;
        record.limits = self.policy.escalate(&record.limits, resource);
        self.rescheduled += 1;
        info!(
            task = %task,
            attempt = record.attempt,
            limits = %record.limits,
            "Rescheduling task with escalated limits"
        );
        Some(record.attempt)
    }

    /// Drop the bookkeeping of a terminal task.
    pub fn forget(&mut self, task: &TaskId) {
        self.records.remove(task);
    }
}
