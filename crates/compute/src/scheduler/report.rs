use serde::Serialize;

use super::metrics::GenerationMetrics;
use super::types::FinalStatus;

/// Terminal status of one requirement on one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub fragment: String,
    pub class_key: String,
    /// `None` when no environment model was generated.
    pub env_model: Option<String>,
    pub requirement: String,
    pub status: FinalStatus,
    /// Attempts actually scheduled (0 when nothing was submitted).
    pub attempts: u32,
}

/// Summary of a generation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationReport {
    pub sub_job: String,
    /// Abstract tasks that reached completion.
    pub abstract_tasks: usize,
    pub env_models: usize,
    pub tasks_constructed: usize,
    pub finished: usize,
    pub failed: usize,
    pub rescheduled: usize,
    /// Total reported to the progress sink, once known.
    pub total_reported: Option<usize>,
    pub cancelled: bool,
    pub outcomes: Vec<TaskOutcome>,
    pub metrics: GenerationMetrics,
}

impl GenerationReport {
    pub fn new(sub_job: impl Into<String>) -> Self {
        Self {
            sub_job: sub_job.into(),
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, outcome: TaskOutcome) {
        match outcome.status {
            FinalStatus::Finished => self.finished += 1,
            FinalStatus::Failed => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Outcomes of one requirement on one fragment, one per environment model.
    pub fn outcomes_for<'a>(
        &'a self,
        fragment: &'a str,
        requirement: &'a str,
    ) -> impl Iterator<Item = &'a TaskOutcome> + 'a {
        self.outcomes
            .iter()
            .filter(move |o| o.fragment == fragment && o.requirement == requirement)
    }

    /// Number of terminal statuses reported.
    pub fn terminal(&self) -> usize {
        self.finished + self.failed
    }
}
