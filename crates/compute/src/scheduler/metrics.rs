use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Item kind label for abstract tasks.
pub const ABSTRACT_KIND: &str = "abstract";
/// Item kind label for concrete tasks.
pub const TASK_KIND: &str = "task";

/// Operational metrics of one generation run.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationMetrics {
    /// Completed items by kind.
    pub items_completed: HashMap<String, u64>,
    /// Average time from admission to completion by kind.
    pub avg_item_duration: HashMap<String, Duration>,
    /// Highest number of admitted items at once.
    pub peak_in_flight: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for GenerationMetrics {
    fn default() -> Self {
        Self {
            items_completed: HashMap::new(),
            avg_item_duration: HashMap::new(),
            peak_in_flight: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

impl GenerationMetrics {
    /// Record the completion of one item.
    pub fn record_completion(&mut self, kind: &str, duration: Duration) {
        let count = {
            let entry = self.items_completed.entry(kind.to_string()).or_default();
            *entry += 1;
            *entry
        };

        let prev_avg = self
            .avg_item_duration
            .get(kind)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_item_duration.insert(kind.to_string(), new_avg);
    }

    pub fn observe_in_flight(&mut self, in_flight: usize) {
        self.peak_in_flight = self.peak_in_flight.max(in_flight);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Wall time of the run, if it has finished.
    pub fn elapsed(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| end.signed_duration_since(self.started_at).to_std().ok())
    }
}
