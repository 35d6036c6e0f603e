use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::types::FinalStatus;

/// Fire-and-forget sink for sub-job progress. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    /// Expected number of tasks of the sub-job.
    fn total_tasks(&self, sub_job: &str, total: usize);

    /// One requirement reached its terminal status for one fragment.
    fn task_completed(&self, sub_job: &str, requirement: &str, status: FinalStatus);
}

/// Events produced by [`ChannelProgress`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Total {
        sub_job: String,
        total: usize,
    },
    Completed {
        sub_job: String,
        requirement: String,
        status: FinalStatus,
    },
}

/// Forwards progress into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("Progress receiver dropped, event discarded");
        }
    }
}

impl ProgressSink for ChannelProgress {
    fn total_tasks(&self, sub_job: &str, total: usize) {
        self.send(ProgressEvent::Total {
            sub_job: sub_job.to_string(),
            total,
        });
    }

    fn task_completed(&self, sub_job: &str, requirement: &str, status: FinalStatus) {
        self.send(ProgressEvent::Completed {
            sub_job: sub_job.to_string(),
            requirement: requirement.to_string(),
            status,
        });
    }
}

/// Reports progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn total_tasks(&self, sub_job: &str, total: usize) {
        info!(sub_job, total, "Total number of tasks");
    }

    fn task_completed(&self, sub_job: &str, requirement: &str, status: FinalStatus) {
        info!(sub_job, requirement, %status, "Task completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_progress_forwards_events() {
        let (sink, mut rx) = ChannelProgress::channel();
        sink.total_tasks("sj", 4);
        sink.task_completed("sj", "kernel:locking", FinalStatus::Finished);

        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Total { sub_job: "sj".into(), total: 4 }
        );
        match rx.try_recv().unwrap() {
            ProgressEvent::Completed { requirement, status, .. } => {
                assert_eq!(requirement, "kernel:locking");
                assert_eq!(status, FinalStatus::Finished);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn dropped_receiver_does_not_block_or_panic() {
        let (sink, rx) = ChannelProgress::channel();
        drop(rx);
        sink.task_completed("sj", "r", FinalStatus::Failed);
    }
}
