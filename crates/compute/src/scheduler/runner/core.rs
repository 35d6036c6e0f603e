use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Notify};
use tracing::{info, warn};

use vtg_catalog::RequirementClasses;
use vtg_core::{FragmentSet, GenerationConfig};

use crate::pipeline::StageRegistry;
use crate::scheduler::error::GenerationError;
use crate::scheduler::governor::{EscalationPolicy, ResourceGovernor};
use crate::scheduler::paths::WorkPaths;
use crate::scheduler::progress::ProgressSink;
use crate::scheduler::report::GenerationReport;
use crate::scheduler::session::SchedulerSession;

/// Cooperative cancellation signal shared by the orchestrator, its workers
/// and whoever requests the shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            info!("Generation shutdown requested");
        }
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation has been requested.
    pub async fn notified(&self) {
        let notified = self.notify.notified();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

/// One-shot channel delivering the fragment set to [`Orchestrator::run`].
pub fn fragment_handshake() -> (oneshot::Sender<FragmentSet>, oneshot::Receiver<FragmentSet>) {
    oneshot::channel()
}

/// Single control loop of a generation run: turns fragments and requirement
/// classes into abstract tasks, fans them out into concrete tasks, bounds
/// admission and accounts for every terminal status.
pub struct Orchestrator {
    pub(super) config: GenerationConfig,
    pub(super) classes: Arc<RequirementClasses>,
    pub(super) registry: Arc<StageRegistry>,
    pub(super) session: Arc<dyn SchedulerSession>,
    pub(super) progress: Arc<dyn ProgressSink>,
    pub(super) paths: WorkPaths,
    pub(super) shutdown: ShutdownHandle,
}

impl Orchestrator {
    pub fn new(
        config: GenerationConfig,
        classes: RequirementClasses,
        registry: StageRegistry,
        session: Arc<dyn SchedulerSession>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let paths = WorkPaths::new(config.main_working_directory.clone());
        Self {
            config,
            classes: Arc::new(classes),
            registry: Arc::new(registry),
            session,
            progress,
            paths,
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn classes(&self) -> &RequirementClasses {
        &self.classes
    }

    pub fn paths(&self) -> &WorkPaths {
        &self.paths
    }

    /// Handle for cancelling a running generation from elsewhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Wait for the fragment set on `handshake`, then generate and schedule
    /// every task. Cancellation before the fragments arrive yields an empty,
    /// cancelled report.
    pub async fn run(
        &self,
        handshake: oneshot::Receiver<FragmentSet>,
    ) -> Result<GenerationReport, GenerationError> {
        let fragments = tokio::select! {
            received = handshake => received.map_err(|_| GenerationError::HandshakeDropped)?,
            _ = self.shutdown.notified() => {
                warn!("Shutdown requested before fragment descriptions arrived");
                let mut report = GenerationReport::new(&self.config.sub_job_id);
                report.cancelled = true;
                report.metrics.finish();
                return Ok(report);
            }
        };
        info!(fragments = fragments.len(), "Received fragment descriptions");
        self.run_fragments(fragments).await
    }

    pub(super) fn governor(&self) -> ResourceGovernor {
        ResourceGovernor::new(EscalationPolicy::new(
            self.config.resource_limits,
            &self.config.rescheduling,
        ))
    }
}
