//! Verification task generation and scheduling.
//!
//! The [`Orchestrator`] turns (fragment, requirement class) pairs into
//! abstract tasks, lets the [`AbstractTaskFactory`] fan them out into
//! environment models, derives one concrete task per model and requirement
//! and drives every task to a terminal status on a bounded [`WorkPool`].
//! Resource-exhausted tasks are retried with escalated limits by the
//! [`ResourceGovernor`].

pub mod error;
pub mod factory;
pub mod governor;
pub mod metrics;
pub mod paths;
pub mod pool;
pub mod progress;
pub mod report;
pub mod runner;
pub mod session;
pub mod setup;
pub mod task;
pub mod types;

pub use error::GenerationError;
pub use factory::AbstractTaskFactory;
pub use governor::{EscalationPolicy, ResourceGovernor, Verdict};
pub use metrics::GenerationMetrics;
pub use paths::WorkPaths;
pub use pool::{WorkPool, WorkerContext};
pub use progress::{ChannelProgress, LogProgress, ProgressEvent, ProgressSink};
pub use report::{GenerationReport, TaskOutcome};
pub use runner::{fragment_handshake, Orchestrator, ShutdownHandle};
pub use session::{RemoteTaskId, SchedulerSession, SessionError, SpoolSession};
pub use setup::{load_fragments, load_requirement_classes};
pub use task::{AbstractTask, AbstractTaskId, Completion, EnvModel, Task, TaskId, WorkItem};
pub use types::{ExhaustedResource, FinalStatus, Solution, SolutionStatus};
