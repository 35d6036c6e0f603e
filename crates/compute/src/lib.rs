pub mod pipeline;
pub mod scheduler;

pub use pipeline::{CommandStage, StageError, StageInvocation, StageRegistry, StageRunner};
pub use scheduler::{
    fragment_handshake, GenerationError, GenerationReport, Orchestrator, ProgressSink,
    SchedulerSession, ShutdownHandle, Solution, SolutionStatus,
};
