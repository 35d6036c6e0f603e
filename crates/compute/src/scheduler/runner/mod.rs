//! Generation orchestrator -- the control loop of a run.
//!
//! Split into focused submodules:
//! - `core`: Orchestrator struct, shutdown handle and the fragment handshake
//! - `execution`: main loop, completion handling and cancellation
//! - `scheduling`: run bookkeeping, backlog construction and admission control

mod core;
mod execution;
mod scheduling;

pub use self::core::{fragment_handshake, Orchestrator, ShutdownHandle};
