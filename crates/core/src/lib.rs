pub mod config;
pub mod error;
pub mod fragment;
pub mod limits;

pub use config::{GenerationConfig, PluginCommand, ReschedulingConfig, SchedulingConfig};
pub use error::*;
pub use fragment::{CompilationGroup, FragmentDesc, FragmentSet};
pub use limits::ResourceLimits;
