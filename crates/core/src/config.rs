use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::limits::ResourceLimits;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_opt(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

// ── Top-level config ──────────────────────────────────────────

/// Configuration of one verification task generation run (a sub-job).
///
/// Parsed from TOML, then overridden from `VTG_*` environment variables and
/// validated. Relative paths are resolved against `main_working_directory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sub-job identifier reported to the progress sink.
    #[serde(default = "default_sub_job_id")]
    pub sub_job_id: String,

    /// Root of every working directory created by the run.
    #[serde(default = "default_main_working_directory")]
    pub main_working_directory: PathBuf,

    /// Keep per-task and per-abstract-task directories after completion.
    #[serde(default)]
    pub keep_intermediate_files: bool,

    /// Assume each fragment yields exactly one environment model when
    /// reporting the expected total number of tasks up front.
    #[serde(default = "default_single_model")]
    pub single_environment_model_per_fragment: bool,

    /// Path of the requirement catalog (JSON).
    pub specifications_base: PathBuf,

    /// Anchored regular expressions selecting requirement identifiers to check.
    pub requirement_specifications: Vec<String>,

    /// Fragment listing produced by the extraction step.
    #[serde(default = "default_fragments_file")]
    pub fragments_file: PathBuf,

    #[serde(default)]
    pub scheduling: SchedulingConfig,

    /// Limits used for the first attempt of every task.
    #[serde(default)]
    pub resource_limits: ResourceLimits,

    #[serde(default)]
    pub rescheduling: ReschedulingConfig,

    /// External executables implementing plugin stages, keyed by stage name.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginCommand>,
}

fn default_sub_job_id() -> String { "default".into() }
fn default_main_working_directory() -> PathBuf { PathBuf::from(".") }
fn default_single_model() -> bool { true }
fn default_fragments_file() -> PathBuf { PathBuf::from("program fragments.txt") }

// ── Sections ──────────────────────────────────────────────────

/// Admission control and polling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Maximum admitted-but-not-terminal items.
    #[serde(default = "default_max_solving_tasks")]
    pub max_solving_tasks: usize,
    /// Worker pool size. 0 = available parallelism.
    #[serde(default)]
    pub parallelism: usize,
    /// Orchestrator wait on the results channel per loop iteration.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How often a worker asks the scheduler session for a solution.
    #[serde(default = "default_solution_poll_interval_ms")]
    pub solution_poll_interval_ms: u64,
    /// Time granted to in-flight workers after cancellation.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Hold rescheduled attempts until the first-attempt backlog is drained.
    #[serde(default = "default_defer_rescheduling")]
    pub defer_rescheduling: bool,
}

fn default_max_solving_tasks() -> usize { 100 }
fn default_poll_interval_ms() -> u64 { 3000 }
fn default_solution_poll_interval_ms() -> u64 { 1000 }
fn default_shutdown_grace_secs() -> u64 { 10 }
fn default_defer_rescheduling() -> bool { true }

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            max_solving_tasks: default_max_solving_tasks(),
            parallelism: 0,
            poll_interval_ms: default_poll_interval_ms(),
            solution_poll_interval_ms: default_solution_poll_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            defer_rescheduling: default_defer_rescheduling(),
        }
    }
}

impl SchedulingConfig {
    /// Resolve worker count (0 means use available parallelism).
    pub fn resolved_parallelism(&self) -> usize {
        if self.parallelism == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.parallelism
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn solution_poll_interval(&self) -> Duration {
        Duration::from_millis(self.solution_poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Limit escalation applied when a task exhausts its resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReschedulingConfig {
    /// Total attempts per task, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Memory multiplier per rescheduling.
    #[serde(default = "default_factor")]
    pub memory_factor: f64,
    /// CPU and wall time multiplier per rescheduling.
    #[serde(default = "default_factor")]
    pub time_factor: f64,
    /// Absolute ceiling no escalation may exceed.
    #[serde(
        default = "ResourceLimits::default_ceiling",
        deserialize_with = "crate::limits::deserialize_ceiling"
    )]
    pub ceiling: ResourceLimits,
}

fn default_max_attempts() -> u32 { 2 }
fn default_factor() -> f64 { 2.0 }

impl Default for ReschedulingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            memory_factor: default_factor(),
            time_factor: default_factor(),
            ceiling: ResourceLimits::default_ceiling(),
        }
    }
}

/// Command line of an external plugin stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

// ── Loading ───────────────────────────────────────────────────

impl GenerationConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, CoreError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `VTG_SECTION_KEY` overrides `section.key`, `VTG_KEY` a top-level key.
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_opt("VTG_SUB_JOB_ID") {
            self.sub_job_id = v;
        }
        if let Some(v) = env_opt("VTG_MAIN_WORKING_DIRECTORY") {
            self.main_working_directory = PathBuf::from(v);
        }
        if let Some(v) = env_bool("VTG_KEEP_INTERMEDIATE_FILES") {
            self.keep_intermediate_files = v;
        }
        if let Some(v) = env_opt("VTG_SPECIFICATIONS_BASE") {
            self.specifications_base = PathBuf::from(v);
        }
        if let Some(v) = env_parse("VTG_SCHEDULING_MAX_SOLVING_TASKS") {
            self.scheduling.max_solving_tasks = v;
        }
        if let Some(v) = env_parse("VTG_SCHEDULING_PARALLELISM") {
            self.scheduling.parallelism = v;
        }
        if let Some(v) = env_parse("VTG_SCHEDULING_SHUTDOWN_GRACE_SECS") {
            self.scheduling.shutdown_grace_secs = v;
        }
        if let Some(v) = env_parse("VTG_RESCHEDULING_MAX_ATTEMPTS") {
            self.rescheduling.max_attempts = v;
        }
    }

    /// Reject configurations the scheduler cannot honour.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.scheduling.max_solving_tasks == 0 {
            return Err(CoreError::Config(
                "scheduling.max_solving_tasks must be at least 1".into(),
            ));
        }
        if self.requirement_specifications.is_empty() {
            return Err(CoreError::Config(
                "nothing will be verified since requirement_specifications is empty".into(),
            ));
        }
        let r = &self.rescheduling;
        if r.max_attempts == 0 {
            return Err(CoreError::Config(
                "rescheduling.max_attempts must be at least 1".into(),
            ));
        }
        if r.memory_factor < 1.0 || r.time_factor < 1.0 {
            return Err(CoreError::Config(format!(
                "escalation factors must be >= 1.0 (memory={}, time={})",
                r.memory_factor, r.time_factor
            )));
        }
        if !r.ceiling.dominates(&self.resource_limits) {
            return Err(CoreError::Config(format!(
                "rescheduling ceiling ({}) is below default resource limits ({})",
                r.ceiling, self.resource_limits
            )));
        }
        Ok(())
    }

    /// Resolve a path relative to the main working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.main_working_directory.join(path)
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (sub-job: {}):", self.sub_job_id);
        tracing::info!("  workdir:      {}", self.main_working_directory.display());
        tracing::info!("  catalog:      {}", self.specifications_base.display());
        tracing::info!("  requirements: {}", self.requirement_specifications.join(", "));
        tracing::info!(
            "  scheduling:   max_tasks={}, parallelism={}, poll={}ms",
            self.scheduling.max_solving_tasks,
            self.scheduling.resolved_parallelism(),
            self.scheduling.poll_interval_ms
        );
        tracing::info!("  limits:       {}", self.resource_limits);
        tracing::info!(
            "  rescheduling: attempts={}, ceiling={}",
            self.rescheduling.max_attempts,
            self.rescheduling.ceiling
        );
        tracing::info!("  plugins:      {:?}", self.plugins.keys().collect::<Vec<_>>());
    }
}
