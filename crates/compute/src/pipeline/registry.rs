use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::info;

use vtg_catalog::{RequirementClasses, StageKind};
use vtg_core::PluginCommand;

use super::command::CommandStage;
use super::{StageError, StageRunner};

/// Closed mapping from stage kind to implementation, built once at startup.
#[derive(Clone, Default)]
pub struct StageRegistry {
    runners: BTreeMap<StageKind, Arc<dyn StageRunner>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build command runners from the `[plugins]` configuration section.
    pub fn from_plugins(plugins: &BTreeMap<String, PluginCommand>) -> Result<Self, StageError> {
        let mut registry = Self::new();
        for (name, command) in plugins {
            let kind: StageKind = name
                .parse()
                .map_err(|_| StageError::UnknownStage(name.clone()))?;
            registry.register(kind, Arc::new(CommandStage::new(kind, command.clone())));
        }
        info!(stages = ?registry.stages().collect::<Vec<_>>(), "Plugin stages registered");
        Ok(registry)
    }

    pub fn register(&mut self, kind: StageKind, runner: Arc<dyn StageRunner>) {
        self.runners.insert(kind, runner);
    }

    pub fn get(&self, kind: StageKind) -> Result<Arc<dyn StageRunner>, StageError> {
        self.runners
            .get(&kind)
            .cloned()
            .ok_or(StageError::NoRunner(kind))
    }

    pub fn stages(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.runners.keys().copied()
    }

    /// Fail unless every stage used by a checked requirement has a runner.
    pub fn ensure_covers(&self, classes: &RequirementClasses) -> Result<(), StageError> {
        let used: BTreeSet<StageKind> = classes
            .iter()
            .flat_map(|c| c.members())
            .flat_map(|spec| spec.plugins.iter().map(|p| p.name))
            .collect();
        match used.into_iter().find(|k| !self.runners.contains_key(k)) {
            Some(missing) => Err(StageError::NoRunner(missing)),
            None => Ok(()),
        }
    }
}
