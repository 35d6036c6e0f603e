use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of plugin stages a requirement pipeline may use.
///
/// Names are resolved once while loading the catalog; anything outside this
/// set is a fatal configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKind {
    /// Source analysis.
    #[serde(rename = "SA")]
    SourceAnalysis,
    /// Environment model generation.
    #[serde(rename = "EMG")]
    EnvironmentModel,
    /// Requirement specification generation.
    #[serde(rename = "RSG")]
    RequirementModel,
    /// Weaving of models into the fragment sources.
    #[serde(rename = "Weaver")]
    Weaver,
    /// Final verification task preparation.
    #[serde(rename = "FVTP")]
    TaskPreparation,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::SourceAnalysis,
        StageKind::EnvironmentModel,
        StageKind::RequirementModel,
        StageKind::Weaver,
        StageKind::TaskPreparation,
    ];

    /// Name used in catalogs, configuration and artifact file names.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::SourceAnalysis => "SA",
            StageKind::EnvironmentModel => "EMG",
            StageKind::RequirementModel => "RSG",
            StageKind::Weaver => "Weaver",
            StageKind::TaskPreparation => "FVTP",
        }
    }

    /// Stages whose output depends only on analysis options and can be
    /// shared by every requirement of a class.
    pub fn is_shared_prefix(&self) -> bool {
        matches!(self, StageKind::SourceAnalysis | StageKind::EnvironmentModel)
    }

    /// Lower-case name used for per-stage working directories and artifacts.
    pub fn dir_name(&self) -> String {
        self.name().to_lowercase()
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned for a stage name outside the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let known: Vec<&str> = StageKind::ALL.iter().map(StageKind::name).collect();
        write!(f, "unknown stage '{}', expected one of {}", self.0, known.join(", "))
    }
}

impl std::error::Error for UnknownStage {}

impl FromStr for StageKind {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in StageKind::ALL {
            assert_eq!(kind.name().parse::<StageKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_name_lists_known_stages() {
        let err = "CPAchecker".parse::<StageKind>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("CPAchecker"));
        assert!(msg.contains("EMG"));
    }

    #[test]
    fn only_analysis_stages_are_shared() {
        let shared: Vec<_> = StageKind::ALL.into_iter().filter(StageKind::is_shared_prefix).collect();
        assert_eq!(shared, vec![StageKind::SourceAnalysis, StageKind::EnvironmentModel]);
    }

    #[test]
    fn serde_uses_catalog_names() {
        let json = serde_json::to_string(&StageKind::TaskPreparation).unwrap();
        assert_eq!(json, "\"FVTP\"");
        let kind: StageKind = serde_json::from_str("\"SA\"").unwrap();
        assert_eq!(kind, StageKind::SourceAnalysis);
    }
}
