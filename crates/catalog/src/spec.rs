use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stage::StageKind;

/// Options document of a single stage.
pub type StageOptions = Map<String, Value>;

/// One resolved stage of a requirement pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDesc {
    pub name: StageKind,
    #[serde(default)]
    pub options: StageOptions,
}

/// A requirement specification with its fully resolved, ordered pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementSpec {
    pub identifier: String,
    pub plugins: Vec<StageDesc>,
}

impl RequirementSpec {
    /// Leading stages shared by every requirement with equal options.
    pub fn shared_prefix(&self) -> &[StageDesc] {
        let n = self
            .plugins
            .iter()
            .take_while(|p| p.name.is_shared_prefix())
            .count();
        &self.plugins[..n]
    }

    /// Stages executed per requirement once an environment model exists.
    pub fn model_stages(&self) -> &[StageDesc] {
        &self.plugins[self.shared_prefix().len()..]
    }
}

/// Deep-merge `overrides` into a copy of `base`.
///
/// Nested objects are merged key by key; any other value in `overrides`
/// replaces the one in `base`.
pub fn merge_options(base: &StageOptions, overrides: &StageOptions) -> StageOptions {
    let mut merged = base.clone();
    for (key, value) in overrides {
        match (merged.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                let combined = merge_options(existing, incoming);
                *existing = combined;
            }
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}
