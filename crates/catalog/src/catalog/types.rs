use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Catalog document as written on disk.
///
/// Mandatory attributes are `Option`s so that their absence is reported as a
/// catalog error naming the attribute rather than a generic JSON error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCatalog {
    #[serde(default)]
    pub templates: Option<BTreeMap<String, RawTemplate>>,
    #[serde(rename = "requirement specifications", default)]
    pub requirement_specifications: Option<RawRequirementNode>,
}

/// A named template: an ordered list of plugin descriptions and an optional base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTemplate {
    #[serde(default)]
    pub plugins: Option<Vec<Value>>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A node of the requirement tree.
///
/// Intermediate nodes hold a common identifier prefix and an optional
/// template; leaves are requirement specifications with optional plugin
/// option overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRequirementNode {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub children: Option<Vec<RawRequirementNode>>,
    #[serde(default)]
    pub plugins: Option<Vec<Value>>,
}
