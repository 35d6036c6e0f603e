//! Requirement catalog: templates, the requirement tree, and selection of
//! the requirement specifications to check.
//!
//! Split into focused submodules:
//! - `types`: raw catalog document model
//! - `templates`: template inheritance resolution
//! - `builder`: requirement tree flattening, selection and option merging

mod builder;
mod templates;
mod tests;
pub mod types;

use std::collections::BTreeMap;

use crate::spec::StageDesc;

pub use self::builder::write_checked;
pub use self::types::{RawCatalog, RawRequirementNode, RawTemplate};

/// A parsed and resolved requirement catalog.
///
/// Templates are fully resolved (inheritance applied, stage names checked).
/// Requirements are the leaves of the requirement tree, keyed by their
/// `:`-joined identifier.
#[derive(Debug, Clone)]
pub struct RequirementCatalog {
    pub(crate) templates: BTreeMap<String, Vec<StageDesc>>,
    pub(crate) requirements: BTreeMap<String, LeafRequirement>,
}

/// A leaf of the requirement tree before it is combined with its template.
#[derive(Debug, Clone)]
pub(crate) struct LeafRequirement {
    pub(crate) template: String,
    pub(crate) plugins: Vec<serde_json::Value>,
}

impl RequirementCatalog {
    /// Identifiers of every requirement described by the catalog, sorted.
    pub fn requirement_ids(&self) -> impl Iterator<Item = &str> {
        self.requirements.keys().map(String::as_str)
    }

    /// Resolved stages of a template.
    pub fn template(&self, id: &str) -> Option<&[StageDesc]> {
        self.templates.get(id).map(Vec::as_slice)
    }
}
