use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::CatalogError;
use crate::spec::{RequirementSpec, StageDesc};

use super::templates::{parse_plugin, resolve_templates};
use super::types::{RawCatalog, RawRequirementNode};
use super::{LeafRequirement, RequirementCatalog};

/// Separator between identifiers of nested requirement tree nodes.
const ID_SEPARATOR: char = ':';

impl RequirementCatalog {
    /// Build a catalog from a parsed document.
    pub fn from_raw(raw: RawCatalog) -> Result<Self, CatalogError> {
        let raw_templates = raw
            .templates
            .ok_or(CatalogError::MissingAttribute("templates"))?;
        let root = raw
            .requirement_specifications
            .ok_or(CatalogError::MissingAttribute("requirement specifications"))?;

        let templates = resolve_templates(&raw_templates)?;
        let requirements = flatten_tree(root, &templates)?;

        info!(
            templates = templates.len(),
            requirements = requirements.len(),
            "Requirement catalog loaded"
        );
        Ok(Self {
            templates,
            requirements,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        Self::from_raw(serde_json::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        debug!("Reading specifications base {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Number of requirements described by the catalog.
    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Select the requirements whose identifiers fully match any of `patterns`
    /// and resolve their pipelines.
    ///
    /// The result is sorted by identifier. Every pattern has to match at least
    /// one requirement.
    pub fn select(&self, patterns: &[String]) -> Result<Vec<RequirementSpec>, CatalogError> {
        let compiled = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{p})$")).map_err(|e| CatalogError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut matched_patterns = BTreeSet::new();
        let mut selected = Vec::new();
        for id in self.requirements.keys() {
            if let Some(idx) = compiled.iter().position(|re| re.is_match(id)) {
                matched_patterns.insert(idx);
                selected.push(id.as_str());
            }
        }

        let unmatched: Vec<&str> = patterns
            .iter()
            .enumerate()
            .filter(|(idx, _)| !matched_patterns.contains(idx))
            .map(|(_, p)| p.as_str())
            .collect();
        if !unmatched.is_empty() {
            return Err(CatalogError::UnmatchedPatterns(unmatched.join(", ")));
        }

        debug!("Following requirement specifications will be checked: {}", selected.join(", "));

        selected.into_iter().map(|id| self.resolve(id)).collect()
    }

    /// Combine a leaf with its template: overrides are shallow-merged into
    /// the options of the equally named template stage.
    fn resolve(&self, id: &str) -> Result<RequirementSpec, CatalogError> {
        let leaf = self
            .requirements
            .get(id)
            .ok_or_else(|| CatalogError::NoTemplate(id.to_string()))?;
        let mut plugins: Vec<StageDesc> = self
            .templates
            .get(&leaf.template)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownTemplate {
                template: leaf.template.clone(),
                referrer: id.to_string(),
            })?;

        let mut unmatched = Vec::new();
        for (idx, raw) in leaf.plugins.iter().enumerate() {
            let name = raw
                .as_object()
                .and_then(|o| o.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let (kind, options) = match parse_plugin(id, idx, raw, true) {
                Ok(parsed) => parsed,
                Err(CatalogError::UnknownPlugin { .. }) => {
                    unmatched.push(name);
                    continue;
                }
                Err(e) => return Err(e),
            };
            match plugins.iter_mut().find(|s| s.name == kind) {
                Some(stage) => stage.options.extend(options),
                None => unmatched.push(name),
            }
        }
        if !unmatched.is_empty() {
            return Err(CatalogError::UnmatchedPlugins {
                requirement: id.to_string(),
                names: unmatched.join(", "),
            });
        }

        Ok(RequirementSpec {
            identifier: id.to_string(),
            plugins,
        })
    }
}

/// Write the list of checked requirement specifications as pretty JSON.
pub fn write_checked(specs: &[RequirementSpec], path: impl AsRef<Path>) -> Result<(), CatalogError> {
    let path = path.as_ref();
    debug!("Create file {} with descriptions of requirement specifications to be checked", path.display());
    let json = serde_json::to_string_pretty(specs)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Flatten the requirement tree into leaves keyed by `:`-joined identifiers.
///
/// Walks the tree with an explicit stack. Each entry carries the identifier
/// prefix and the template inherited from the nearest ancestor.
fn flatten_tree(
    root: RawRequirementNode,
    templates: &BTreeMap<String, Vec<StageDesc>>,
) -> Result<BTreeMap<String, LeafRequirement>, CatalogError> {
    let check_template = |tmpl: &Option<String>, referrer: &str| -> Result<(), CatalogError> {
        match tmpl {
            Some(t) if !templates.contains_key(t) => Err(CatalogError::UnknownTemplate {
                template: t.clone(),
                referrer: referrer.to_string(),
            }),
            _ => Ok(()),
        }
    };

    check_template(&root.template, "requirement specifications")?;
    let children = root.children.ok_or_else(|| {
        CatalogError::MalformedTree("specifications base does not describe any requirement".into())
    })?;

    let mut leaves = BTreeMap::new();
    let mut stack: Vec<(String, Option<String>, RawRequirementNode)> = children
        .into_iter()
        .rev()
        .map(|child| (String::new(), root.template.clone(), child))
        .collect();

    while let Some((prefix, parent_template, node)) = stack.pop() {
        let own_id = node.identifier.ok_or_else(|| {
            let parent = if prefix.is_empty() { "root" } else { prefix.as_str() };
            CatalogError::MalformedTree(format!("identifier is not specified for a child of \"{parent}\""))
        })?;
        let id = if prefix.is_empty() {
            own_id
        } else {
            format!("{prefix}{ID_SEPARATOR}{own_id}")
        };

        check_template(&node.template, &id)?;
        let template = node.template.or(parent_template);

        match node.children {
            Some(children) => {
                if node.plugins.is_some() {
                    return Err(CatalogError::MalformedTree(format!(
                        "\"{id}\" has both children and plugins"
                    )));
                }
                for child in children.into_iter().rev() {
                    stack.push((id.clone(), template.clone(), child));
                }
            }
            None => {
                let template = template.ok_or_else(|| CatalogError::NoTemplate(id.clone()))?;
                let leaf = LeafRequirement {
                    template,
                    plugins: node.plugins.unwrap_or_default(),
                };
                if leaves.insert(id.clone(), leaf).is_some() {
                    return Err(CatalogError::MalformedTree(format!(
                        "requirement \"{id}\" is described more than once"
                    )));
                }
            }
        }
    }

    Ok(leaves)
}
