use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha224};
use tracing::{debug, info};

use crate::spec::{RequirementSpec, StageDesc};

/// Requirement specifications whose shared-prefix stages are configured
/// identically. Shared-prefix results of the pilot serve every member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequirementClass {
    key: String,
    members: Vec<RequirementSpec>,
}

impl RequirementClass {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Members in catalog order. Never empty.
    pub fn members(&self) -> &[RequirementSpec] {
        &self.members
    }

    /// The first member, whose shared-prefix options drive the abstract task.
    pub fn pilot(&self) -> &RequirementSpec {
        &self.members[0]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn requirement_ids(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.identifier.as_str())
    }

    pub fn member(&self, requirement: &str) -> Option<&RequirementSpec> {
        self.members.iter().find(|m| m.identifier == requirement)
    }

    pub fn shared_prefix(&self) -> &[StageDesc] {
        self.pilot().shared_prefix()
    }
}

/// Immutable partition of the checked requirements, built once per run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RequirementClasses {
    classes: BTreeMap<String, RequirementClass>,
}

impl RequirementClasses {
    pub fn get(&self, key: &str) -> Option<&RequirementClass> {
        self.classes.get(key)
    }

    /// Classes in key order.
    pub fn iter(&self) -> impl Iterator<Item = &RequirementClass> {
        self.classes.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Total number of requirements over all classes.
    pub fn total_requirements(&self) -> usize {
        self.classes.values().map(RequirementClass::len).sum()
    }
}

/// Partitions requirement specifications by their shared-prefix options.
pub struct RequirementClassifier;

impl RequirementClassifier {
    /// Classify `specs`, preserving their order inside each class.
    ///
    /// Specs without shared-prefix stages become singleton classes keyed by
    /// their identifier.
    pub fn classify(specs: Vec<RequirementSpec>) -> RequirementClasses {
        let classes = classify_with(specs, fingerprint);
        for class in classes.iter() {
            debug!(
                class = %class.key(),
                members = ?class.requirement_ids().collect::<Vec<_>>(),
                "Requirement class"
            );
        }
        info!(
            classes = classes.len(),
            requirements = classes.total_requirements(),
            "Requirement specifications classified"
        );
        classes
    }
}

/// SHA-224 hex digest of the `[[stage, options], ...]` list.
///
/// Options are JSON objects whose keys serialize in sorted order, so
/// structurally equal prefixes always produce the same digest.
pub fn fingerprint(prefix: &[StageDesc]) -> String {
    let canonical: Vec<(&str, &serde_json::Map<String, Value>)> =
        prefix.iter().map(|s| (s.name.name(), &s.options)).collect();
    let encoded = serde_json::to_string(&canonical).unwrap_or_default();
    let digest = Sha224::digest(encoded.as_bytes());
    format!("{digest:x}")
}

fn classify_with(
    specs: Vec<RequirementSpec>,
    fingerprint: impl Fn(&[StageDesc]) -> String,
) -> RequirementClasses {
    let mut classes: BTreeMap<String, RequirementClass> = BTreeMap::new();

    for spec in specs {
        if spec.shared_prefix().is_empty() {
            let key = spec.identifier.clone();
            classes.insert(
                key.clone(),
                RequirementClass {
                    key,
                    members: vec![spec],
                },
            );
            continue;
        }

        let digest = fingerprint(spec.shared_prefix());
        let mut key = digest.clone();
        let mut ordinal = 0usize;
        loop {
            match classes.get_mut(&key) {
                Some(class) if class.shared_prefix() == spec.shared_prefix() => {
                    class.members.push(spec);
                    break;
                }
                Some(_) => {
                    ordinal += 1;
                    key = format!("{digest}-{ordinal}");
                }
                None => {
                    classes.insert(
                        key.clone(),
                        RequirementClass {
                            key,
                            members: vec![spec],
                        },
                    );
                    break;
                }
            }
        }
    }

    RequirementClasses { classes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageKind;
    use serde_json::json;

    fn stage(name: StageKind, options: Value) -> StageDesc {
        StageDesc {
            name,
            options: options.as_object().cloned().unwrap_or_default(),
        }
    }

    fn spec(id: &str, emg: Option<Value>) -> RequirementSpec {
        let mut plugins = Vec::new();
        if let Some(opts) = emg {
            plugins.push(stage(StageKind::SourceAnalysis, json!({})));
            plugins.push(stage(StageKind::EnvironmentModel, opts));
        }
        plugins.push(stage(StageKind::RequirementModel, json!({"model": id})));
        plugins.push(stage(StageKind::TaskPreparation, json!({})));
        RequirementSpec {
            identifier: id.to_string(),
            plugins,
        }
    }

    #[test]
    fn equal_prefixes_share_a_class() {
        let specs = vec![
            spec("a", Some(json!({"x": 1, "y": [1, 2]}))),
            spec("b", Some(json!({"y": [1, 2], "x": 1}))),
            spec("c", Some(json!({"x": 2}))),
        ];
        let classes = RequirementClassifier::classify(specs);
        assert_eq!(classes.len(), 2);
        assert_eq!(classes.total_requirements(), 3);

        let shared = classes.iter().find(|c| c.len() == 2).unwrap();
        assert_eq!(shared.requirement_ids().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(shared.pilot().identifier, "a");
        assert_eq!(shared.key().len(), 56);
    }

    #[test]
    fn specs_without_shared_stages_are_singletons() {
        let specs = vec![spec("a", None), spec("b", None), spec("c", Some(json!({})))];
        let classes = RequirementClassifier::classify(specs);
        assert_eq!(classes.len(), 3);
        assert_eq!(classes.get("a").unwrap().len(), 1);
        assert_eq!(classes.get("b").unwrap().pilot().identifier, "b");
    }

    #[test]
    fn keys_are_deterministic() {
        let build = || {
            RequirementClassifier::classify(vec![
                spec("a", Some(json!({"deep": {"k": "v", "a": 1}}))),
                spec("b", Some(json!({"x": 1}))),
            ])
        };
        let first: Vec<String> = build().keys().map(str::to_string).collect();
        let second: Vec<String> = build().keys().map(str::to_string).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn stage_order_affects_fingerprint() {
        let a = vec![
            stage(StageKind::SourceAnalysis, json!({"o": 1})),
            stage(StageKind::EnvironmentModel, json!({})),
        ];
        let b = vec![
            stage(StageKind::SourceAnalysis, json!({})),
            stage(StageKind::EnvironmentModel, json!({"o": 1})),
        ];
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn colliding_digests_with_different_content_are_kept_apart() {
        let specs = vec![
            spec("a", Some(json!({"x": 1}))),
            spec("b", Some(json!({"x": 2}))),
            spec("c", Some(json!({"x": 1}))),
        ];
        let classes = classify_with(specs, |_| "same".to_string());
        assert_eq!(classes.len(), 2);
        assert_eq!(
            classes.get("same").unwrap().requirement_ids().collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert_eq!(
            classes.get("same-1").unwrap().requirement_ids().collect::<Vec<_>>(),
            vec!["b"]
        );
    }

    #[test]
    fn classification_is_a_partition() {
        let specs: Vec<_> = (0..10)
            .map(|i| spec(&format!("r{i}"), Some(json!({"group": i % 3}))))
            .collect();
        let classes = RequirementClassifier::classify(specs);
        let mut all: Vec<&str> = classes.iter().flat_map(|c| c.requirement_ids()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 10);
        assert_eq!(classes.len(), 3);
        assert!(classes.iter().all(|c| !c.is_empty()));
    }
}
