use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;
use tracing::debug;

use crate::error::CatalogError;
use crate::spec::{merge_options, StageDesc, StageOptions};
use crate::stage::StageKind;

use super::types::RawTemplate;

/// Parse one plugin description (`{"name": ..., "options": {...}}`).
pub(super) fn parse_plugin(
    owner: &str,
    index: usize,
    raw: &Value,
    require_options: bool,
) -> Result<(StageKind, StageOptions), CatalogError> {
    let invalid = |reason: &str| CatalogError::InvalidPlugin {
        owner: owner.to_string(),
        index,
        reason: reason.to_string(),
    };
    let obj = raw.as_object().ok_or_else(|| invalid("not an object"))?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing \"name\""))?;
    let kind = name.parse::<StageKind>().map_err(|_| CatalogError::UnknownPlugin {
        owner: owner.to_string(),
        name: name.to_string(),
    })?;
    let options = match obj.get("options") {
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(invalid("\"options\" is not an object")),
        None if require_options => return Err(invalid("missing \"options\"")),
        None => StageOptions::new(),
    };
    Ok((kind, options))
}

/// Resolve template inheritance.
///
/// Templates are processed in topological order of their `template`
/// references (Kahn's algorithm), so a base is always complete before any
/// template deriving from it. Options of a derived stage are deep-merged over
/// the options of the equally named base stage. A dangling base reference or
/// an inheritance cycle is fatal.
pub(crate) fn resolve_templates(
    raw: &BTreeMap<String, RawTemplate>,
) -> Result<BTreeMap<String, Vec<StageDesc>>, CatalogError> {
    // Own stages of every template, before inheritance.
    let mut own: BTreeMap<&str, Vec<StageDesc>> = BTreeMap::new();
    for (id, tmpl) in raw {
        let plugins = tmpl
            .plugins
            .as_ref()
            .ok_or_else(|| CatalogError::TemplateWithoutPlugins(id.clone()))?;
        let mut stages = Vec::with_capacity(plugins.len());
        for (idx, p) in plugins.iter().enumerate() {
            let (name, options) = parse_plugin(id, idx, p, false)?;
            stages.push(StageDesc { name, options });
        }
        debug!(
            "Template \"{}\" plugins are {:?}",
            id,
            stages.iter().map(|s| s.name.name()).collect::<Vec<_>>()
        );
        check_stage_order(id, &stages)?;
        own.insert(id.as_str(), stages);
    }

    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, tmpl) in raw {
        in_degree.entry(id.as_str()).or_insert(0);
        if let Some(base) = tmpl.template.as_deref() {
            if !raw.contains_key(base) {
                return Err(CatalogError::UnknownTemplate {
                    template: base.to_string(),
                    referrer: id.clone(),
                });
            }
            dependents.entry(base).or_default().push(id.as_str());
            *in_degree.entry(id.as_str()).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut resolved: BTreeMap<String, Vec<StageDesc>> = BTreeMap::new();
    while let Some(id) = queue.pop_front() {
        let mut stages = own.remove(id).unwrap_or_default();
        if let Some(base) = raw.get(id).and_then(|t| t.template.as_deref()) {
            if let Some(base_stages) = resolved.get(base) {
                inherit_options(&mut stages, base_stages);
            }
        }
        resolved.insert(id.to_string(), stages);

        if let Some(deps) = dependents.get(id) {
            for &dep in deps {
                if let Some(deg) = in_degree.get_mut(dep) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dep);
                    }
                }
            }
        }
    }

    if resolved.len() != raw.len() {
        let in_cycle: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg > 0)
            .map(|(&id, _)| id)
            .collect();
        return Err(CatalogError::TemplateCycle(in_cycle.join(", ")));
    }

    Ok(resolved)
}

fn inherit_options(stages: &mut [StageDesc], base: &[StageDesc]) {
    for stage in stages.iter_mut() {
        if let Some(base_stage) = base.iter().find(|b| b.name == stage.name) {
            stage.options = merge_options(&base_stage.options, &stage.options);
        }
    }
}

/// Shared-prefix stages must come first so that the prefix can run once per class.
fn check_stage_order(owner: &str, stages: &[StageDesc]) -> Result<(), CatalogError> {
    let mut seen_specific = false;
    for stage in stages {
        if stage.name.is_shared_prefix() {
            if seen_specific {
                return Err(CatalogError::MisplacedSharedStage {
                    owner: owner.to_string(),
                    stage: stage.name.to_string(),
                });
            }
        } else {
            seen_specific = true;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(plugins: Value, base: Option<&str>) -> RawTemplate {
        RawTemplate {
            plugins: Some(plugins.as_array().cloned().unwrap_or_default()),
            template: base.map(str::to_string),
            description: None,
        }
    }

    #[test]
    fn chain_of_three_templates() {
        let mut raw = BTreeMap::new();
        raw.insert(
            "base".to_string(),
            template(json!([{"name": "EMG", "options": {"a": 1, "deep": {"x": 1}}}]), None),
        );
        raw.insert(
            "mid".to_string(),
            template(json!([{"name": "EMG", "options": {"b": 2}}]), Some("base")),
        );
        raw.insert(
            "leaf".to_string(),
            template(
                json!([{"name": "EMG", "options": {"deep": {"y": 2}}}, {"name": "FVTP"}]),
                Some("mid"),
            ),
        );

        let resolved = resolve_templates(&raw).unwrap();
        let emg = &resolved["leaf"][0];
        assert_eq!(
            Value::Object(emg.options.clone()),
            json!({"a": 1, "b": 2, "deep": {"x": 1, "y": 2}})
        );
        assert_eq!(resolved["leaf"][1].name, StageKind::TaskPreparation);
    }

    #[test]
    fn cycle_is_detected() {
        let mut raw = BTreeMap::new();
        raw.insert("a".to_string(), template(json!([{"name": "EMG"}]), Some("b")));
        raw.insert("b".to_string(), template(json!([{"name": "EMG"}]), Some("a")));
        raw.insert("c".to_string(), template(json!([{"name": "EMG"}]), None));

        match resolve_templates(&raw).unwrap_err() {
            CatalogError::TemplateCycle(names) => assert_eq!(names, "a, b"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dangling_base_is_rejected() {
        let mut raw = BTreeMap::new();
        raw.insert("a".to_string(), template(json!([{"name": "EMG"}]), Some("ghost")));
        let err = resolve_templates(&raw).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownTemplate { ref template, .. } if template == "ghost"));
    }

    #[test]
    fn unknown_plugin_is_rejected() {
        let mut raw = BTreeMap::new();
        raw.insert("a".to_string(), template(json!([{"name": "Magic"}]), None));
        let err = resolve_templates(&raw).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownPlugin { ref name, .. } if name == "Magic"));
    }

    #[test]
    fn missing_plugins_attribute() {
        let mut raw = BTreeMap::new();
        raw.insert("a".to_string(), RawTemplate::default());
        let err = resolve_templates(&raw).unwrap_err();
        assert!(matches!(err, CatalogError::TemplateWithoutPlugins(_)));
    }

    #[test]
    fn shared_stage_after_specific_stage() {
        let mut raw = BTreeMap::new();
        raw.insert(
            "a".to_string(),
            template(json!([{"name": "RSG"}, {"name": "EMG"}]), None),
        );
        let err = resolve_templates(&raw).unwrap_err();
        assert!(matches!(err, CatalogError::MisplacedSharedStage { .. }));
    }
}
