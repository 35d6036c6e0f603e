#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::catalog::{write_checked, RequirementCatalog};
    use crate::error::CatalogError;
    use crate::stage::StageKind;

    fn sample() -> Value {
        json!({
            "templates": {
                "Loadable kernel modules": {
                    "plugins": [
                        {"name": "EMG", "options": {"generators": {"linux": {}}}},
                        {"name": "RSG", "options": {"model": "default"}},
                        {"name": "Weaver"},
                        {"name": "FVTP", "options": {"merge source files": true}}
                    ]
                },
                "Argument signatures": {
                    "template": "Loadable kernel modules",
                    "plugins": [
                        {"name": "EMG", "options": {"generators": {"linux": {"callbacks": true}}}},
                        {"name": "RSG"},
                        {"name": "Weaver"},
                        {"name": "FVTP"}
                    ]
                }
            },
            "requirement specifications": {
                "template": "Loadable kernel modules",
                "children": [
                    {
                        "identifier": "kernel",
                        "children": [
                            {"identifier": "locking", "children": [
                                {"identifier": "mutex"},
                                {"identifier": "spinlock",
                                 "plugins": [{"name": "RSG", "options": {"model": "spin"}}]}
                            ]},
                            {"identifier": "module"}
                        ]
                    },
                    {
                        "identifier": "memory safety",
                        "template": "Argument signatures",
                        "description": "Memory safety"
                    }
                ]
            }
        })
    }

    fn catalog() -> RequirementCatalog {
        RequirementCatalog::from_json(&sample().to_string()).unwrap()
    }

    fn patterns(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tree_is_flattened_with_joined_identifiers() {
        let cat = catalog();
        let ids: Vec<&str> = cat.requirement_ids().collect();
        assert_eq!(
            ids,
            vec![
                "kernel:locking:mutex",
                "kernel:locking:spinlock",
                "kernel:module",
                "memory safety"
            ]
        );
        assert_eq!(cat.len(), 4);
    }

    #[test]
    fn select_uses_anchored_patterns() {
        let cat = catalog();
        // "locking" alone must not match "kernel:locking:mutex".
        let err = cat.select(&patterns(&["locking"])).unwrap_err();
        assert!(matches!(err, CatalogError::UnmatchedPatterns(ref p) if p == "locking"));

        let specs = cat.select(&patterns(&["kernel:locking:.*"])).unwrap();
        let ids: Vec<&str> = specs.iter().map(|s| s.identifier.as_str()).collect();
        assert_eq!(ids, vec!["kernel:locking:mutex", "kernel:locking:spinlock"]);
    }

    #[test]
    fn unmatched_pattern_is_fatal_even_if_others_match() {
        let cat = catalog();
        let err = cat.select(&patterns(&["kernel:module", "nothing"])).unwrap_err();
        assert!(matches!(err, CatalogError::UnmatchedPatterns(ref p) if p == "nothing"));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let cat = catalog();
        let err = cat.select(&patterns(&["kernel:("])).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPattern { .. }));
    }

    #[test]
    fn leaf_overrides_are_merged_into_template_options() {
        let cat = catalog();
        let specs = cat.select(&patterns(&["kernel:locking:spinlock"])).unwrap();
        let rsg = specs[0]
            .plugins
            .iter()
            .find(|p| p.name == StageKind::RequirementModel)
            .unwrap();
        assert_eq!(rsg.options["model"], "spin");

        let mutex = cat.select(&patterns(&["kernel:locking:mutex"])).unwrap();
        let rsg = &mutex[0].plugins[1];
        assert_eq!(rsg.options["model"], "default");
    }

    #[test]
    fn template_inheritance_reaches_selected_requirement() {
        let cat = catalog();
        let specs = cat.select(&patterns(&["memory safety"])).unwrap();
        let emg = &specs[0].plugins[0];
        assert_eq!(emg.name, StageKind::EnvironmentModel);
        assert_eq!(emg.options["generators"]["linux"]["callbacks"], true);
        let fvtp = specs[0].plugins.last().unwrap();
        assert_eq!(fvtp.options["merge source files"], true);
    }

    #[test]
    fn override_for_missing_stage_is_rejected() {
        let mut doc = sample();
        doc["requirement specifications"]["children"][0]["children"][1] = json!({
            "identifier": "module",
            "plugins": [{"name": "SA", "options": {"x": 1}}]
        });
        let cat = RequirementCatalog::from_json(&doc.to_string()).unwrap();
        let err = cat.select(&patterns(&["kernel:module"])).unwrap_err();
        assert!(matches!(err, CatalogError::UnmatchedPlugins { ref names, .. } if names == "SA"));
    }

    #[test]
    fn override_without_options_is_rejected() {
        let mut doc = sample();
        doc["requirement specifications"]["children"][0]["children"][1] = json!({
            "identifier": "module",
            "plugins": [{"name": "RSG"}]
        });
        let cat = RequirementCatalog::from_json(&doc.to_string()).unwrap();
        let err = cat.select(&patterns(&["kernel:module"])).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPlugin { .. }));
    }

    #[test]
    fn missing_mandatory_attributes() {
        let err = RequirementCatalog::from_json(r#"{"templates": {}}"#).unwrap_err();
        assert!(matches!(err, CatalogError::MissingAttribute("requirement specifications")));

        let err = RequirementCatalog::from_json(r#"{"requirement specifications": {}}"#).unwrap_err();
        assert!(matches!(err, CatalogError::MissingAttribute("templates")));
    }

    #[test]
    fn leaf_without_template_is_fatal() {
        let doc = json!({
            "templates": {"t": {"plugins": [{"name": "FVTP"}]}},
            "requirement specifications": {"children": [{"identifier": "orphan"}]}
        });
        let err = RequirementCatalog::from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, CatalogError::NoTemplate(ref id) if id == "orphan"));
    }

    #[test]
    fn dangling_requirement_template_is_fatal() {
        let doc = json!({
            "templates": {"t": {"plugins": [{"name": "FVTP"}]}},
            "requirement specifications": {"children": [{"identifier": "a", "template": "ghost"}]}
        });
        let err = RequirementCatalog::from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownTemplate { ref referrer, .. } if referrer == "a"));
    }

    #[test]
    fn child_without_identifier_is_malformed() {
        let doc = json!({
            "templates": {"t": {"plugins": [{"name": "FVTP"}]}},
            "requirement specifications": {"template": "t", "children": [{"description": "?"}]}
        });
        let err = RequirementCatalog::from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, CatalogError::MalformedTree(_)));
    }

    #[test]
    fn checked_specifications_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checked requirement specifications.json");
        let specs = catalog().select(&patterns(&[".*"])).unwrap();
        write_checked(&specs, &path).unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.as_array().unwrap().len(), 4);
        assert_eq!(written[0]["identifier"], "kernel:locking:mutex");
        assert_eq!(written[0]["plugins"][0]["name"], "EMG");
    }
}
