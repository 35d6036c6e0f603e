use std::path::Path;

use tracing::{debug, info};

use vtg_catalog::{write_checked, RequirementCatalog, RequirementClasses, RequirementClassifier};
use vtg_core::{FragmentSet, GenerationConfig};

use super::error::GenerationError;

/// Written next to the run when intermediate files are kept.
pub const CHECKED_SPECIFICATIONS: &str = "checked requirement specifications.json";

/// Load the catalog, select the configured requirements and classify them.
pub fn load_requirement_classes(config: &GenerationConfig) -> Result<RequirementClasses, GenerationError> {
    let catalog = RequirementCatalog::from_file(config.resolve(&config.specifications_base))?;
    let specs = catalog.select(&config.requirement_specifications)?;
    info!(selected = specs.len(), described = catalog.len(), "Requirement specifications selected");

    if config.keep_intermediate_files {
        write_checked(&specs, config.resolve(CHECKED_SPECIFICATIONS))?;
    }
    Ok(RequirementClassifier::classify(specs))
}

/// Load the fragment listing. `listing` overrides the configured file.
///
/// The listing is consumed: it is removed after loading unless intermediate
/// files are kept.
pub fn load_fragments(
    config: &GenerationConfig,
    listing: Option<&Path>,
) -> Result<FragmentSet, GenerationError> {
    let path = config.resolve(listing.unwrap_or(&config.fragments_file));
    let fragments = FragmentSet::load(&path, &config.main_working_directory)?;
    debug!(fragments = fragments.len(), listing = %path.display(), "Found fragment descriptions");

    if !config.keep_intermediate_files {
        std::fs::remove_file(&path)?;
    }
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path, keep: bool) -> GenerationConfig {
        let toml = format!(
            r#"
main_working_directory = "{}"
keep_intermediate_files = {keep}
specifications_base = "base.json"
requirement_specifications = ["kernel:.*"]
"#,
            dir.display()
        );
        GenerationConfig::from_toml(&toml).unwrap()
    }

    const BASE: &str = r#"{
        "templates": {"t": {"plugins": [{"name": "EMG", "options": {}}, {"name": "FVTP"}]}},
        "requirement specifications": {"template": "t", "children": [
            {"identifier": "kernel", "children": [{"identifier": "a"}, {"identifier": "b"}]},
            {"identifier": "other"}
        ]}
    }"#;

    #[test]
    fn classes_from_catalog() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.json"), BASE).unwrap();

        let classes = load_requirement_classes(&config(dir.path(), true)).unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes.total_requirements(), 2);
        assert!(dir.path().join(CHECKED_SPECIFICATIONS).exists());
    }

    #[test]
    fn checked_list_is_not_written_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.json"), BASE).unwrap();
        load_requirement_classes(&config(dir.path(), false)).unwrap();
        assert!(!dir.path().join(CHECKED_SPECIFICATIONS).exists());
    }

    #[test]
    fn listing_is_consumed_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        let listing = dir.path().join("program fragments.txt");

        std::fs::write(&listing, "f:=f.json\n").unwrap();
        let set = load_fragments(&config(dir.path(), true), None).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.descriptor_path("f").unwrap(), dir.path().join("f.json"));
        assert!(listing.exists());

        load_fragments(&config(dir.path(), false), None).unwrap();
        assert!(!listing.exists());
    }
}
