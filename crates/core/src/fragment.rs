use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Separator between fragment identifier and descriptor path in the listing.
const LISTING_SEPARATOR: &str = ":=";

/// A compilation group of a fragment: one unit of compiled code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationGroup {
    pub id: String,
    /// Compilation command descriptors.
    #[serde(rename = "CCs", default)]
    pub ccs: Vec<String>,
    /// Source files compiled by this group.
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Description of one program fragment as produced by fragment extraction.
///
/// Unknown attributes are preserved so that the initial abstract task
/// description handed to plugin stages carries everything extraction wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentDesc {
    pub id: String,
    #[serde(default)]
    pub grps: Vec<CompilationGroup>,
    /// Dependency edges between compilation groups.
    #[serde(default)]
    pub deps: BTreeMap<String, Vec<String>>,
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

impl FragmentDesc {
    /// Sorted, de-duplicated list of all files of the fragment.
    pub fn files(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self
            .grps
            .iter()
            .flat_map(|g| g.files.iter().map(String::as_str))
            .collect();
        set.into_iter().collect()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// The finite set of fragments to verify: identifier -> descriptor path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentSet {
    fragments: BTreeMap<String, PathBuf>,
}

impl FragmentSet {
    /// Parse a listing of `fragment:=relative/descriptor.json` lines.
    ///
    /// Descriptor paths are resolved against `base`. Blank lines are skipped.
    pub fn parse_listing(listing: &str, base: &Path) -> Result<Self, CoreError> {
        let mut fragments = BTreeMap::new();
        for (idx, raw) in listing.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let (id, file) = line.split_once(LISTING_SEPARATOR).ok_or_else(|| {
                CoreError::FragmentListing {
                    line: idx + 1,
                    reason: format!("expected 'fragment{LISTING_SEPARATOR}path', got '{line}'"),
                }
            })?;
            let (id, file) = (id.trim(), file.trim());
            if id.is_empty() || file.is_empty() {
                return Err(CoreError::FragmentListing {
                    line: idx + 1,
                    reason: "empty fragment identifier or descriptor path".into(),
                });
            }
            if fragments.insert(id.to_string(), base.join(file)).is_some() {
                return Err(CoreError::FragmentListing {
                    line: idx + 1,
                    reason: format!("duplicate fragment '{id}'"),
                });
            }
        }
        Ok(Self { fragments })
    }

    /// Read and parse a listing file.
    pub fn load(listing_file: impl AsRef<Path>, base: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(listing_file.as_ref())?;
        Self::parse_listing(&content, base)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragment identifiers in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.fragments.keys().map(String::as_str)
    }

    pub fn descriptor_path(&self, fragment: &str) -> Option<&Path> {
        self.fragments.get(fragment).map(PathBuf::as_path)
    }

    /// Load the descriptor of a fragment from disk.
    pub fn load_desc(&self, fragment: &str) -> Result<FragmentDesc, CoreError> {
        let path = self
            .descriptor_path(fragment)
            .ok_or_else(|| CoreError::FragmentNotFound(fragment.to_string()))?;
        FragmentDesc::from_file(path)
    }
}

impl FromIterator<(String, PathBuf)> for FragmentSet {
    fn from_iter<I: IntoIterator<Item = (String, PathBuf)>>(iter: I) -> Self {
        Self {
            fragments: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listing_resolves_paths() {
        let listing = "drivers/usb:=fragments/usb.json\n\nfs/ext4:=fragments/ext4.json\n";
        let set = FragmentSet::parse_listing(listing, Path::new("/work")).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.ids().collect::<Vec<_>>(), vec!["drivers/usb", "fs/ext4"]);
        assert_eq!(
            set.descriptor_path("fs/ext4").unwrap(),
            Path::new("/work/fragments/ext4.json")
        );
    }

    #[test]
    fn parse_listing_rejects_missing_separator() {
        let err = FragmentSet::parse_listing("a:=x.json\nbroken line", Path::new(".")).unwrap_err();
        match err {
            CoreError::FragmentListing { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_listing_rejects_duplicates() {
        let err = FragmentSet::parse_listing("a:=x.json\na:=y.json", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn descriptor_preserves_extra_attributes() {
        let json = r#"{
            "id": "drivers/usb",
            "grps": [
                {"id": "usb-core", "CCs": ["cc1", "cc2"], "files": ["b.c", "a.c"]},
                {"id": "usb-serial", "CCs": ["cc3"], "files": ["a.c", "c.c"]}
            ],
            "deps": {"usb-serial": ["usb-core"]},
            "size": 1234
        }"#;
        let desc: FragmentDesc = serde_json::from_str(json).unwrap();
        assert_eq!(desc.files(), vec!["a.c", "b.c", "c.c"]);
        assert_eq!(desc.grps[0].ccs.len(), 2);
        assert_eq!(desc.deps["usb-serial"], vec!["usb-core"]);
        assert_eq!(desc.attrs["size"], 1234);

        let back = serde_json::to_value(&desc).unwrap();
        assert_eq!(back["size"], 1234);
        assert_eq!(back["grps"][0]["CCs"][1], "cc2");
    }

    #[test]
    fn load_desc_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.json"), r#"{"id": "f"}"#).unwrap();
        std::fs::write(dir.path().join("listing.txt"), "f:=f.json\n").unwrap();

        let set = FragmentSet::load(dir.path().join("listing.txt"), dir.path()).unwrap();
        let desc = set.load_desc("f").unwrap();
        assert_eq!(desc.id, "f");
        assert!(desc.grps.is_empty());
        assert!(matches!(set.load_desc("missing"), Err(CoreError::FragmentNotFound(_))));
    }
}
