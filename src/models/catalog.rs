//! Test case catalog
//!
//! The catalog is produced by an external discovery tool and written as a
//! JSON (or YAML) file. This module loads it into typed records.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::selector::SelectorSpec;
use super::test_case::{InstantiationPolicy, TestCase, TestCaseId, TestGroup};

/// One compiled test binary and the cases discovered in it
#[derive(Clone, Debug)]
pub struct TestBinary {
    pub name: String,
    /// Files deployed to a target to run this binary
    pub artifacts: Vec<PathBuf>,
    groups: Vec<Arc<TestGroup>>,
    cases: Vec<Arc<TestCase>>,
}

impl TestBinary {
    pub fn new(name: impl Into<String>, artifacts: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            artifacts,
            groups: Vec::new(),
            cases: Vec::new(),
        }
    }

    pub fn add_group(&mut self, group: TestGroup) -> Arc<TestGroup> {
        let group = Arc::new(group);
        self.groups.push(group.clone());
        group
    }

    pub fn add_case(&mut self, case: TestCase) {
        self.cases.push(Arc::new(case));
    }

    pub fn groups(&self) -> &[Arc<TestGroup>] {
        &self.groups
    }

    pub fn cases(&self) -> &[Arc<TestCase>] {
        &self.cases
    }
}

/// Resolved catalog of test cases grouped into execution units
#[derive(Clone, Debug, Default)]
pub struct TestCatalog {
    binaries: Vec<TestBinary>,
}

impl TestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binary(&mut self, binary: TestBinary) {
        self.binaries.push(binary);
    }

    pub fn binaries(&self) -> &[TestBinary] {
        &self.binaries
    }

    pub fn cases(&self) -> impl Iterator<Item = &Arc<TestCase>> {
        self.binaries.iter().flat_map(|b| b.cases.iter())
    }

    pub fn len(&self) -> usize {
        self.binaries.iter().map(|b| b.cases.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Warnings collected from group declarations
    pub fn warnings(&self) -> Vec<String> {
        self.binaries
            .iter()
            .flat_map(|b| b.groups.iter())
            .flat_map(|g| g.warnings().iter().cloned())
            .collect()
    }

    /// Load a catalog file (JSON, or YAML by extension)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog: {}", path.display()))?;

        let file: CatalogFile = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML catalog: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON catalog: {}", path.display()))?
        };

        let catalog = file.resolve()?;
        debug!(
            "Loaded {} test cases from {} binaries",
            catalog.len(),
            catalog.binaries.len()
        );
        for warning in catalog.warnings() {
            warn!("{}", warning);
        }
        Ok(catalog)
    }
}

/// On-disk catalog format
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub binaries: Vec<BinaryEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BinaryEntry {
    pub name: String,
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    #[serde(default)]
    pub instantiation: InstantiationPolicy,
    #[serde(default)]
    pub setup_cleanup_per_case: bool,
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub cleanup: Vec<String>,
    #[serde(default)]
    pub cases: Vec<CaseEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseEntry {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_row: Option<usize>,
    #[serde(default = "default_true")]
    pub run_on_virtual: bool,
    #[serde(default)]
    pub selectors: Vec<SelectorSpec>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub required_config_keys: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl CatalogFile {
    /// Build typed records, numbering groups and methods in declaration order
    pub fn resolve(&self) -> Result<TestCatalog> {
        let mut catalog = TestCatalog::new();
        let mut seen: HashSet<TestCaseId> = HashSet::new();

        for entry in &self.binaries {
            let mut binary = TestBinary::new(&entry.name, entry.artifacts.clone());

            for (index, group_entry) in entry.groups.iter().enumerate() {
                let mut group = TestGroup::new(&entry.name, index, &group_entry.name)
                    .with_instantiation(group_entry.instantiation)
                    .with_setup_cleanup_per_case(group_entry.setup_cleanup_per_case);
                for setup in &group_entry.setup {
                    group.add_setup(setup);
                }
                for cleanup in &group_entry.cleanup {
                    group.add_cleanup(cleanup);
                }
                let group = binary.add_group(group);

                let mut methods: Vec<&str> = Vec::new();
                for case_entry in &group_entry.cases {
                    let method_index = match methods.iter().position(|m| *m == case_entry.method)
                    {
                        Some(i) => i,
                        None => {
                            methods.push(&case_entry.method);
                            methods.len() - 1
                        }
                    };

                    let mut case = TestCase::new(group.clone(), method_index, &case_entry.method)
                        .run_on_virtual(case_entry.run_on_virtual);
                    if let Some(row) = case_entry.data_row {
                        case = case.with_data_row(row);
                    }
                    if let Some(name) = &case_entry.display_name {
                        case = case.with_display_name(name);
                    }
                    for spec in &case_entry.selectors {
                        case = case.with_selector(spec.build());
                    }
                    case.categories = case_entry.categories.clone();
                    case.required_config_keys = case_entry.required_config_keys.clone();

                    if !seen.insert(case.id.clone()) {
                        anyhow::bail!("Duplicate test case in catalog: {}", case.id);
                    }
                    binary.add_case(case);
                }
            }

            catalog.add_binary(binary);
        }

        Ok(catalog)
    }
}

fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::selector::AnyHardwareSelector;
    use tempfile::tempdir;

    /// Group with case A (virtual only) and case B (any hardware)
    pub(crate) fn sample_catalog() -> TestCatalog {
        let mut binary = TestBinary::new("Sample.dll", vec![PathBuf::from("Sample.pe")]);
        let group = binary.add_group(TestGroup::new("Sample.dll", 0, "Ns.Group"));
        binary.add_case(TestCase::new(group.clone(), 0, "Ns.Group.A"));
        binary.add_case(
            TestCase::new(group, 1, "Ns.Group.B").with_selector(Arc::new(AnyHardwareSelector)),
        );

        let mut catalog = TestCatalog::new();
        catalog.add_binary(binary);
        catalog
    }

    const SAMPLE: &str = r#"{
        "binaries": [{
            "name": "Tests.dll",
            "artifacts": ["Tests.pe"],
            "groups": [{
                "name": "Ns.Math",
                "instantiation": "once-per-group",
                "setup": ["Init", "InitToo"],
                "cases": [
                    {"method": "Ns.Math.Add"},
                    {"method": "Ns.Math.Div", "data_row": 0},
                    {"method": "Ns.Math.Div", "data_row": 1,
                     "selectors": [{"kind": "platform", "platform": "ESP32"}]}
                ]
            }]
        }]
    }"#;

    #[test]
    fn test_resolve_numbers_methods() {
        let file: CatalogFile = serde_json::from_str(SAMPLE).unwrap();
        let catalog = file.resolve().unwrap();

        let cases: Vec<_> = catalog.cases().collect();
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].method_index, 0);
        assert_eq!(cases[1].method_index, 1);
        assert_eq!(cases[2].method_index, 1);
        assert_eq!(cases[2].id.data_row, Some(1));
        assert!(cases[2].runs_on_physical());
        assert_eq!(
            cases[0].group.instantiation,
            InstantiationPolicy::OncePerGroup
        );
        assert_eq!(catalog.warnings().len(), 1);
    }

    #[test]
    fn test_duplicate_case_rejected() {
        let json = r#"{"binaries":[{"name":"T.dll","groups":[{"name":"G",
            "cases":[{"method":"G.A"},{"method":"G.A"}]}]}]}"#;
        let file: CatalogFile = serde_json::from_str(json).unwrap();
        assert!(file.resolve().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let catalog = TestCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.binaries()[0].artifacts, vec![PathBuf::from("Tests.pe")]);
    }
}
