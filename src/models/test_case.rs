//! Test case and group models
//!
//! Immutable records describing discovered tests and the groups that share
//! their setup, cleanup and instantiation lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::selector::RealTargetSelector;

/// Identity of a test case: binary, fully-qualified method, data row
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestCaseId {
    pub binary: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_row: Option<usize>,
}

impl TestCaseId {
    pub fn new(binary: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            method: method.into(),
            data_row: None,
        }
    }

    pub fn with_data_row(mut self, row: usize) -> Self {
        self.data_row = Some(row);
        self
    }
}

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.binary, self.method)?;
        if let Some(row) = self.data_row {
            write!(f, "[{row}]")?;
        }
        Ok(())
    }
}

/// How often the group's test class is instantiated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstantiationPolicy {
    /// Static methods only, never instantiated
    #[default]
    None,
    OncePerGroup,
    OncePerCase,
}

/// A batch of test cases sharing initialization, teardown and lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestGroup {
    /// Binary the group was discovered in
    pub binary: String,
    /// Position of the group in the binary, as reported on the wire
    pub index: usize,
    /// Fully-qualified group (class) name
    pub name: String,
    pub instantiation: InstantiationPolicy,
    /// Run setup and cleanup around every case instead of once per group
    pub setup_cleanup_per_case: bool,
    setup_methods: Vec<String>,
    cleanup_methods: Vec<String>,
    warnings: Vec<String>,
}

impl TestGroup {
    pub fn new(binary: impl Into<String>, index: usize, name: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            index,
            name: name.into(),
            instantiation: InstantiationPolicy::None,
            setup_cleanup_per_case: false,
            setup_methods: Vec::new(),
            cleanup_methods: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_instantiation(mut self, policy: InstantiationPolicy) -> Self {
        self.instantiation = policy;
        self
    }

    pub fn with_setup_cleanup_per_case(mut self, per_case: bool) -> Self {
        self.setup_cleanup_per_case = per_case;
        self
    }

    /// Declare a setup method. Only the first one is designated.
    pub fn add_setup(&mut self, method: impl Into<String>) {
        let method = method.into();
        if let Some(designated) = self.setup_methods.first() {
            self.warnings.push(format!(
                "{}: setup method '{}' ignored, '{}' is already designated",
                self.name, method, designated
            ));
        }
        self.setup_methods.push(method);
    }

    /// Declare a cleanup method. Only the first one is designated.
    pub fn add_cleanup(&mut self, method: impl Into<String>) {
        let method = method.into();
        if let Some(designated) = self.cleanup_methods.first() {
            self.warnings.push(format!(
                "{}: cleanup method '{}' ignored, '{}' is already designated",
                self.name, method, designated
            ));
        }
        self.cleanup_methods.push(method);
    }

    pub fn setup(&self) -> Option<&str> {
        self.setup_methods.first().map(String::as_str)
    }

    pub fn cleanup(&self) -> Option<&str> {
        self.cleanup_methods.first().map(String::as_str)
    }

    /// All declared setup methods, in declaration order
    pub fn setup_methods(&self) -> &[String] {
        &self.setup_methods
    }

    /// All declared cleanup methods, in declaration order
    pub fn cleanup_methods(&self) -> &[String] {
        &self.cleanup_methods
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// A discovered test case
#[derive(Clone, Debug)]
pub struct TestCase {
    pub id: TestCaseId,
    pub display_name: String,
    /// Position of the method in its group, as reported on the wire
    pub method_index: usize,
    pub run_on_virtual: bool,
    /// Empty means the case never runs on physical hardware
    pub selectors: Vec<Arc<dyn RealTargetSelector>>,
    pub categories: Vec<String>,
    pub required_config_keys: Vec<String>,
    pub group: Arc<TestGroup>,
}

impl TestCase {
    pub fn new(group: Arc<TestGroup>, method_index: usize, method: impl Into<String>) -> Self {
        let method = method.into();
        let display_name = method
            .rsplit('.')
            .next()
            .unwrap_or(method.as_str())
            .to_string();
        Self {
            id: TestCaseId::new(group.binary.clone(), method),
            display_name,
            method_index,
            run_on_virtual: true,
            selectors: Vec::new(),
            categories: Vec::new(),
            required_config_keys: Vec::new(),
            group,
        }
    }

    pub fn with_data_row(mut self, row: usize) -> Self {
        self.id = self.id.with_data_row(row);
        self.display_name = format!("{} [{}]", self.display_name, row);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn run_on_virtual(mut self, run: bool) -> Self {
        self.run_on_virtual = run;
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn RealTargetSelector>) -> Self {
        self.selectors.push(selector);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn with_required_config_key(mut self, key: impl Into<String>) -> Self {
        self.required_config_keys.push(key.into());
        self
    }

    pub fn runs_on_physical(&self) -> bool {
        !self.selectors.is_empty()
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::selector::AnyHardwareSelector;

    #[test]
    fn test_case_id_display() {
        let id = TestCaseId::new("Tests.dll", "Ns.Class.Method");
        assert_eq!(id.to_string(), "Tests.dll::Ns.Class.Method");
        assert_eq!(id.with_data_row(2).to_string(), "Tests.dll::Ns.Class.Method[2]");
    }

    #[test]
    fn test_extra_setup_demoted_to_warning() {
        let mut group = TestGroup::new("Tests.dll", 0, "Ns.Class");
        group.add_setup("Init");
        group.add_setup("InitAgain");
        group.add_cleanup("Teardown");

        assert_eq!(group.setup(), Some("Init"));
        assert_eq!(group.cleanup(), Some("Teardown"));
        assert_eq!(group.setup_methods().len(), 2);
        assert_eq!(group.warnings().len(), 1);
        assert!(group.warnings()[0].contains("InitAgain"));
    }

    #[test]
    fn test_case_builder() {
        let group = Arc::new(TestGroup::new("Tests.dll", 0, "Ns.Class"));
        let case = TestCase::new(group, 3, "Ns.Class.Method")
            .with_data_row(1)
            .with_selector(Arc::new(AnyHardwareSelector))
            .with_category("io");

        assert_eq!(case.display_name, "Method [1]");
        assert_eq!(case.id.data_row, Some(1));
        assert_eq!(case.method_index, 3);
        assert!(case.runs_on_physical());
    }
}
