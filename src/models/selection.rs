//! Selections: catalog subsets assigned to one binary and device class

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::catalog::TestCatalog;
use super::target::DeviceClass;
use super::test_case::{TestCase, TestCaseId};

/// A case in a selection, with its position in the caller's subset
#[derive(Clone, Debug)]
pub struct SelectionEntry {
    /// Position in the caller-supplied subset, if the selection was built from one
    pub external_index: Option<usize>,
    pub case: Arc<TestCase>,
}

/// Ordered collection of cases scoped to one binary and one device class
#[derive(Clone, Debug)]
pub struct Selection {
    pub name: String,
    pub binary: String,
    pub class: DeviceClass,
    pub artifacts: Vec<PathBuf>,
    entries: Vec<SelectionEntry>,
}

impl Selection {
    pub fn new(binary: impl Into<String>, class: DeviceClass, artifacts: Vec<PathBuf>) -> Self {
        let binary = binary.into();
        Self {
            name: format!("{binary} [{class}]"),
            binary,
            class,
            artifacts,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, external_index: Option<usize>, case: Arc<TestCase>) {
        self.entries.push(SelectionEntry {
            external_index,
            case,
        });
    }

    pub fn entries(&self) -> &[SelectionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &TestCaseId) -> bool {
        self.entries.iter().any(|e| &e.case.id == id)
    }
}

/// Which device classes a run may use
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetClasses {
    pub virtual_targets: bool,
    pub physical_targets: bool,
}

impl Default for TargetClasses {
    fn default() -> Self {
        Self {
            virtual_targets: true,
            physical_targets: false,
        }
    }
}

/// Selections for every binary plus the cases the run configuration filtered out
#[derive(Clone, Debug, Default)]
pub struct SelectionPlan {
    pub selections: Vec<Selection>,
    pub filtered_out: Vec<Arc<TestCase>>,
}

impl SelectionPlan {
    /// Partition the catalog (or a subset of it) into virtual and physical selections.
    ///
    /// With physical targets enabled a case carrying at least one selector
    /// goes to the physical selection; otherwise a case flagged for virtual
    /// runs goes to the virtual selection. Each case lands in at most one.
    pub fn build(
        catalog: &TestCatalog,
        subset: Option<&[TestCaseId]>,
        classes: TargetClasses,
    ) -> Self {
        let positions: Option<HashMap<&TestCaseId, usize>> =
            subset.map(|ids| ids.iter().enumerate().map(|(i, id)| (id, i)).collect());

        let mut plan = SelectionPlan::default();

        for binary in catalog.binaries() {
            let mut virtual_sel =
                Selection::new(&binary.name, DeviceClass::Virtual, binary.artifacts.clone());
            let mut physical_sel =
                Selection::new(&binary.name, DeviceClass::Physical, binary.artifacts.clone());

            for case in binary.cases() {
                let external_index = match &positions {
                    Some(positions) => match positions.get(&case.id) {
                        Some(index) => Some(*index),
                        None => continue,
                    },
                    None => None,
                };

                if classes.physical_targets && case.runs_on_physical() {
                    physical_sel.push(external_index, case.clone());
                } else if classes.virtual_targets && case.run_on_virtual {
                    virtual_sel.push(external_index, case.clone());
                } else {
                    plan.filtered_out.push(case.clone());
                }
            }

            for selection in [virtual_sel, physical_sel] {
                if !selection.is_empty() {
                    plan.selections.push(selection);
                }
            }
        }

        plan
    }

    pub fn of_class(&self, class: DeviceClass) -> impl Iterator<Item = &Selection> {
        self.selections.iter().filter(move |s| s.class == class)
    }

    /// Total number of cases the plan accounts for
    pub fn case_count(&self) -> usize {
        self.selections.iter().map(Selection::len).sum::<usize>() + self.filtered_out.len()
    }
}
