//! Test case catalog data model
//!
//! Typed records describing discovered tests, their grouping, device
//! applicability and results.

pub mod catalog;
mod selection;
mod selector;
mod target;
mod test_case;
mod test_result;

pub use catalog::{TestBinary, TestCatalog};
pub use selection::{Selection, SelectionEntry, SelectionPlan, TargetClasses};
pub use selector::{
    AnyHardwareSelector, PlatformSelector, RealTargetSelector, SelectorError, SelectorSpec,
    TargetTagSelector,
};
pub use target::{DeviceClass, TargetDescriptor};
pub use test_case::{InstantiationPolicy, TestCase, TestCaseId, TestGroup};
pub use test_result::{RunSummary, TestOutcome, TestResult};
