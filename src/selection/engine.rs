//! Per-target filtering of a selection
//!
//! Decides which cases of a selection run on a physical target, and which
//! are skipped because their selectors failed or an equivalent target
//! already covers them.

use std::sync::Arc;
use tracing::{debug, warn};

use super::context::{ConcludedView, ExecutionContext};
use crate::models::{RealTargetSelector, Selection, SelectorError, TestResult};

/// Counts from one investigation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Investigation {
    pub run: usize,
    pub skipped: usize,
    pub not_applicable: usize,
}

/// Fill `context` with the sub-selection to run on its target.
///
/// `concluded` holds the contexts of targets that finished investigating
/// the same selection earlier. Leaves the context Running when something
/// is left to execute, Done otherwise.
pub fn investigate(
    context: &mut ExecutionContext,
    selection: &Selection,
    concluded: &[ConcludedView],
) -> Investigation {
    let target = context.target().clone();
    let target_name = target.display_name();
    let mut stats = Investigation::default();

    for entry in selection.entries() {
        let case = &entry.case;

        let mut applicable: Vec<(String, Arc<dyn RealTargetSelector>)> = Vec::new();
        let mut errors: Vec<SelectorError> = Vec::new();
        for selector in &case.selectors {
            let id = selector.id();
            match context.verdict(&id, || selector.should_run_on(&target)) {
                Ok(true) => applicable.push((id, selector.clone())),
                Ok(false) => {}
                Err(e) => errors.push(e),
            }
        }

        for e in &errors {
            warn!("{} on {}: {}", case.id, target.id, e);
            if !applicable.is_empty() {
                context.log(format!("{}: {}", case.display_name, e));
            }
        }

        if applicable.is_empty() {
            if !errors.is_empty() && errors.len() == case.selectors.len() {
                let reason = errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                context.push_skipped(
                    TestResult::skipped(case, format!("Selection failed: {}", reason))
                        .with_target(&target_name)
                        .with_external_index(entry.external_index),
                );
                stats.skipped += 1;
            } else {
                stats.not_applicable += 1;
            }
            continue;
        }

        let mut covered_by = None;
        for view in concluded {
            if !view.covered.contains(&case.id) {
                continue;
            }

            let shared: Vec<_> = applicable
                .iter()
                .filter(|(id, _)| view.applicable.contains(id))
                .collect();
            if shared.is_empty() {
                continue;
            }

            let mut equivalent = true;
            for (id, selector) in shared {
                match context.equivalent(id, &view.target.id, || {
                    selector.are_equivalent(&target, &view.target)
                }) {
                    Ok(true) => {}
                    Ok(false) => {
                        equivalent = false;
                        break;
                    }
                    Err(e) => {
                        warn!("{}: equivalence with {} unknown: {}", case.id, view.target.id, e);
                        equivalent = false;
                        break;
                    }
                }
            }

            if equivalent {
                covered_by = Some(view.target.id.clone());
                break;
            }
        }

        match covered_by {
            Some(other) => {
                debug!("{} on {} covered by {}", case.id, target.id, other);
                context.push_skipped(
                    TestResult::skipped(case, format!("Covered by equivalent target {}", other))
                        .with_target(&target_name)
                        .with_external_index(entry.external_index),
                );
                stats.skipped += 1;
            }
            None => {
                context.push_filtered(entry.clone());
                stats.run += 1;
            }
        }
    }

    context.conclude();
    debug!(
        "{} on {}: {} to run, {} skipped, {} not applicable",
        selection.name, target.id, stats.run, stats.skipped, stats.not_applicable
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AnyHardwareSelector, DeviceClass, PlatformSelector, TargetDescriptor, TestCase, TestGroup,
        TestOutcome,
    };
    use crate::selection::{Claim, ContextState, SelectionSlot};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingSelector {
        calls: AtomicUsize,
    }

    impl RealTargetSelector for CountingSelector {
        fn id(&self) -> String {
            "counting".to_string()
        }

        fn should_run_on(&self, _target: &TargetDescriptor) -> Result<bool, SelectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        fn are_equivalent(
            &self,
            _a: &TargetDescriptor,
            _b: &TargetDescriptor,
        ) -> Result<bool, SelectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
    }

    #[derive(Debug)]
    struct BrokenSelector {
        on_run: bool,
    }

    impl RealTargetSelector for BrokenSelector {
        fn id(&self) -> String {
            format!("broken:{}", self.on_run)
        }

        fn should_run_on(&self, _target: &TargetDescriptor) -> Result<bool, SelectorError> {
            if self.on_run {
                Err(SelectorError::new(self.id(), "device query failed"))
            } else {
                Ok(true)
            }
        }

        fn are_equivalent(
            &self,
            _a: &TargetDescriptor,
            _b: &TargetDescriptor,
        ) -> Result<bool, SelectorError> {
            Err(SelectorError::new(self.id(), "cannot compare"))
        }
    }

    fn selection(selectors: Vec<Vec<Arc<dyn RealTargetSelector>>>) -> Selection {
        let group = Arc::new(TestGroup::new("Hw.dll", 0, "Hw.Tests"));
        let mut selection = Selection::new("Hw.dll", DeviceClass::Physical, Vec::new());
        for (index, selectors) in selectors.into_iter().enumerate() {
            let mut case = TestCase::new(group.clone(), index, format!("Hw.Tests.Case{}", index));
            for selector in selectors {
                case = case.with_selector(selector);
            }
            selection.push(None, Arc::new(case));
        }
        selection
    }

    fn esp32(port: &str) -> TargetDescriptor {
        TargetDescriptor::physical(port, "ESP32", "ESP32_REV0")
    }

    fn run_on(slot: &SelectionSlot, target: &TargetDescriptor) -> ExecutionContext {
        let Claim::Claimed { mut context, concluded } = slot.claim(target) else {
            panic!("claim failed");
        };
        investigate(&mut context, slot.selection(), &concluded);
        slot.commit(&context);
        context
    }

    #[test]
    fn test_equivalent_targets_deduplicate() {
        let platform: Arc<dyn RealTargetSelector> = Arc::new(PlatformSelector {
            platform: "ESP32".to_string(),
        });
        let slot = SelectionSlot::new(Arc::new(selection(vec![vec![platform]])));

        let first = run_on(&slot, &esp32("COM3"));
        assert_eq!(first.filtered().len(), 1);
        assert_eq!(first.state(), ContextState::Running);

        let mut second = run_on(&slot, &esp32("COM4"));
        assert!(second.filtered().is_empty());
        assert_eq!(second.state(), ContextState::Done);
        let skipped = second.take_skipped();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].outcome, TestOutcome::Skipped);
        assert_eq!(skipped[0].messages, vec!["Covered by equivalent target COM3"]);
    }

    #[test]
    fn test_not_applicable_produces_nothing() {
        let stm32: Arc<dyn RealTargetSelector> = Arc::new(PlatformSelector {
            platform: "STM32".to_string(),
        });
        let slot = SelectionSlot::new(Arc::new(selection(vec![vec![stm32]])));

        let mut context = run_on(&slot, &esp32("COM3"));
        assert!(context.filtered().is_empty());
        assert!(context.take_skipped().is_empty());
        assert_eq!(context.state(), ContextState::Done);
    }

    #[test]
    fn test_predicate_failure_isolated_to_case() {
        let broken: Arc<dyn RealTargetSelector> = Arc::new(BrokenSelector { on_run: true });
        let any: Arc<dyn RealTargetSelector> = Arc::new(AnyHardwareSelector);
        let slot = SelectionSlot::new(Arc::new(selection(vec![vec![broken], vec![any]])));

        let mut context = run_on(&slot, &esp32("COM3"));
        assert_eq!(context.filtered().len(), 1);
        assert_eq!(context.filtered()[0].case.method_index, 1);

        let skipped = context.take_skipped();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].case.method, "Hw.Tests.Case0");
        assert!(skipped[0].messages[0].starts_with("Selection failed"));
        assert_eq!(skipped[0].target.as_deref(), Some("ESP32_REV0 (COM3)"));
    }

    #[test]
    fn test_one_true_predicate_is_enough() {
        let broken: Arc<dyn RealTargetSelector> = Arc::new(BrokenSelector { on_run: true });
        let any: Arc<dyn RealTargetSelector> = Arc::new(AnyHardwareSelector);
        let slot = SelectionSlot::new(Arc::new(selection(vec![vec![broken, any]])));

        let mut context = run_on(&slot, &esp32("COM3"));
        assert_eq!(context.filtered().len(), 1);
        assert!(context.take_skipped().is_empty());
        assert_eq!(context.take_log().len(), 1);
    }

    #[test]
    fn test_equivalence_error_voids_dedup() {
        let selector: Arc<dyn RealTargetSelector> = Arc::new(BrokenSelector { on_run: false });
        let slot = SelectionSlot::new(Arc::new(selection(vec![vec![selector]])));

        run_on(&slot, &esp32("COM3"));
        let second = run_on(&slot, &esp32("COM4"));
        assert_eq!(second.filtered().len(), 1);
    }

    #[test]
    fn test_predicates_evaluated_once_per_target() {
        let counting = Arc::new(CountingSelector::default());
        let shared: Arc<dyn RealTargetSelector> = counting.clone();
        let slot = SelectionSlot::new(Arc::new(selection(vec![
            vec![shared.clone()],
            vec![shared.clone()],
            vec![shared],
        ])));

        run_on(&slot, &esp32("COM3"));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        // one should_run_on plus one are_equivalent against COM3
        let second = run_on(&slot, &esp32("COM4"));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 3);
        assert_eq!(second.filtered().len(), 3);
        assert_eq!(second.equivalence_count(), 1);
    }
}
