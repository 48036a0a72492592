//! Per-(selection, target) execution state

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

use crate::models::{
    Selection, SelectionEntry, SelectorError, TargetDescriptor, TestCaseId, TestResult,
};

/// Upper bound on one wait for a concurrent investigation
pub const INVESTIGATION_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextState {
    /// Deciding which cases of the selection run on the target
    Investigating,
    /// Executing the filtered sub-selection
    Running,
    Done,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Investigating => write!(f, "investigating"),
            ContextState::Running => write!(f, "running"),
            ContextState::Done => write!(f, "done"),
        }
    }
}

/// Everything known about one selection on one target
#[derive(Debug)]
pub struct ExecutionContext {
    target: TargetDescriptor,
    state: ContextState,
    /// Memoized `should_run_on` verdicts, keyed by selector identity
    verdicts: HashMap<String, Result<bool, SelectorError>>,
    /// Memoized `are_equivalent` verdicts, keyed by selector identity and other target
    equivalence: HashMap<(String, String), Result<bool, SelectorError>>,
    filtered: Vec<SelectionEntry>,
    skipped: Vec<TestResult>,
    buffered_log: Vec<String>,
}

impl ExecutionContext {
    pub fn new(target: TargetDescriptor) -> Self {
        Self {
            target,
            state: ContextState::Investigating,
            verdicts: HashMap::new(),
            equivalence: HashMap::new(),
            filtered: Vec::new(),
            skipped: Vec::new(),
            buffered_log: Vec::new(),
        }
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Cases that run on this target, in selection order
    pub fn filtered(&self) -> &[SelectionEntry] {
        &self.filtered
    }

    pub(crate) fn push_filtered(&mut self, entry: SelectionEntry) {
        self.filtered.push(entry);
    }

    pub(crate) fn push_skipped(&mut self, result: TestResult) {
        self.skipped.push(result);
    }

    /// Results decided during investigation
    pub fn take_skipped(&mut self) -> Vec<TestResult> {
        std::mem::take(&mut self.skipped)
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.buffered_log.push(line.into());
    }

    pub fn take_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.buffered_log)
    }

    /// Memoized predicate evaluation
    pub(crate) fn verdict<F>(&mut self, selector: &str, evaluate: F) -> Result<bool, SelectorError>
    where
        F: FnOnce() -> Result<bool, SelectorError>,
    {
        self.verdicts
            .entry(selector.to_string())
            .or_insert_with(evaluate)
            .clone()
    }

    pub(crate) fn equivalent<F>(
        &mut self,
        selector: &str,
        other: &str,
        evaluate: F,
    ) -> Result<bool, SelectorError>
    where
        F: FnOnce() -> Result<bool, SelectorError>,
    {
        self.equivalence
            .entry((selector.to_string(), other.to_string()))
            .or_insert_with(evaluate)
            .clone()
    }

    pub fn verdict_count(&self) -> usize {
        self.verdicts.len()
    }

    pub fn equivalence_count(&self) -> usize {
        self.equivalence.len()
    }

    /// Leave Investigating
    pub(crate) fn conclude(&mut self) {
        self.state = if self.filtered.is_empty() {
            ContextState::Done
        } else {
            ContextState::Running
        };
    }

    pub fn mark_done(&mut self) {
        self.state = ContextState::Done;
    }

    /// Give up the filtered cases; the target no longer counts as covering them
    pub(crate) fn abandon(&mut self) {
        self.filtered.clear();
        self.state = ContextState::Done;
    }

    fn view(&self) -> ConcludedView {
        ConcludedView {
            target: self.target.clone(),
            covered: self.filtered.iter().map(|e| e.case.id.clone()).collect(),
            applicable: self
                .verdicts
                .iter()
                .filter(|(_, verdict)| matches!(verdict, Ok(true)))
                .map(|(selector, _)| selector.clone())
                .collect(),
        }
    }
}

/// Read-only snapshot of a concluded context, used for equivalence checks
#[derive(Clone, Debug)]
pub struct ConcludedView {
    pub target: TargetDescriptor,
    /// Cases assigned to the target
    pub covered: HashSet<TestCaseId>,
    /// Selectors that returned true on the target
    pub applicable: HashSet<String>,
}

/// Outcome of trying to start an investigation
#[derive(Debug)]
pub enum Claim {
    /// The caller now investigates; it owns the context until it commits
    Claimed {
        context: ExecutionContext,
        concluded: Vec<ConcludedView>,
    },
    /// Another target is investigating; wait and retry
    Busy,
    /// The target already has a context for this selection
    Taken,
}

/// A selection plus the contexts of every target that looked at it
#[derive(Debug)]
pub struct SelectionSlot {
    selection: Arc<Selection>,
    contexts: Mutex<HashMap<String, ExecutionContext>>,
    changed: Notify,
    config_error_logged: AtomicBool,
}

impl SelectionSlot {
    pub fn new(selection: Arc<Selection>) -> Self {
        Self {
            selection,
            contexts: Mutex::new(HashMap::new()),
            changed: Notify::new(),
            config_error_logged: AtomicBool::new(false),
        }
    }

    pub fn selection(&self) -> &Arc<Selection> {
        &self.selection
    }

    /// Start investigating on `target` unless someone else is
    pub fn claim(&self, target: &TargetDescriptor) -> Claim {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        if contexts.contains_key(&target.id) {
            return Claim::Taken;
        }
        if contexts
            .values()
            .any(|c| c.state == ContextState::Investigating)
        {
            return Claim::Busy;
        }

        let concluded = contexts.values().map(ExecutionContext::view).collect();
        contexts.insert(target.id.clone(), ExecutionContext::new(target.clone()));
        trace!("{} claimed {}", target.id, self.selection.name);

        Claim::Claimed {
            context: ExecutionContext::new(target.clone()),
            concluded,
        }
    }

    /// Store a concluded context and wake targets waiting on this selection
    pub fn commit(&self, context: &ExecutionContext) {
        {
            let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
            let stored = contexts
                .entry(context.target.id.clone())
                .or_insert_with(|| ExecutionContext::new(context.target.clone()));
            stored.state = context.state;
            stored.verdicts = context.verdicts.clone();
            stored.equivalence = context.equivalence.clone();
            stored.filtered = context.filtered.clone();
        }
        self.changed.notify_waiters();
    }

    /// Record the final state of a target's context
    pub fn finish(&self, target: &TargetDescriptor) {
        {
            let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(context) = contexts.get_mut(&target.id) {
                context.mark_done();
            }
        }
        self.changed.notify_waiters();
    }

    pub fn state_of(&self, target: &str) -> Option<ContextState> {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.get(target).map(|c| c.state)
    }

    /// Wait until another target finishes investigating, or the poll interval elapses
    pub async fn wait_for_change(&self) {
        let _ = tokio::time::timeout(INVESTIGATION_POLL, self.changed.notified()).await;
    }

    /// True the first time it is called
    pub fn first_config_error(&self) -> bool {
        !self.config_error_logged.swap(true, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::tests::sample_catalog;
    use crate::models::{DeviceClass, SelectionPlan, TargetClasses};

    fn physical_slot() -> SelectionSlot {
        let catalog = sample_catalog();
        let plan = SelectionPlan::build(
            &catalog,
            None,
            TargetClasses {
                virtual_targets: true,
                physical_targets: true,
            },
        );
        let selection = plan
            .of_class(DeviceClass::Physical)
            .next()
            .cloned()
            .unwrap();
        SelectionSlot::new(Arc::new(selection))
    }

    #[test]
    fn test_claim_is_exclusive_while_investigating() {
        let slot = physical_slot();
        let a = TargetDescriptor::physical("COM3", "ESP32", "ESP32_REV0");
        let b = TargetDescriptor::physical("COM4", "ESP32", "ESP32_REV0");

        let Claim::Claimed { mut context, concluded } = slot.claim(&a) else {
            panic!("first claim must succeed");
        };
        assert!(concluded.is_empty());
        assert!(matches!(slot.claim(&b), Claim::Busy));
        assert!(matches!(slot.claim(&a), Claim::Taken));

        context.conclude();
        slot.commit(&context);
        assert_eq!(slot.state_of("COM3"), Some(ContextState::Done));

        let Claim::Claimed { concluded, .. } = slot.claim(&b) else {
            panic!("claim after commit must succeed");
        };
        assert_eq!(concluded.len(), 1);
        assert_eq!(concluded[0].target.id, "COM3");
    }

    #[test]
    fn test_verdicts_are_memoized() {
        let mut context = ExecutionContext::new(TargetDescriptor::physical("COM3", "ESP32", "ESP32_REV0"));
        let mut calls = 0;
        for _ in 0..3 {
            let verdict = context.verdict("platform:esp32", || {
                calls += 1;
                Ok(true)
            });
            assert_eq!(verdict, Ok(true));
        }
        assert_eq!(calls, 1);
        assert_eq!(context.verdict_count(), 1);
    }

    #[test]
    fn test_config_error_logged_once() {
        let slot = physical_slot();
        assert!(slot.first_config_error());
        assert!(!slot.first_config_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_change_is_bounded() {
        let slot = physical_slot();
        let started = tokio::time::Instant::now();
        slot.wait_for_change().await;
        assert!(started.elapsed() >= INVESTIGATION_POLL);
    }
}
