//! Status stream decoder
//!
//! Reassembles results from the text a target writes while it runs a set
//! of cases. The stream is append-only and interleaves status lines with
//! arbitrary test output; output lines are attached to the case that is
//! running when they arrive.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

use super::protocol::{Entity, RunId, StatusLine, Verb};
use crate::models::{SelectionEntry, TestOutcome, TestResult};

/// Message for cases a finished group never reported
pub const NOT_REPORTED: &str = "Test was not reported by the target";
/// Message for cases whose group was cut short
pub const INCOMPLETE: &str = "Execution ended before the test group completed";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GroupPhase {
    NotStarted,
    Running,
    Terminal,
}

#[derive(Debug)]
struct GroupState {
    phase: GroupPhase,
    slots: Vec<usize>,
    current: Option<usize>,
    /// Output accumulated since the last emitted result
    log: Vec<String>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            phase: GroupPhase::NotStarted,
            slots: Vec::new(),
            current: None,
            log: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct CaseSlot {
    entry: SelectionEntry,
    result: Option<TestResult>,
}

/// Output of a flushed decoder
#[derive(Debug, Default)]
pub struct DecodedRun {
    /// Results in selection order
    pub results: Vec<TestResult>,
    /// Output that could not be attributed to any group
    pub stray_lines: Vec<String>,
    pub all_done: bool,
}

/// Decoder for one target running one filtered selection
#[derive(Debug)]
pub struct StatusDecoder {
    run_id: RunId,
    target: Option<String>,
    slots: Vec<CaseSlot>,
    groups: BTreeMap<usize, GroupState>,
    lookup: HashMap<(usize, usize, Option<usize>), usize>,
    current_group: Option<usize>,
    partial: String,
    stray_lines: Vec<String>,
    foreign_lines: usize,
    all_done: bool,
}

impl StatusDecoder {
    pub fn new(run_id: RunId, entries: &[SelectionEntry]) -> Self {
        let mut groups: BTreeMap<usize, GroupState> = BTreeMap::new();
        let mut lookup = HashMap::new();
        let mut slots = Vec::with_capacity(entries.len());

        for (slot, entry) in entries.iter().enumerate() {
            let case = &entry.case;
            groups
                .entry(case.group.index)
                .or_insert_with(GroupState::new)
                .slots
                .push(slot);
            lookup.insert(
                (case.group.index, case.method_index, case.id.data_row),
                slot,
            );
            slots.push(CaseSlot {
                entry: entry.clone(),
                result: None,
            });
        }

        Self {
            run_id,
            target: None,
            slots,
            groups,
            lookup,
            current_group: None,
            partial: String::new(),
            stray_lines: Vec::new(),
            foreign_lines: 0,
            all_done: false,
        }
    }

    /// Name of the target attached to every produced result
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn is_all_done(&self) -> bool {
        self.all_done
    }

    /// Number of cases that already have a result
    pub fn resolved(&self) -> usize {
        self.slots.iter().filter(|s| s.result.is_some()).count()
    }

    /// Feed a chunk of output. Partial lines are kept until their newline arrives.
    pub fn feed(&mut self, chunk: &str) {
        self.partial.push_str(chunk);
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.process_line(line.trim_end_matches(['\r', '\n']));
        }
    }

    /// Consume the decoder once execution has ended.
    ///
    /// With `force`, cases in groups that never reached a terminal verb get
    /// best-effort results flagged inconclusive. Without it only results of
    /// concluded groups are returned.
    pub fn flush(mut self, force: bool) -> DecodedRun {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.process_line(line.trim_end_matches('\r'));
        }
        if self.foreign_lines > 0 {
            debug!(
                "Ignored {} status lines from other runs",
                self.foreign_lines
            );
        }

        let mut include = vec![false; self.slots.len()];
        let group_ids: Vec<usize> = self.groups.keys().copied().collect();
        for class in group_ids {
            let (phase, slots) = {
                let group = &self.groups[&class];
                (group.phase, group.slots.clone())
            };
            if phase == GroupPhase::Terminal {
                for slot in slots {
                    include[slot] = true;
                }
            } else if force {
                let log = self.take_group_log(class);
                for slot in slots {
                    let result = match self.slots[slot].result.take() {
                        Some(result) => result,
                        None => self
                            .result_for(slot, TestOutcome::Skipped)
                            .with_message(INCOMPLETE),
                    };
                    self.slots[slot].result = Some(result.inconclusive());
                    include[slot] = true;
                }
                self.append_to_last(class, log);
            }
        }

        let results = self
            .slots
            .into_iter()
            .zip(include)
            .filter_map(|(slot, include)| if include { slot.result } else { None })
            .collect();

        DecodedRun {
            results,
            stray_lines: self.stray_lines,
            all_done: self.all_done,
        }
    }

    fn process_line(&mut self, line: &str) {
        if self.all_done || line.is_empty() {
            return;
        }

        let status = match line.parse::<StatusLine>() {
            Ok(status) => status,
            Err(_) => {
                self.append_output(line);
                return;
            }
        };

        if status.run_id != self.run_id.as_str() {
            self.foreign_lines += 1;
            trace!("Ignoring status line from run {}", status.run_id);
            return;
        }

        trace!("{}", status);
        match status.entity {
            Entity::Group { class } => self.group_event(class, &status),
            Entity::Method {
                class,
                method,
                data_row,
            } => match self.lookup.get(&(class, method, data_row)).copied() {
                Some(slot) => self.method_event(class, slot, &status),
                None if status.verb == Verb::AllDone => self.finish_run(),
                None => debug!("Status line for unknown test {}", status.entity),
            },
        }
    }

    fn group_event(&mut self, class: usize, status: &StatusLine) {
        if status.verb == Verb::AllDone {
            self.finish_run();
            return;
        }
        if !self.groups.contains_key(&class) {
            debug!("Status line for unknown group {}", class);
            return;
        }

        match status.verb {
            Verb::Start => {
                if let Some(group) = self.groups.get_mut(&class) {
                    group.phase = GroupPhase::Running;
                }
                self.current_group = Some(class);
            }
            Verb::SetupFailed => {
                let reason = failure_message("Setup failed", status.detail.as_deref());
                self.resolve_remaining(class, TestOutcome::Skipped, &reason);
            }
            Verb::Skipped => {
                let reason = failure_message("Group skipped", status.detail.as_deref());
                self.resolve_remaining(class, TestOutcome::Skipped, &reason);
            }
            Verb::CleanupFailed => {
                let reason = failure_message("Cleanup failed", status.detail.as_deref());
                let slots = self.groups[&class].slots.clone();
                for slot in slots {
                    if let Some(result) = self.slots[slot].result.as_mut() {
                        result.messages.push(reason.clone());
                    }
                }
            }
            Verb::Done => {
                self.resolve_remaining(class, TestOutcome::NotFound, NOT_REPORTED);
                let log = self.take_group_log(class);
                self.append_to_last(class, log);
                if let Some(group) = self.groups.get_mut(&class) {
                    group.phase = GroupPhase::Terminal;
                }
                if self.current_group == Some(class) {
                    self.current_group = None;
                }
            }
            Verb::Instantiate
            | Verb::Setup
            | Verb::SetupComplete
            | Verb::TestsComplete
            | Verb::Cleanup
            | Verb::Dispose => {}
            Verb::Pass | Verb::Fail | Verb::AllDone => {
                debug!("Unexpected {} for group {}", status.verb, class);
            }
        }
    }

    fn method_event(&mut self, class: usize, slot: usize, status: &StatusLine) {
        match status.verb {
            Verb::Start => {
                if let Some(group) = self.groups.get_mut(&class) {
                    if group.phase == GroupPhase::NotStarted {
                        group.phase = GroupPhase::Running;
                    }
                    group.current = Some(slot);
                }
                self.current_group = Some(class);
            }
            Verb::Pass => {
                let result = self
                    .result_for(slot, TestOutcome::Passed)
                    .with_duration(status.duration());
                self.resolve(class, slot, result, status.detail.as_deref());
            }
            Verb::Fail => {
                let result = self
                    .result_for(slot, TestOutcome::Failed)
                    .with_duration(status.duration());
                self.resolve(class, slot, result, status.detail.as_deref());
            }
            Verb::Skipped => {
                let result = self.result_for(slot, TestOutcome::Skipped);
                self.resolve(class, slot, result, status.detail.as_deref());
            }
            Verb::SetupFailed => {
                let reason = failure_message("Setup failed", status.detail.as_deref());
                let result = self.result_for(slot, TestOutcome::Skipped);
                self.resolve(class, slot, result, Some(reason.as_str()));
            }
            Verb::CleanupFailed => {
                let reason = failure_message("Cleanup failed", status.detail.as_deref());
                if let Some(result) = self.slots[slot].result.as_mut() {
                    result.messages.push(reason);
                }
            }
            Verb::AllDone => self.finish_run(),
            Verb::Instantiate
            | Verb::Setup
            | Verb::SetupComplete
            | Verb::TestsComplete
            | Verb::Cleanup
            | Verb::Dispose
            | Verb::Done => {}
        }
    }

    /// The all-done sentinel ends the whole run, not just one group
    fn finish_run(&mut self) {
        let classes: Vec<usize> = self.groups.keys().copied().collect();
        for class in classes {
            match self.groups[&class].phase {
                GroupPhase::Terminal => {}
                GroupPhase::Running => {
                    let slots = self.groups[&class].slots.clone();
                    for slot in slots {
                        let result = match self.slots[slot].result.take() {
                            Some(result) => result,
                            None => self
                                .result_for(slot, TestOutcome::Skipped)
                                .with_message(INCOMPLETE),
                        };
                        self.slots[slot].result = Some(result.inconclusive());
                    }
                    let log = self.take_group_log(class);
                    self.append_to_last(class, log);
                }
                GroupPhase::NotStarted => {
                    self.resolve_remaining(class, TestOutcome::NotFound, NOT_REPORTED);
                }
            }
            if let Some(group) = self.groups.get_mut(&class) {
                group.phase = GroupPhase::Terminal;
            }
        }
        self.current_group = None;
        self.all_done = true;
    }

    fn resolve(&mut self, class: usize, slot: usize, result: TestResult, detail: Option<&str>) {
        if self.slots[slot].result.is_some() {
            debug!("Duplicate result for {}", self.slots[slot].entry.case.id);
            return;
        }
        let log = self.take_group_log(class);
        let mut result = result.with_messages(log);
        if let Some(detail) = detail {
            result = result.with_message(detail);
        }
        self.slots[slot].result = Some(result);
        if let Some(group) = self.groups.get_mut(&class) {
            if group.current == Some(slot) {
                group.current = None;
            }
        }
    }

    fn resolve_remaining(&mut self, class: usize, outcome: TestOutcome, reason: &str) {
        let slots = self.groups[&class].slots.clone();
        let log = self.take_group_log(class);
        let mut first = true;
        for slot in slots {
            if self.slots[slot].result.is_some() {
                continue;
            }
            let mut result = self.result_for(slot, outcome);
            if first {
                result = result.with_messages(log.iter().cloned());
                first = false;
            }
            self.slots[slot].result = Some(result.with_message(reason));
        }
        if first {
            self.append_to_last(class, log);
        }
    }

    fn append_output(&mut self, line: &str) {
        match self.current_group.and_then(|c| self.groups.get_mut(&c)) {
            Some(group) => group.log.push(line.to_string()),
            None => self.stray_lines.push(line.to_string()),
        }
    }

    fn take_group_log(&mut self, class: usize) -> Vec<String> {
        self.groups
            .get_mut(&class)
            .map(|g| std::mem::take(&mut g.log))
            .unwrap_or_default()
    }

    /// Attach trailing output to the group's last resolved result
    fn append_to_last(&mut self, class: usize, log: Vec<String>) {
        if log.is_empty() {
            return;
        }
        let last = self.groups[&class]
            .slots
            .iter()
            .rev()
            .find(|slot| self.slots[**slot].result.is_some())
            .copied();
        match last.and_then(|slot| self.slots[slot].result.as_mut()) {
            Some(result) => result.messages.extend(log),
            None => self.stray_lines.extend(log),
        }
    }

    fn result_for(&self, slot: usize, outcome: TestOutcome) -> TestResult {
        let entry = &self.slots[slot].entry;
        let mut result = TestResult::new(&entry.case, outcome)
            .with_external_index(entry.external_index);
        if let Some(target) = &self.target {
            result = result.with_target(target.clone());
        }
        result
    }
}

fn failure_message(prefix: &str, detail: Option<&str>) -> String {
    match detail {
        Some(detail) if !detail.is_empty() => format!("{prefix}: {detail}"),
        _ => prefix.to_string(),
    }
}
