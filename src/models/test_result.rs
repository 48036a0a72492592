//! Test result models
//!
//! Defines outcomes, per-case results and run summaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::test_case::{TestCase, TestCaseId};

/// Outcome of a test case on one target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    None,
    Passed,
    Failed,
    Skipped,
    NotFound,
}

impl TestOutcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestOutcome::None => "-",
            TestOutcome::Passed => "✓",
            TestOutcome::Failed => "✗",
            TestOutcome::Skipped => "○",
            TestOutcome::NotFound => "?",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::None => write!(f, "NONE"),
            TestOutcome::Passed => write!(f, "PASS"),
            TestOutcome::Failed => write!(f, "FAIL"),
            TestOutcome::Skipped => write!(f, "SKIP"),
            TestOutcome::NotFound => write!(f, "NOT FOUND"),
        }
    }
}

/// Result of a single test case
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub case: TestCaseId,
    pub display_name: String,
    pub outcome: TestOutcome,
    /// Target that produced the result; `None` means not executed anywhere
    pub target: Option<String>,
    pub duration_ms: u64,
    pub messages: Vec<String>,
    /// Best-effort result for a case whose group never finished
    #[serde(default)]
    pub inconclusive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_index: Option<usize>,
}

impl TestResult {
    pub fn new(case: &TestCase, outcome: TestOutcome) -> Self {
        Self {
            case: case.id.clone(),
            display_name: case.display_name.clone(),
            outcome,
            target: None,
            duration_ms: 0,
            messages: Vec::new(),
            inconclusive: false,
            external_index: None,
        }
    }

    pub fn passed(case: &TestCase, duration: Duration) -> Self {
        Self::new(case, TestOutcome::Passed).with_duration(duration)
    }

    pub fn failed(case: &TestCase, duration: Duration, message: impl Into<String>) -> Self {
        Self::new(case, TestOutcome::Failed)
            .with_duration(duration)
            .with_message(message)
    }

    pub fn skipped(case: &TestCase, reason: impl Into<String>) -> Self {
        Self::new(case, TestOutcome::Skipped).with_message(reason)
    }

    pub fn not_found(case: &TestCase, reason: impl Into<String>) -> Self {
        Self::new(case, TestOutcome::NotFound).with_message(reason)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        if !message.is_empty() {
            self.messages.push(message);
        }
        self
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = String>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn inconclusive(mut self) -> Self {
        self.inconclusive = true;
        self
    }

    pub fn with_external_index(mut self, index: Option<usize>) -> Self {
        self.external_index = index;
        self
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.outcome.symbol(),
            self.case,
            self.duration_ms
        )?;
        if let Some(target) = &self.target {
            write!(f, " on {target}")?;
        }
        if self.inconclusive {
            write!(f, " (inconclusive)")?;
        }
        if let Some(msg) = self.messages.first() {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Summary of one orchestrated run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_found: usize,
    pub targets_discovered: usize,
    pub total_duration_ms: u64,
    pub cancelled: bool,
    pub results: Vec<TestResult>,
}

impl RunSummary {
    pub fn new(results: Vec<TestResult>, elapsed: Duration) -> Self {
        let count = |outcome: TestOutcome| results.iter().filter(|r| r.outcome == outcome).count();

        Self {
            total: results.len(),
            passed: count(TestOutcome::Passed),
            failed: count(TestOutcome::Failed),
            skipped: count(TestOutcome::Skipped),
            not_found: count(TestOutcome::NotFound),
            targets_discovered: 0,
            total_duration_ms: elapsed.as_millis() as u64,
            cancelled: false,
            results,
        }
    }

    pub fn with_targets_discovered(mut self, count: usize) -> Self {
        self.targets_discovered = count;
        self
    }

    pub fn cancelled(mut self, cancelled: bool) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }

    /// Results for one case, across all targets
    pub fn results_for<'a>(&'a self, case: &'a TestCaseId) -> impl Iterator<Item = &'a TestResult> {
        self.results.iter().filter(move |r| &r.case == case)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test run - {} target(s)", self.targets_discovered)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Not found: {}",
            self.total, self.passed, self.failed, self.skipped, self.not_found
        )?;
        write!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )?;
        if self.cancelled {
            write!(f, " | cancelled")?;
        }
        writeln!(f)
    }
}
