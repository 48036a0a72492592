//! Result sinks

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::models::{TestCaseId, TestResult};

/// Receives result batches as targets produce them. Called concurrently.
pub trait ResultSink: Send + Sync {
    fn add_results(&self, results: Vec<TestResult>, target_name: Option<&str>);
}

/// Thread-safe collector of every posted result
#[derive(Debug, Default)]
pub struct CollectingSink {
    results: Mutex<Vec<TestResult>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<TestResult> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for CollectingSink {
    fn add_results(&self, results: Vec<TestResult>, _target_name: Option<&str>) {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(results);
    }
}

/// Forwards to the caller's sink and remembers what was posted
pub(crate) struct RecordingSink {
    inner: Arc<dyn ResultSink>,
    state: Mutex<Recorded>,
}

#[derive(Default)]
struct Recorded {
    results: Vec<TestResult>,
    reported: HashSet<TestCaseId>,
}

impl RecordingSink {
    pub fn new(inner: Arc<dyn ResultSink>) -> Self {
        Self {
            inner,
            state: Mutex::new(Recorded::default()),
        }
    }

    pub fn post(&self, results: Vec<TestResult>, target_name: Option<&str>) {
        if results.is_empty() {
            return;
        }
        for result in &results {
            info!("  {}", result);
        }

        // One lock for both so the caller sees batches in recorded order
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for result in &results {
            state.reported.insert(result.case.clone());
        }
        state.results.extend(results.iter().cloned());
        self.inner.add_results(results, target_name);
    }

    pub fn has_result(&self, case: &TestCaseId) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.reported.contains(case)
    }

    pub fn into_results(self) -> Vec<TestResult> {
        self.state
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .results
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::models::catalog::tests::sample_catalog;

    #[test]
    fn test_recording_sink_forwards() {
        let catalog = sample_catalog();
        let case = catalog.cases().next().unwrap().clone();
        let collector = Arc::new(CollectingSink::new());
        let sink = RecordingSink::new(collector.clone());

        sink.post(Vec::new(), None);
        assert!(collector.is_empty());

        sink.post(
            vec![TestResult::skipped(&case, "no physical target discovered")],
            Some("COM3"),
        );
        assert_eq!(collector.len(), 1);
        assert!(sink.has_result(&case.id));
        assert_eq!(sink.into_results().len(), 1);
    }
}
