//! One execution of a filtered selection on one target

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::runner::RunOptions;
use super::sink::RecordingSink;
use crate::decoder::{RunId, StatusDecoder};
use crate::device::{LauncherBuilder, TimeoutFactory, TransportLocks};
use crate::models::{SelectionEntry, TestCaseId, TestResult};

/// Time a target gets to return after its token fired
pub const EXECUTION_GRACE: Duration = Duration::from_secs(2);

pub const CANCELLED: &str = "Run was cancelled";

/// State shared by every task of one run
pub(crate) struct RunShared {
    pub run_id: RunId,
    pub options: RunOptions,
    pub sink: RecordingSink,
    pub launcher: Arc<dyn LauncherBuilder>,
    pub locks: TransportLocks,
    pub cancel: CancellationToken,
}

/// How an execution call ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Ending {
    Completed(bool),
    TimedOut,
    Cancelled,
}

/// Await `execution`, giving up once the timeout or the run's cancellation
/// fired and the target did not return within the grace period.
pub(crate) async fn guarded<F>(
    execution: F,
    timeout: &TimeoutFactory,
    cancel: &CancellationToken,
) -> Ending
where
    F: Future<Output = bool>,
{
    let finished = tokio::select! {
        ok = execution => Some(ok),
        _ = async {
            timeout.expired().await;
            tokio::time::sleep(EXECUTION_GRACE).await;
        } => None,
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(EXECUTION_GRACE).await;
        } => None,
    };

    if cancel.is_cancelled() {
        Ending::Cancelled
    } else if timeout.timed_out() {
        Ending::TimedOut
    } else {
        match finished {
            Some(ok) => Ending::Completed(ok),
            None => Ending::TimedOut,
        }
    }
}

/// Turn what the decoder saw into one result per filtered case, in filtered order
pub(crate) fn collect_results(
    decoder: StatusDecoder,
    ending: Ending,
    entries: &[SelectionEntry],
    target_name: &str,
    timeout: Duration,
    log: Vec<String>,
) -> Vec<TestResult> {
    let mut results = match ending {
        Ending::TimedOut => {
            let decoded = decoder.flush(false);
            let mut results = decoded.results;
            let concluded: HashSet<TestCaseId> = results.iter().map(|r| r.case.clone()).collect();
            let reason = format!("Execution timed out after {}s", timeout.as_secs());
            for entry in entries.iter().filter(|e| !concluded.contains(&e.case.id)) {
                results.push(
                    TestResult::skipped(&entry.case, reason.clone())
                        .with_target(target_name)
                        .with_external_index(entry.external_index),
                );
            }
            attach(&mut results, decoded.stray_lines);
            results
        }
        Ending::Completed(ok) => {
            let decoded = decoder.flush(true);
            if !ok && !decoded.all_done {
                debug!("{} reported failure before completing", target_name);
            }
            let mut results = decoded.results;
            attach(&mut results, decoded.stray_lines);
            results
        }
        Ending::Cancelled => {
            let decoded = decoder.flush(true);
            let mut results = decoded.results;
            for result in results.iter_mut().filter(|r| r.inconclusive) {
                result.messages.push(CANCELLED.to_string());
            }
            attach(&mut results, decoded.stray_lines);
            results
        }
    };

    let order: HashMap<&TestCaseId, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (&e.case.id, i))
        .collect();
    results.sort_by_key(|r| order.get(&r.case).copied().unwrap_or(usize::MAX));

    if results.len() < entries.len() {
        warn!(
            "{}: {} of {} tests produced no result",
            target_name,
            entries.len() - results.len(),
            entries.len()
        );
    }

    attach_front(&mut results, log);
    results
}

/// Skipped results for every entry, e.g. after a failed bring-up
pub(crate) fn skip_all(
    entries: &[SelectionEntry],
    reason: &str,
    target_name: Option<&str>,
) -> Vec<TestResult> {
    entries
        .iter()
        .map(|entry| {
            let result = TestResult::skipped(&entry.case, reason)
                .with_external_index(entry.external_index);
            match target_name {
                Some(name) => result.with_target(name),
                None => result,
            }
        })
        .collect()
}

fn attach(results: &mut [TestResult], lines: Vec<String>) {
    if let Some(first) = results.first_mut() {
        first
            .messages
            .extend(lines.into_iter().map(|l| l.trim_end().to_string()));
    }
}

fn attach_front(results: &mut [TestResult], lines: Vec<String>) {
    if lines.is_empty() {
        return;
    }
    if let Some(first) = results.first_mut() {
        let mut messages = lines;
        messages.append(&mut first.messages);
        first.messages = messages;
    }
}
