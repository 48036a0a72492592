//! Run orchestration
//!
//! Plans the selections of a catalog, drives the virtual pool and one
//! control loop per discovered physical target, and makes sure every case
//! ends the run with at least one result.

use futures::future::join_all;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::parallel::VirtualPool;
use super::physical::run_physical_target;
use super::session::{RunShared, CANCELLED};
use super::sink::{RecordingSink, ResultSink};
use crate::decoder::RunId;
use crate::device::{
    DeviceDiscovery, LauncherBuilder, PrebuiltLauncher, TargetLogLevel, TransportLocks,
    VirtualTarget,
};
use crate::models::{
    DeviceClass, RunSummary, Selection, SelectionPlan, TargetClasses, TestCase, TestCaseId,
    TestCatalog, TestResult,
};
use crate::selection::SelectionSlot;

pub const NO_ELIGIBLE_TARGET: &str = "No eligible physical target discovered";
pub const NO_TARGET: &str = "No physical target discovered";
pub const FILTERED_OUT: &str = "Filtered by run configuration";
pub const NO_VIRTUAL_RESULT: &str = "Virtual execution produced no result";

/// Settings for one run
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub classes: TargetClasses,
    /// `None` means one slot per logical processor
    pub max_virtual_targets: Option<usize>,
    pub virtual_timeout: Duration,
    pub physical_timeout: Duration,
    pub log_level: TargetLogLevel,
    pub engine_override: Option<PathBuf>,
    /// Only probe these transports when non-empty
    pub ports: Vec<String>,
    pub exclude_ports: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            classes: TargetClasses::default(),
            max_virtual_targets: None,
            virtual_timeout: Duration::from_secs(120),
            physical_timeout: Duration::from_secs(120),
            log_level: TargetLogLevel::default(),
            engine_override: None,
            ports: Vec::new(),
            exclude_ports: Vec::new(),
        }
    }
}

/// Schedules a catalog onto virtual and physical targets
pub struct Orchestrator {
    options: RunOptions,
    virtual_target: Option<Arc<dyn VirtualTarget>>,
    discovery: Option<Arc<dyn DeviceDiscovery>>,
    launcher: Arc<dyn LauncherBuilder>,
}

impl Orchestrator {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            virtual_target: None,
            discovery: None,
            launcher: Arc::new(PrebuiltLauncher::new()),
        }
    }

    pub fn with_virtual_target(mut self, target: Arc<dyn VirtualTarget>) -> Self {
        self.virtual_target = Some(target);
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn DeviceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn LauncherBuilder>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run `subset` of the catalog (everything when `None`).
    ///
    /// Results are posted to `sink` as they become available. Cancelling
    /// `cancel` stops new executions and flushes the running ones.
    pub async fn run(
        &self,
        catalog: &TestCatalog,
        subset: Option<&[TestCaseId]>,
        sink: Arc<dyn ResultSink>,
        cancel: CancellationToken,
    ) -> RunSummary {
        let start = Instant::now();
        let run_id = RunId::random();
        let plan = SelectionPlan::build(catalog, subset, self.options.classes);
        info!(
            "Starting run {} with {} test(s) in {} selection(s)",
            run_id,
            plan.case_count(),
            plan.selections.len()
        );

        let shared = Arc::new(RunShared {
            run_id,
            options: self.options.clone(),
            sink: RecordingSink::new(sink),
            launcher: self.launcher.clone(),
            locks: TransportLocks::new(),
            cancel: cancel.clone(),
        });

        let virtual_selections: Vec<Arc<Selection>> = plan
            .of_class(DeviceClass::Virtual)
            .cloned()
            .map(Arc::new)
            .collect();
        let physical_slots: Vec<Arc<SelectionSlot>> = plan
            .of_class(DeviceClass::Physical)
            .cloned()
            .map(|s| Arc::new(SelectionSlot::new(Arc::new(s))))
            .collect();

        let virtual_run = self.run_virtual(virtual_selections, shared.clone());
        let physical_run = self.run_physical(physical_slots, shared.clone());
        let ((), targets_discovered) = tokio::join!(virtual_run, physical_run);

        let completion = self.complete(&plan, catalog, subset, targets_discovered, &shared);
        shared.sink.post(completion, None);

        let results = match Arc::try_unwrap(shared) {
            Ok(shared) => shared.sink.into_results(),
            Err(_) => {
                error!("Run state still shared after all targets finished");
                Vec::new()
            }
        };

        let summary = RunSummary::new(results, start.elapsed())
            .with_targets_discovered(targets_discovered)
            .cancelled(cancel.is_cancelled());
        info!(
            "Run completed in {}ms - Pass: {}/{} ({:.1}%)",
            summary.total_duration_ms,
            summary.passed,
            summary.total,
            summary.pass_rate()
        );
        summary
    }

    async fn run_virtual(&self, selections: Vec<Arc<Selection>>, shared: Arc<RunShared>) {
        if selections.is_empty() {
            return;
        }
        let Some(target) = &self.virtual_target else {
            for selection in &selections {
                error!("No virtual target configured for {}", selection.name);
            }
            return;
        };

        let pool = Arc::new(VirtualPool::new(
            target.clone(),
            self.options.max_virtual_targets,
            selections.len(),
        ));
        pool.run(selections, shared).await;
    }

    /// Returns the number of targets discovered
    async fn run_physical(&self, slots: Vec<Arc<SelectionSlot>>, shared: Arc<RunShared>) -> usize {
        if slots.is_empty() {
            return 0;
        }
        let Some(discovery) = &self.discovery else {
            warn!("Physical tests selected but no discovery configured");
            return 0;
        };

        let mut stream = if self.options.ports.is_empty() {
            discovery.discover_all(&self.options.exclude_ports)
        } else {
            discovery.discover_selected(&self.options.ports)
        };

        let slots = Arc::new(slots);
        let mut seen = HashSet::new();
        let mut handles = Vec::new();

        loop {
            let target = tokio::select! {
                next = stream.next() => match next {
                    Some(target) => target,
                    None => break,
                },
                _ = shared.cancel.cancelled() => break,
            };

            let id = target.descriptor().id.clone();
            if self.options.exclude_ports.contains(&id) || !seen.insert(id.clone()) {
                debug!("Ignoring {}", id);
                continue;
            }

            info!("Discovered {}", target.descriptor().display_name());
            handles.push(tokio::spawn(run_physical_target(
                target,
                slots.clone(),
                shared.clone(),
            )));
        }

        if seen.is_empty() {
            warn!("No physical target discovered");
        }
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!("Physical target task failed: {}", e);
            }
        }
        seen.len()
    }

    /// Skipped results for every case nothing reported on
    fn complete(
        &self,
        plan: &SelectionPlan,
        catalog: &TestCatalog,
        subset: Option<&[TestCaseId]>,
        targets_discovered: usize,
        shared: &RunShared,
    ) -> Vec<TestResult> {
        let filtered_out: HashSet<&TestCaseId> = plan.filtered_out.iter().map(|c| &c.id).collect();
        let physical: HashSet<&TestCaseId> = plan
            .of_class(DeviceClass::Physical)
            .flat_map(|s| s.entries().iter().map(|e| &e.case.id))
            .collect();

        let positions = subset.map(|ids| {
            ids.iter()
                .enumerate()
                .map(|(i, id)| (id, i))
                .collect::<HashMap<_, _>>()
        });

        let mut missing = Vec::new();
        for case in catalog.cases() {
            let external_index = match &positions {
                Some(positions) => match positions.get(&case.id) {
                    Some(index) => Some(*index),
                    None => continue,
                },
                None => None,
            };
            if shared.sink.has_result(&case.id) {
                continue;
            }

            let reason = completion_reason(
                case,
                shared.cancel.is_cancelled(),
                filtered_out.contains(&case.id),
                physical.contains(&case.id),
                targets_discovered,
            );
            missing.push(TestResult::skipped(case, reason).with_external_index(external_index));
        }

        if let Some(ids) = subset {
            let known: HashSet<&TestCaseId> = catalog.cases().map(|c| &c.id).collect();
            for id in ids.iter().filter(|id| !known.contains(id)) {
                warn!("{} is not in the catalog", id);
            }
        }
        if !missing.is_empty() {
            info!("{} test(s) did not run", missing.len());
        }
        missing
    }
}

fn completion_reason(
    case: &TestCase,
    cancelled: bool,
    filtered_out: bool,
    physical: bool,
    targets_discovered: usize,
) -> &'static str {
    if filtered_out {
        FILTERED_OUT
    } else if cancelled {
        CANCELLED
    } else if physical && targets_discovered == 0 {
        NO_TARGET
    } else if physical {
        NO_ELIGIBLE_TARGET
    } else {
        debug!("{} has no virtual result", case.id);
        NO_VIRTUAL_RESULT
    }
}
