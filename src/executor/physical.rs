//! Physical target control loop
//!
//! One loop per discovered device. The loop walks every outstanding
//! physical selection, investigates it for its device, and executes the
//! cases that are left. Access to the device goes through its transport lock.

use futures::future::select_all;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use super::session::{collect_results, guarded, skip_all, RunShared};
use crate::decoder::StatusDecoder;
use crate::device::{ExecuteRequest, PhysicalTarget, TargetError, TimeoutFactory};
use crate::selection::{investigate, Claim, ExecutionContext, SelectionSlot};

pub(crate) async fn run_physical_target(
    target: Arc<dyn PhysicalTarget>,
    slots: Arc<Vec<Arc<SelectionSlot>>>,
    shared: Arc<RunShared>,
) {
    let descriptor = target.descriptor().clone();
    let target_name = descriptor.display_name();
    info!("Control loop started for {}", target_name);

    let initialized = {
        let _guard = shared.locks.acquire(&descriptor.id).await;
        target.initialize().await
    };
    if let Err(e) = &initialized {
        warn!("{} failed to initialize: {}", target_name, e);
    }

    let mut outstanding: Vec<Arc<SelectionSlot>> = slots.iter().cloned().collect();
    while !outstanding.is_empty() {
        let mut deferred = Vec::new();
        for slot in outstanding {
            if shared.cancel.is_cancelled() {
                debug!("{} stops claiming work, run cancelled", target_name);
                return;
            }

            match slot.claim(&descriptor) {
                Claim::Taken => {}
                Claim::Busy => deferred.push(slot),
                Claim::Claimed { context, concluded } => {
                    let selection = slot.selection().clone();
                    let context = match catch_unwind(AssertUnwindSafe(|| {
                        let mut context = context;
                        investigate(&mut context, &selection, &concluded);
                        context
                    })) {
                        Ok(context) => context,
                        Err(_) => {
                            error!("Selection of {} for {} panicked", selection.name, target_name);
                            let mut context = ExecutionContext::new(descriptor.clone());
                            context.mark_done();
                            context
                        }
                    };
                    process(&target, &slot, context, initialized.as_ref().err(), &shared).await;
                }
            }
        }

        if deferred.is_empty() {
            break;
        }
        // Wake on whichever deferred selection concludes first, or poll
        let waits = deferred.iter().map(|slot| Box::pin(slot.wait_for_change()));
        select_all(waits).await;
        outstanding = deferred;
    }

    info!("Control loop finished for {}", target_name);
}

async fn process(
    target: &Arc<dyn PhysicalTarget>,
    slot: &SelectionSlot,
    mut context: ExecutionContext,
    init_error: Option<&TargetError>,
    shared: &RunShared,
) {
    let descriptor = context.target().clone();
    let target_name = descriptor.display_name();
    let selection = slot.selection().clone();

    let entries = context.filtered().to_vec();
    let prepared = if entries.is_empty() {
        Ok(Vec::new())
    } else if let Some(e) = init_error {
        Err(e.clone())
    } else {
        shared
            .launcher
            .prepare(&selection, &descriptor, &shared.run_id)
            .await
    };

    let artifacts = match prepared {
        Ok(artifacts) => artifacts,
        Err(e) => {
            // Cases this target cannot run stay open for equivalent targets
            context.abandon();
            slot.commit(&context);
            if !matches!(e, TargetError::Configuration(_)) || slot.first_config_error() {
                error!("{} skipped on {}: {}", selection.name, target_name, e);
            }
            shared.sink.post(context.take_skipped(), Some(&target_name));
            shared
                .sink
                .post(skip_all(&entries, &e.to_string(), Some(&target_name)), Some(&target_name));
            return;
        }
    };

    slot.commit(&context);
    shared.sink.post(context.take_skipped(), Some(&target_name));
    if entries.is_empty() {
        return;
    }

    info!(
        "Running {} test(s) of {} on {}",
        entries.len(),
        selection.name,
        target_name
    );

    let duration = shared.options.physical_timeout;
    let timeout = TimeoutFactory::new(&shared.cancel, duration);
    let decoder = Mutex::new(
        StatusDecoder::new(shared.run_id.clone(), &entries).with_target(&target_name),
    );
    let on_output = |chunk: &str| {
        decoder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .feed(chunk)
    };

    let ending = {
        let _guard = shared.locks.acquire(&descriptor.id).await;
        let request = ExecuteRequest {
            artifacts: &artifacts,
            log_level: shared.options.log_level,
            run_id: &shared.run_id,
            on_output: &on_output,
            cancel: shared.cancel.clone(),
        };
        guarded(target.execute(request, &timeout), &timeout, &shared.cancel).await
    };
    debug!("{} on {} ended: {:?}", selection.name, target_name, ending);

    let decoder = decoder.into_inner().unwrap_or_else(|e| e.into_inner());
    let results = collect_results(
        decoder,
        ending,
        &entries,
        &target_name,
        duration,
        context.take_log(),
    );
    shared.sink.post(results, Some(&target_name));
    slot.finish(&descriptor);
}

