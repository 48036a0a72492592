//! Virtual target pool
//!
//! Runs virtual selections concurrently on a bounded number of engine slots.

use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::session::{collect_results, guarded, skip_all, RunShared};
use crate::decoder::StatusDecoder;
use crate::device::{ExecuteRequest, TargetError, TimeoutFactory, VirtualTarget};
use crate::models::{Selection, TargetDescriptor};

/// Executes virtual selections, at most `max_concurrent` at a time
pub(crate) struct VirtualPool {
    target: Arc<dyn VirtualTarget>,
    max_concurrent: usize,
    free_slots: Mutex<Vec<usize>>,
}

impl VirtualPool {
    pub fn new(target: Arc<dyn VirtualTarget>, configured: Option<usize>, pending: usize) -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let max_concurrent = configured.unwrap_or(available).min(pending).max(1);
        Self {
            target,
            max_concurrent,
            free_slots: Mutex::new((0..max_concurrent).rev().collect()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run every selection, returning once all of them finished
    pub async fn run(self: Arc<Self>, selections: Vec<Arc<Selection>>, shared: Arc<RunShared>) {
        info!(
            "Running {} virtual selection(s) on {} slot(s)",
            selections.len(),
            self.max_concurrent()
        );

        let engine_override = shared.options.engine_override.as_deref();
        if let Err(e) = self.target.initialize(engine_override).await {
            for selection in &selections {
                error!("Virtual engine unavailable for {}: {}", selection.name, e);
                shared.sink.post(skip_all(selection.entries(), &e.to_string(), None), None);
            }
            return;
        }

        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();

        for selection in selections {
            let semaphore = semaphore.clone();
            let pool = self.clone();
            let shared = shared.clone();

            let handle = tokio::spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                    _ = shared.cancel.cancelled() => return,
                };
                if shared.cancel.is_cancelled() {
                    return;
                }

                let slot = pool.take_slot();
                pool.run_selection(&selection, slot, &shared).await;
                pool.release_slot(slot);
            });

            handles.push(handle);
        }

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!("Virtual execution task failed: {}", e);
            }
        }

        info!(
            "Virtual executions completed in {}ms",
            start.elapsed().as_millis()
        );
    }

    fn take_slot(&self) -> usize {
        let mut free = self.free_slots.lock().unwrap_or_else(|e| e.into_inner());
        free.pop().unwrap_or(0)
    }

    fn release_slot(&self, slot: usize) {
        let mut free = self.free_slots.lock().unwrap_or_else(|e| e.into_inner());
        free.push(slot);
    }

    async fn run_selection(&self, selection: &Selection, slot: usize, shared: &RunShared) {
        let descriptor = TargetDescriptor::virtual_slot(slot);
        let target_name = descriptor.display_name();
        debug!("Starting {} on {}", selection.name, target_name);

        let artifacts = match shared
            .launcher
            .prepare(selection, &descriptor, &shared.run_id)
            .await
        {
            Ok(artifacts) => artifacts,
            Err(e) => {
                match &e {
                    TargetError::Configuration(_) => error!("{}: {}", selection.name, e),
                    _ => warn!("{}: {}", selection.name, e),
                }
                shared.sink.post(
                    skip_all(selection.entries(), &e.to_string(), Some(&target_name)),
                    Some(&target_name),
                );
                return;
            }
        };

        let duration = shared.options.virtual_timeout;
        let timeout = TimeoutFactory::new(&shared.cancel, duration);
        let decoder = Mutex::new(
            StatusDecoder::new(shared.run_id.clone(), selection.entries()).with_target(&target_name),
        );
        let on_output = |chunk: &str| {
            decoder
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .feed(chunk)
        };

        // Virtual timeouts start with the execute call
        let request = ExecuteRequest {
            artifacts: &artifacts,
            log_level: shared.options.log_level,
            run_id: &shared.run_id,
            on_output: &on_output,
            cancel: timeout.token(),
        };
        let execution = self
            .target
            .execute(request, shared.options.engine_override.as_deref());
        let ending = guarded(execution, &timeout, &shared.cancel).await;
        debug!("{} on {} ended: {:?}", selection.name, target_name, ending);

        let decoder = decoder.into_inner().unwrap_or_else(|e| e.into_inner());
        let results = collect_results(
            decoder,
            ending,
            selection.entries(),
            &target_name,
            duration,
            Vec::new(),
        );
        shared.sink.post(results, Some(&target_name));
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;

    struct Idle;

    #[async_trait]
    impl VirtualTarget for Idle {
        async fn execute(&self, _request: ExecuteRequest<'_>, _engine: Option<&Path>) -> bool {
            true
        }
    }

    #[test]
    fn test_pool_size_bounded_by_pending() {
        let pool = VirtualPool::new(Arc::new(Idle), Some(8), 3);
        assert_eq!(pool.max_concurrent(), 3);

        let pool = VirtualPool::new(Arc::new(Idle), Some(2), 10);
        assert_eq!(pool.max_concurrent(), 2);

        let pool = VirtualPool::new(Arc::new(Idle), Some(0), 10);
        assert_eq!(pool.max_concurrent(), 1);
    }

    #[test]
    fn test_slots_are_reused() {
        let pool = VirtualPool::new(Arc::new(Idle), Some(2), 2);
        let a = pool.take_slot();
        let b = pool.take_slot();
        assert_ne!(a, b);
        pool.release_slot(a);
        assert_eq!(pool.take_slot(), a);
    }
}
