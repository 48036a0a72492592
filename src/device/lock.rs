//! Serialized access to physical transports
//!
//! A device does not support concurrent sessions. Every communication with
//! it happens while holding the lock named after its transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

/// Named locks keyed by transport identity
#[derive(Clone, Debug, Default)]
pub struct TransportLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TransportLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `transport`. Released when the guard drops.
    pub async fn acquire(&self, transport: &str) -> TransportGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(transport.to_string()).or_default().clone()
        };
        trace!("Waiting for transport {}", transport);
        let guard = lock.lock_owned().await;
        trace!("Acquired transport {}", transport);
        TransportGuard {
            transport: transport.to_string(),
            _guard: guard,
        }
    }

    /// Whether someone currently holds the transport
    pub fn is_locked(&self, transport: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(transport)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// Exclusive access to one transport
#[derive(Debug)]
pub struct TransportGuard {
    transport: String,
    _guard: OwnedMutexGuard<()>,
}

impl TransportGuard {
    pub fn transport(&self) -> &str {
        &self.transport
    }
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        trace!("Released transport {}", self.transport);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_transport_is_exclusive() {
        let locks = TransportLocks::new();
        let guard = locks.acquire("COM3").await;
        assert!(locks.is_locked("COM3"));
        assert!(!locks.is_locked("COM4"));

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("COM3").await.transport().to_string() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        assert_eq!(waiter.await.unwrap(), "COM3");
    }

    #[tokio::test]
    async fn test_released_when_task_aborted() {
        let locks = TransportLocks::new();
        let holder = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("COM7").await;
                std::future::pending::<()>().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(locks.is_locked("COM7"));

        holder.abort();
        let _ = holder.await;
        assert!(!locks.is_locked("COM7"));
    }
}
