//! Physical device discovery

use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;

use super::PhysicalTarget;

/// Targets as they are found. The stream ends when discovery is complete.
pub type DiscoveryStream = BoxStream<'static, Arc<dyn PhysicalTarget>>;

/// Source of physical targets
pub trait DeviceDiscovery: Send + Sync {
    /// Find every target except those behind the excluded transports
    fn discover_all(&self, exclude: &[String]) -> DiscoveryStream;

    /// Find only the targets behind the named transports
    fn discover_selected(&self, ids: &[String]) -> DiscoveryStream;
}

/// Discovery over a fixed, already known set of targets
#[derive(Clone, Default)]
pub struct StaticDiscovery {
    targets: Vec<Arc<dyn PhysicalTarget>>,
}

impl StaticDiscovery {
    pub fn new(targets: Vec<Arc<dyn PhysicalTarget>>) -> Self {
        Self { targets }
    }

    fn filtered<F>(&self, keep: F) -> DiscoveryStream
    where
        F: Fn(&str) -> bool,
    {
        let found: Vec<_> = self
            .targets
            .iter()
            .filter(|t| keep(&t.descriptor().id))
            .cloned()
            .collect();
        stream::iter(found).boxed()
    }
}

impl DeviceDiscovery for StaticDiscovery {
    fn discover_all(&self, exclude: &[String]) -> DiscoveryStream {
        self.filtered(|id| !exclude.iter().any(|e| e == id))
    }

    fn discover_selected(&self, ids: &[String]) -> DiscoveryStream {
        self.filtered(|id| ids.iter().any(|e| e == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ExecuteRequest, TimeoutFactory};
    use crate::models::TargetDescriptor;
    use async_trait::async_trait;

    struct Idle(TargetDescriptor);

    #[async_trait]
    impl PhysicalTarget for Idle {
        fn descriptor(&self) -> &TargetDescriptor {
            &self.0
        }

        async fn execute(&self, _request: ExecuteRequest<'_>, _timeout: &TimeoutFactory) -> bool {
            true
        }
    }

    fn discovery() -> StaticDiscovery {
        StaticDiscovery::new(vec![
            Arc::new(Idle(TargetDescriptor::physical("COM3", "ESP32", "ESP32_REV0"))),
            Arc::new(Idle(TargetDescriptor::physical("COM4", "STM32", "ST_NUCLEO64_F091RC"))),
        ])
    }

    async fn ids(stream: DiscoveryStream) -> Vec<String> {
        stream.map(|t| t.descriptor().id.clone()).collect().await
    }

    #[tokio::test]
    async fn test_discover_all_with_exclusion() {
        let found = ids(discovery().discover_all(&["COM3".to_string()])).await;
        assert_eq!(found, vec!["COM4"]);
    }

    #[tokio::test]
    async fn test_discover_selected() {
        let found = ids(discovery().discover_selected(&["COM3".to_string(), "COM9".to_string()])).await;
        assert_eq!(found, vec!["COM3"]);
    }
}
