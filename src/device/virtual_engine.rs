//! Virtual execution engine run as a local process

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::process::{expand_template, stream_process};
use super::{ExecuteRequest, TargetError, VirtualTarget};

/// Arguments passed to the engine when none are configured
pub const DEFAULT_ENGINE_ARGS: &[&str] = &["--run-id", "{run_id}", "--log-level", "{log_level}", "{artifacts}"];

/// Runs the configured engine executable once per execution
#[derive(Clone, Debug)]
pub struct ProcessVirtualTarget {
    engine: Option<PathBuf>,
    args: Vec<String>,
}

impl ProcessVirtualTarget {
    pub fn new(engine: Option<PathBuf>) -> Self {
        Self {
            engine,
            args: DEFAULT_ENGINE_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the argument template (`{run_id}`, `{log_level}`, `{artifacts}`)
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        if !args.is_empty() {
            self.args = args;
        }
        self
    }

    fn check_engine(engine: &Path) -> Result<(), TargetError> {
        // Bare names are looked up on PATH when spawned
        if engine.components().count() > 1 && !engine.exists() {
            return Err(TargetError::Configuration(format!(
                "virtual engine not found: {}",
                engine.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VirtualTarget for ProcessVirtualTarget {
    async fn initialize(&self, engine_override: Option<&Path>) -> Result<(), TargetError> {
        match engine_override.or(self.engine.as_deref()) {
            Some(engine) => Self::check_engine(engine),
            None => Err(TargetError::Configuration("no virtual engine configured".to_string())),
        }
    }

    async fn execute(&self, request: ExecuteRequest<'_>, engine_override: Option<&Path>) -> bool {
        let Some(engine) = engine_override.or(self.engine.as_deref()) else {
            warn!("No virtual engine configured");
            return false;
        };

        let mut vars = HashMap::new();
        vars.insert("run_id", request.run_id.to_string());
        vars.insert("log_level", request.log_level.to_string());
        let artifacts: Vec<String> = request
            .artifacts
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let args = expand_template(&self.args, &vars, &artifacts);

        let program = engine.to_string_lossy();
        match stream_process(&program, &args, request.on_output, &request.cancel).await {
            Ok(ok) => ok,
            Err(e) => {
                debug!("Virtual engine run failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::RunId;
    use crate::device::TargetLogLevel;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_initialize_requires_engine() {
        let target = ProcessVirtualTarget::new(None);
        assert!(matches!(target.initialize(None).await, Err(TargetError::Configuration(_))));

        let target = ProcessVirtualTarget::new(Some(PathBuf::from("/nonexistent/devrunner/engine")));
        assert!(target.initialize(None).await.is_err());

        let target = ProcessVirtualTarget::new(Some(PathBuf::from("sh")));
        assert!(target.initialize(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_initialize_accepts_override_without_configured_engine() {
        let target = ProcessVirtualTarget::new(None);
        assert!(target.initialize(Some(Path::new("sh"))).await.is_ok());

        let target = ProcessVirtualTarget::new(Some(PathBuf::from("sh")));
        let missing = Path::new("/nonexistent/devrunner/engine");
        assert!(matches!(
            target.initialize(Some(missing)).await,
            Err(TargetError::Configuration(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_with_override() {
        let target = ProcessVirtualTarget::new(None).with_args(vec![
            "-c".to_string(),
            "echo $0 $1".to_string(),
            "{run_id}".to_string(),
            "{artifacts}".to_string(),
        ]);
        let output = Mutex::new(String::new());
        let on_output = |s: &str| output.lock().unwrap().push_str(s);
        let run_id = RunId::from("cafe0001");
        let artifacts = vec![PathBuf::from("Sample.pe")];

        let ok = target
            .execute(
                ExecuteRequest {
                    artifacts: &artifacts,
                    log_level: TargetLogLevel::None,
                    run_id: &run_id,
                    on_output: &on_output,
                    cancel: CancellationToken::new(),
                },
                Some(Path::new("sh")),
            )
            .await;

        assert!(ok);
        assert_eq!(*output.lock().unwrap(), "cafe0001 Sample.pe\n");
    }
}
