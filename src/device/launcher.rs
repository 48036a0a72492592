//! Launcher generation for a selection on a target

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::TargetError;
use crate::decoder::RunId;
use crate::models::{Selection, TargetDescriptor};

/// Produces the artifacts a target loads to run one selection
#[async_trait]
pub trait LauncherBuilder: Send + Sync {
    async fn prepare(
        &self,
        selection: &Selection,
        target: &TargetDescriptor,
        run_id: &RunId,
    ) -> Result<Vec<PathBuf>, TargetError>;
}

/// Uses the artifacts listed in the catalog as they are
#[derive(Clone, Debug, Default)]
pub struct PrebuiltLauncher {
    base_dir: Option<PathBuf>,
}

impl PrebuiltLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative artifact paths against `dir`
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl LauncherBuilder for PrebuiltLauncher {
    async fn prepare(
        &self,
        selection: &Selection,
        target: &TargetDescriptor,
        _run_id: &RunId,
    ) -> Result<Vec<PathBuf>, TargetError> {
        if selection.artifacts.is_empty() {
            return Err(TargetError::Configuration(format!(
                "no artifacts listed for {}",
                selection.binary
            )));
        }

        let mut resolved = Vec::with_capacity(selection.artifacts.len());
        for artifact in &selection.artifacts {
            let path = self.resolve(artifact);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(TargetError::Configuration(format!(
                    "artifact not found: {}",
                    path.display()
                )));
            }
            resolved.push(path);
        }

        debug!(
            "Prepared {} artifact(s) of {} for {}",
            resolved.len(),
            selection.binary,
            target.display_name()
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceClass;

    #[tokio::test]
    async fn test_prebuilt_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Sample.pe"), b"pe").unwrap();

        let selection = Selection::new("Sample.dll", DeviceClass::Virtual, vec![PathBuf::from("Sample.pe")]);
        let launcher = PrebuiltLauncher::new().with_base_dir(dir.path());
        let artifacts = launcher
            .prepare(&selection, &TargetDescriptor::virtual_slot(0), &RunId::from("0000abcd"))
            .await
            .unwrap();

        assert_eq!(artifacts, vec![dir.path().join("Sample.pe")]);
    }

    #[tokio::test]
    async fn test_prebuilt_missing_artifact() {
        let selection = Selection::new(
            "Sample.dll",
            DeviceClass::Virtual,
            vec![PathBuf::from("/nonexistent/devrunner/Sample.pe")],
        );
        let err = PrebuiltLauncher::new()
            .prepare(&selection, &TargetDescriptor::virtual_slot(0), &RunId::from("0000abcd"))
            .await
            .unwrap_err();

        assert!(matches!(err, TargetError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_prebuilt_no_artifacts() {
        let selection = Selection::new("Sample.dll", DeviceClass::Virtual, Vec::new());
        let err = PrebuiltLauncher::new()
            .prepare(&selection, &TargetDescriptor::virtual_slot(0), &RunId::from("0000abcd"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no artifacts"));
    }
}
