//! Configuration module
//!
//! Run settings loaded from a file, overridden by environment variables
//! and finally by command-line flags.

pub mod env;
pub mod file;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::device::{PortScanConfig, TargetLogLevel};
use crate::executor::RunOptions;
use crate::models::TargetClasses;

pub use env::EnvConfig;
pub use file::ConfigFile;

/// Run configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Concurrent virtual executions; unset means one per logical processor
    pub max_virtual_targets: Option<usize>,

    /// Virtual execution timeout in seconds
    pub virtual_timeout_secs: u64,

    /// Physical execution timeout in seconds, counted from the end of deployment
    pub physical_timeout_secs: u64,

    /// Run tests on the virtual engine
    pub run_virtual: bool,

    /// Run tests on discovered hardware
    pub run_physical: bool,

    /// Virtual engine executable
    pub engine_path: Option<PathBuf>,

    /// Engine argument template; empty uses the built-in one
    pub engine_args: Vec<String>,

    /// Verbosity requested from the target-side launcher
    pub target_log_level: TargetLogLevel,

    /// Only use these ports when non-empty
    pub ports: Vec<String>,

    /// Never use these ports
    pub exclude_ports: Vec<String>,

    /// Port scanning and device commands
    pub physical: PortScanConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_virtual_targets: None,
            virtual_timeout_secs: 120,
            physical_timeout_secs: 120,
            run_virtual: true,
            run_physical: false,
            engine_path: None,
            engine_args: Vec::new(),
            target_log_level: TargetLogLevel::default(),
            ports: Vec::new(),
            exclude_ports: Vec::new(),
            physical: PortScanConfig::default(),
        }
    }
}

impl RunConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.run_virtual && !self.run_physical {
            anyhow::bail!("Both virtual and physical targets are disabled");
        }
        if self.max_virtual_targets == Some(0) {
            anyhow::bail!("max_virtual_targets must be at least 1");
        }
        if self.virtual_timeout_secs == 0 || self.physical_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be at least one second");
        }
        if self.run_physical {
            if self.physical.probe_command.is_empty() {
                anyhow::bail!("Physical targets enabled but physical.probe_command is empty");
            }
            if self.physical.run_command.is_empty() {
                anyhow::bail!("Physical targets enabled but physical.run_command is empty");
            }
        }
        if let Some(port) = self.ports.iter().find(|p| self.exclude_ports.contains(p)) {
            anyhow::bail!("Port {} is both selected and excluded", port);
        }
        Ok(())
    }

    pub fn virtual_timeout(&self) -> Duration {
        Duration::from_secs(self.virtual_timeout_secs)
    }

    pub fn physical_timeout(&self) -> Duration {
        Duration::from_secs(self.physical_timeout_secs)
    }

    /// Settings handed to the orchestrator
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            classes: TargetClasses {
                virtual_targets: self.run_virtual,
                physical_targets: self.run_physical,
            },
            max_virtual_targets: self.max_virtual_targets,
            virtual_timeout: self.virtual_timeout(),
            physical_timeout: self.physical_timeout(),
            log_level: self.target_log_level,
            engine_override: None,
            ports: self.ports.clone(),
            exclude_ports: self.exclude_ports.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert!(config.run_virtual);
        assert!(!config.run_physical);
        assert_eq!(config.virtual_timeout_secs, 120);
        assert_eq!(config.physical.discovery_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_physical_commands() {
        let mut config = RunConfig {
            run_physical: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.physical.probe_command = vec!["probe".to_string(), "{port}".to_string()];
        config.physical.run_command = vec!["flash".to_string(), "{port}".to_string()];
        assert!(config.validate().is_ok());

        config.ports = vec!["COM3".to_string()];
        config.exclude_ports = vec!["COM3".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nothing_to_run() {
        let config = RunConfig {
            run_virtual: false,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_run_options() {
        let config = RunConfig {
            max_virtual_targets: Some(3),
            virtual_timeout_secs: 30,
            run_physical: true,
            exclude_ports: vec!["COM1".to_string()],
            ..Default::default()
        };
        let options = config.run_options();
        assert_eq!(options.max_virtual_targets, Some(3));
        assert_eq!(options.virtual_timeout, Duration::from_secs(30));
        assert!(options.classes.physical_targets);
        assert_eq!(options.exclude_ports, vec!["COM1"]);
    }
}
