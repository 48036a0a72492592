//! Device directory
//!
//! Abstractions over the targets tests run on: a bounded pool of virtual
//! engine slots, and physical devices that show up behind serial ports
//! while the run is in progress.

mod discovery;
mod launcher;
mod lock;
mod process;
mod serial;
mod timeout;
mod virtual_engine;

pub use discovery::{DeviceDiscovery, DiscoveryStream, StaticDiscovery};
pub use launcher::{LauncherBuilder, PrebuiltLauncher};
pub use lock::{TransportGuard, TransportLocks};
pub use process::{expand_template, stream_process};
pub use serial::{parse_probe_output, CommandPhysicalTarget, PortScanConfig, PortScanDiscovery};
pub use timeout::TimeoutFactory;
pub use virtual_engine::ProcessVirtualTarget;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::decoder::RunId;
use crate::models::TargetDescriptor;

/// Receives UTF-8 output chunks as a target produces them
pub type OutputCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Target-side errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// Missing engine, artifact or command configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Launcher generation or device bring-up failed
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("communication failed: {0}")]
    Communication(String),
}

/// Verbosity the launcher on the target is asked to emit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLogLevel {
    None,
    #[default]
    Minimal,
    Detailed,
    Verbose,
}

impl TargetLogLevel {
    pub fn name(&self) -> &'static str {
        match self {
            TargetLogLevel::None => "none",
            TargetLogLevel::Minimal => "minimal",
            TargetLogLevel::Detailed => "detailed",
            TargetLogLevel::Verbose => "verbose",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Some(TargetLogLevel::None),
            "minimal" => Some(TargetLogLevel::Minimal),
            "detailed" => Some(TargetLogLevel::Detailed),
            "verbose" => Some(TargetLogLevel::Verbose),
            _ => None,
        }
    }
}

impl fmt::Display for TargetLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a target needs to run one set of artifacts
pub struct ExecuteRequest<'a> {
    pub artifacts: &'a [PathBuf],
    pub log_level: TargetLogLevel,
    pub run_id: &'a RunId,
    pub on_output: OutputCallback<'a>,
    pub cancel: CancellationToken,
}

/// An emulated execution engine. One instance serves every virtual slot.
#[async_trait]
pub trait VirtualTarget: Send + Sync {
    /// Check that the engine, or the override if given, can be started
    async fn initialize(&self, _engine_override: Option<&Path>) -> Result<(), TargetError> {
        Ok(())
    }

    /// Run the artifacts, streaming output. Returns promptly on cancellation.
    async fn execute(&self, request: ExecuteRequest<'_>, engine_override: Option<&Path>) -> bool;
}

/// A physical device behind a serial transport
#[async_trait]
pub trait PhysicalTarget: Send + Sync {
    fn descriptor(&self) -> &TargetDescriptor;

    /// Bring the device into a state where it can accept a deployment
    async fn initialize(&self) -> Result<(), TargetError> {
        Ok(())
    }

    /// Deploy and run the artifacts, streaming output.
    ///
    /// The target asks `timeout` for its token once deployment is done, so
    /// flashing time does not count against the run.
    async fn execute(&self, request: ExecuteRequest<'_>, timeout: &TimeoutFactory) -> bool;
}
