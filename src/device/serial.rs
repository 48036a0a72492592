//! Physical devices behind serial ports, driven by external commands

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::process::{expand_template, stream_process};
use super::{DeviceDiscovery, DiscoveryStream, ExecuteRequest, PhysicalTarget, TargetError, TimeoutFactory};
use crate::models::TargetDescriptor;

/// How physical devices are found and driven
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortScanConfig {
    /// Port paths, `*` matching any suffix (e.g. `/dev/ttyUSB*`)
    pub port_patterns: Vec<String>,
    /// Command printing `platform=… target=… [firmware=…]` for `{port}`
    pub probe_command: Vec<String>,
    /// Optional deployment step, not counted against the execution timeout
    pub deploy_command: Vec<String>,
    /// Command that runs the deployed artifacts and streams device output
    pub run_command: Vec<String>,
    pub discovery_timeout_secs: u64,
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self {
            port_patterns: vec!["/dev/ttyUSB*".to_string(), "/dev/ttyACM*".to_string()],
            probe_command: Vec::new(),
            deploy_command: Vec::new(),
            run_command: Vec::new(),
            discovery_timeout_secs: 10,
        }
    }
}

impl PortScanConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Ports currently present that match a pattern
    pub fn list_ports(&self) -> Vec<String> {
        let mut ports = Vec::new();
        for pattern in &self.port_patterns {
            let Some((prefix, suffix)) = pattern.split_once('*') else {
                ports.push(pattern.clone());
                continue;
            };

            let path = Path::new(prefix);
            let (dir, name_prefix) = if prefix.ends_with('/') {
                (path, "")
            } else {
                (
                    path.parent().unwrap_or_else(|| Path::new(".")),
                    path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
                )
            };

            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Cannot list {}: {}", dir.display(), e);
                    continue;
                }
            };
            let mut matched: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                .filter(|name| name.starts_with(name_prefix) && name.ends_with(suffix))
                .map(|name| dir.join(name).to_string_lossy().into_owned())
                .collect();
            matched.sort();
            ports.extend(matched);
        }
        ports.dedup();
        ports
    }
}

/// Parse the probe command's answer into a descriptor for `port`
pub fn parse_probe_output(port: &str, output: &str) -> Option<TargetDescriptor> {
    let mut platform = None;
    let mut target = None;
    let mut firmware = None;

    for token in output.split_whitespace() {
        match token.split_once('=') {
            Some(("platform", value)) if !value.is_empty() => platform = Some(value),
            Some(("target", value)) if !value.is_empty() => target = Some(value),
            Some(("firmware", value)) if !value.is_empty() => firmware = Some(value),
            _ => {}
        }
    }

    let descriptor = TargetDescriptor::physical(port, platform?, target?);
    Some(match firmware {
        Some(version) => descriptor.with_firmware(version),
        None => descriptor,
    })
}

/// Scans serial ports and probes each one concurrently
#[derive(Clone, Debug)]
pub struct PortScanDiscovery {
    config: Arc<PortScanConfig>,
}

impl PortScanDiscovery {
    pub fn new(config: PortScanConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn probe_ports(&self, ports: Vec<String>) -> DiscoveryStream {
        let (tx, rx) = mpsc::unbounded::<Arc<dyn PhysicalTarget>>();
        if self.config.probe_command.is_empty() {
            warn!("No probe command configured, physical discovery disabled");
            return rx.boxed();
        }

        info!("Probing {} port(s)", ports.len());
        let deadline = tokio::time::Instant::now() + self.config.discovery_timeout();
        for port in ports {
            let tx = tx.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                match tokio::time::timeout_at(deadline, probe(&config, &port)).await {
                    Ok(Some(descriptor)) => {
                        info!("Found {} on {}", descriptor.target, port);
                        let target = CommandPhysicalTarget::new(descriptor, config.clone());
                        let _ = tx.unbounded_send(Arc::new(target));
                    }
                    Ok(None) => debug!("No device answered on {}", port),
                    Err(_) => debug!("Probe of {} timed out", port),
                }
            });
        }
        rx.boxed()
    }
}

impl DeviceDiscovery for PortScanDiscovery {
    fn discover_all(&self, exclude: &[String]) -> DiscoveryStream {
        let ports = self
            .config
            .list_ports()
            .into_iter()
            .filter(|port| !exclude.iter().any(|e| e == port))
            .collect();
        self.probe_ports(ports)
    }

    fn discover_selected(&self, ids: &[String]) -> DiscoveryStream {
        self.probe_ports(ids.to_vec())
    }
}

async fn probe(config: &PortScanConfig, port: &str) -> Option<TargetDescriptor> {
    let mut vars = HashMap::new();
    vars.insert("port", port.to_string());
    let args = expand_template(&config.probe_command, &vars, &[]);
    let (program, rest) = args.split_first()?;

    let output = match Command::new(program).args(rest).kill_on_drop(true).output().await {
        Ok(output) => output,
        Err(e) => {
            warn!("Probe command {} failed: {}", program, e);
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    parse_probe_output(port, &String::from_utf8_lossy(&output.stdout))
}

/// A device driven through the configured deploy and run commands
#[derive(Debug)]
pub struct CommandPhysicalTarget {
    descriptor: TargetDescriptor,
    config: Arc<PortScanConfig>,
}

impl CommandPhysicalTarget {
    pub fn new(descriptor: TargetDescriptor, config: Arc<PortScanConfig>) -> Self {
        Self { descriptor, config }
    }

    fn command(&self, template: &[String], request: &ExecuteRequest<'_>) -> Vec<String> {
        let mut vars = HashMap::new();
        vars.insert("port", self.descriptor.id.clone());
        vars.insert("run_id", request.run_id.to_string());
        vars.insert("log_level", request.log_level.to_string());
        let artifacts: Vec<String> = request
            .artifacts
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        expand_template(template, &vars, &artifacts)
    }

    async fn run(
        &self,
        args: Vec<String>,
        request: &ExecuteRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool, TargetError> {
        let Some((program, rest)) = args.split_first() else {
            return Err(TargetError::Configuration("empty command".to_string()));
        };
        stream_process(program, rest, request.on_output, cancel).await
    }
}

#[async_trait]
impl PhysicalTarget for CommandPhysicalTarget {
    fn descriptor(&self) -> &TargetDescriptor {
        &self.descriptor
    }

    async fn initialize(&self) -> Result<(), TargetError> {
        if self.config.run_command.is_empty() {
            return Err(TargetError::Configuration("no run command configured".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, request: ExecuteRequest<'_>, timeout: &TimeoutFactory) -> bool {
        if !self.config.deploy_command.is_empty() {
            let deploy = self.command(&self.config.deploy_command, &request);
            match self.run(deploy, &request, &request.cancel).await {
                Ok(true) => debug!("Deployed to {}", self.descriptor.id),
                Ok(false) => {
                    warn!("Deployment to {} failed", self.descriptor.id);
                    return false;
                }
                Err(e) => {
                    warn!("Deployment to {} failed: {}", self.descriptor.id, e);
                    return false;
                }
            }
        }

        let token = timeout.token();
        let run = self.command(&self.config.run_command, &request);
        match self.run(run, &request, &token).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!("Run on {} failed: {}", self.descriptor.id, e);
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
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[test]
    fn test_parse_probe_output() {
        let d = parse_probe_output("/dev/ttyUSB0", "platform=ESP32 target=ESP32_REV3 firmware=1.9.1\n").unwrap();
        assert_eq!(d.id, "/dev/ttyUSB0");
        assert_eq!(d.platform, "ESP32");
        assert_eq!(d.target, "ESP32_REV3");
        assert_eq!(d.firmware_version.as_deref(), Some("1.9.1"));

        let d = parse_probe_output("COM3", "booting...\nplatform=STM32 target=ST_NUCLEO64_F091RC").unwrap();
        assert_eq!(d.firmware_version, None);

        assert!(parse_probe_output("COM3", "target=ESP32_REV3").is_none());
        assert!(parse_probe_output("COM3", "").is_none());
    }

    #[test]
    fn test_list_ports_by_pattern() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ttyUSB0", "ttyUSB1", "ttyS0"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let config = PortScanConfig {
            port_patterns: vec![
                format!("{}/ttyUSB*", dir.path().display()),
                "COM3".to_string(),
            ],
            ..Default::default()
        };

        let ports = config.list_ports();
        assert_eq!(
            ports,
            vec![
                dir.path().join("ttyUSB0").to_string_lossy().into_owned(),
                dir.path().join("ttyUSB1").to_string_lossy().into_owned(),
                "COM3".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_selected_ports() {
        let config = PortScanConfig {
            probe_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "[ \"$0\" = COM3 ] && echo platform=ESP32 target=ESP32_REV0".to_string(),
                "{port}".to_string(),
            ],
            ..Default::default()
        };
        let discovery = PortScanDiscovery::new(config);

        let found: Vec<TargetDescriptor> = discovery
            .discover_selected(&["COM3".to_string(), "COM4".to_string()])
            .map(|t| t.descriptor().clone())
            .collect()
            .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "COM3");
        assert_eq!(found[0].target, "ESP32_REV0");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_target_streams_output() {
        let config = PortScanConfig {
            run_command: sh("echo port={port} id={run_id}"),
            ..Default::default()
        };
        let target = CommandPhysicalTarget::new(
            TargetDescriptor::physical("COM3", "ESP32", "ESP32_REV0"),
            Arc::new(config),
        );
        target.initialize().await.unwrap();

        let cancel = CancellationToken::new();
        let timeout = TimeoutFactory::new(&cancel, Duration::from_secs(30));
        let lines = Mutex::new(String::new());
        let on_output = |s: &str| lines.lock().unwrap().push_str(s);
        let run_id = RunId::from("1234abcd");
        let artifacts: Vec<PathBuf> = Vec::new();

        let ok = target
            .execute(
                ExecuteRequest {
                    artifacts: &artifacts,
                    log_level: TargetLogLevel::Minimal,
                    run_id: &run_id,
                    on_output: &on_output,
                    cancel: cancel.clone(),
                },
                &timeout,
            )
            .await;

        assert!(ok);
        assert_eq!(*lines.lock().unwrap(), "port=COM3 id=1234abcd\n");
    }

    #[tokio::test]
    async fn test_command_target_requires_run_command() {
        let target = CommandPhysicalTarget::new(
            TargetDescriptor::physical("COM3", "ESP32", "ESP32_REV0"),
            Arc::new(PortScanConfig::default()),
        );
        assert!(matches!(target.initialize().await, Err(TargetError::Configuration(_))));
    }
}
