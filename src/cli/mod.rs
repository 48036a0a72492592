//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::RunConfig;
use crate::device::TargetLogLevel;

/// Test orchestrator for virtual engines and serial-attached devices
#[derive(Parser, Debug)]
#[command(name = "devrunner")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Run test catalogs on virtual engines and serial-attached devices")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the tests of a catalog
    Run(RunArgs),

    /// List the tests of a catalog
    List(ListArgs),

    /// Discover attached devices
    Devices(DevicesArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Catalog file (YAML or JSON)
    #[arg(long)]
    pub catalog: PathBuf,

    /// Run on the virtual engine
    #[arg(long = "virtual")]
    pub run_virtual: bool,

    /// Run on discovered devices
    #[arg(long = "physical")]
    pub run_physical: bool,

    /// Concurrent virtual executions
    #[arg(long)]
    pub max_virtual: Option<usize>,

    /// Virtual execution timeout in seconds
    #[arg(long)]
    pub virtual_timeout: Option<u64>,

    /// Physical execution timeout in seconds
    #[arg(long)]
    pub physical_timeout: Option<u64>,

    /// Only use this port (repeatable)
    #[arg(long = "port")]
    pub ports: Vec<String>,

    /// Ignore this port (repeatable)
    #[arg(long = "exclude-port")]
    pub exclude_ports: Vec<String>,

    /// Virtual engine executable, overriding the configured one
    #[arg(long)]
    pub engine: Option<PathBuf>,

    /// Target-side log level (none, minimal, detailed, verbose)
    #[arg(long)]
    pub target_log: Option<String>,

    /// Only run cases whose name contains this text
    #[arg(long)]
    pub filter: Option<String>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Save results to file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Apply command-line overrides on top of file and environment settings
    pub fn apply_to(&self, config: &mut RunConfig) -> anyhow::Result<()> {
        if self.run_virtual || self.run_physical {
            config.run_virtual = self.run_virtual;
            config.run_physical = self.run_physical;
        }
        if let Some(n) = self.max_virtual {
            config.max_virtual_targets = Some(n);
        }
        if let Some(secs) = self.virtual_timeout {
            config.virtual_timeout_secs = secs;
        }
        if let Some(secs) = self.physical_timeout {
            config.physical_timeout_secs = secs;
        }
        if !self.ports.is_empty() {
            config.ports = self.ports.clone();
        }
        if !self.exclude_ports.is_empty() {
            config.exclude_ports.extend(self.exclude_ports.iter().cloned());
        }
        if let Some(level) = &self.target_log {
            config.target_log_level = TargetLogLevel::from_str(level)
                .ok_or_else(|| anyhow::anyhow!("Unknown target log level: {}", level))?;
        }
        Ok(())
    }
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Catalog file (YAML or JSON)
    #[arg(long)]
    pub catalog: PathBuf,

    /// Show selectors and instantiation details
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for devices command
#[derive(Parser, Debug)]
pub struct DevicesArgs {
    /// Only probe this port (repeatable)
    #[arg(long = "port")]
    pub ports: Vec<String>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Destination, defaults to ~/.config/devrunner/config.yaml
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,

    /// Validate a configuration file
    Validate {
        path: Option<PathBuf>,
    },

    /// List supported environment variables
    Env,
}
