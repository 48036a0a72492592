//! devrunner - run test catalogs on virtual engines and serial-attached devices
//!
//! ## Usage
//!
//! ```bash
//! # Run a catalog on the virtual engine
//! devrunner run --catalog tests.yaml
//!
//! # Run on hardware only, ignoring one port
//! devrunner run --catalog tests.yaml --physical --exclude-port /dev/ttyS0
//!
//! # List what a catalog contains
//! devrunner list --catalog tests.yaml --detailed
//!
//! # See which devices answer the probe
//! devrunner devices
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use devrunner::cli::{self, Args};
use devrunner::config::{self, ConfigFile, EnvConfig, RunConfig};
use devrunner::device::{
    DeviceDiscovery, PortScanDiscovery, PrebuiltLauncher, ProcessVirtualTarget,
};
use devrunner::executor::{CollectingSink, Orchestrator, ResultSink};
use devrunner::models::{TestCaseId, TestCatalog, TestResult};
use devrunner::output::{write_results_to_file, OutputFormat, ResultFormatter};
use devrunner::utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    init_logger(LogLevel::from_verbose(
        args.verbose || env.verbose.unwrap_or(false),
    ));

    match args.command {
        cli::Command::Run(run_args) => {
            let config = load_config(args.config.as_deref(), &env)?;
            let passed = run_catalog(run_args, config, &env).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        cli::Command::List(list_args) => {
            list_catalog(list_args)?;
        }
        cli::Command::Devices(devices_args) => {
            let config = load_config(args.config.as_deref(), &env)?;
            list_devices(devices_args, config).await;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, args.config.as_deref(), &env)?;
        }
    }

    Ok(())
}

/// File settings, then environment, in that order
fn load_config(path: Option<&Path>, env: &EnvConfig) -> Result<RunConfig> {
    let file = match path {
        Some(path) => ConfigFile::load(path)?,
        None => match &env.config_file {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::load_default()?,
        },
    };
    let mut config = file.run;
    env.apply_to(&mut config);
    Ok(config)
}

/// Prints results as they arrive and keeps them for the final report
struct ConsoleSink {
    formatter: Option<ResultFormatter>,
    collected: CollectingSink,
}

impl ResultSink for ConsoleSink {
    fn add_results(&self, results: Vec<TestResult>, target: Option<&str>) {
        if let Some(formatter) = &self.formatter {
            for result in &results {
                println!("{}", formatter.format_result(result));
            }
        }
        self.collected.add_results(results, target);
    }
}

async fn run_catalog(args: cli::RunArgs, mut config: RunConfig, env: &EnvConfig) -> Result<bool> {
    args.apply_to(&mut config)?;
    config.validate().context("Invalid run configuration")?;

    let format_name = args
        .format
        .clone()
        .or_else(|| env.format.clone())
        .unwrap_or_else(|| "table".to_string());
    let format = OutputFormat::from_str(&format_name)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", format_name))?;

    let catalog = TestCatalog::load(&args.catalog)?;
    let subset: Option<Vec<TestCaseId>> = args.filter.as_ref().map(|filter| {
        catalog
            .cases()
            .filter(|case| case.id.method.contains(filter.as_str()))
            .map(|case| case.id.clone())
            .collect()
    });
    if let Some(subset) = &subset {
        info!("Filter matched {} of {} test(s)", subset.len(), catalog.len());
    }

    let mut options = config.run_options();
    options.engine_override = args.engine.clone();

    let base_dir = args
        .catalog
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut engine = ProcessVirtualTarget::new(config.engine_path.clone());
    if !config.engine_args.is_empty() {
        engine = engine.with_args(config.engine_args.clone());
    }

    let orchestrator = Orchestrator::new(options)
        .with_virtual_target(Arc::new(engine))
        .with_discovery(Arc::new(PortScanDiscovery::new(config.physical.clone())))
        .with_launcher(Arc::new(PrebuiltLauncher::new().with_base_dir(base_dir)));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_signal.cancel();
        }
    });

    let streaming = matches!(format, OutputFormat::Table);
    let sink = Arc::new(ConsoleSink {
        formatter: streaming.then(|| ResultFormatter::new(OutputFormat::Table)),
        collected: CollectingSink::new(),
    });

    let summary = orchestrator
        .run(&catalog, subset.as_deref(), sink, cancel)
        .await;

    let formatter = ResultFormatter::new(format);
    if streaming {
        // results were already printed; only the footer is left
        println!(
            "{}",
            ResultFormatter::new(OutputFormat::Summary).format_summary(&summary)
        );
    } else {
        println!("{}", formatter.format_summary(&summary));
    }

    if let Some(path) = &args.output {
        write_results_to_file(path, &summary, format)?;
        info!("Results written to {}", path.display());
    }

    Ok(!summary.cancelled && summary.failed == 0)
}

fn list_catalog(args: cli::ListArgs) -> Result<()> {
    let catalog = TestCatalog::load(&args.catalog)?;

    println!("\nTest catalog ({} cases)\n", catalog.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for binary in catalog.binaries() {
        println!("\n{}:", binary.name);
        for group in binary.groups() {
            println!("  {}", group.name);
            println!("  ──────────────────────────────────────────────────────────────────");
            for case in binary.cases().iter().filter(|c| c.group.index == group.index) {
                if args.detailed {
                    let selectors: Vec<String> = case.selectors.iter().map(|s| s.id()).collect();
                    println!(
                        "    {:40} virtual={:5} hardware=[{}]",
                        case.display_name,
                        case.run_on_virtual,
                        selectors.join(", ")
                    );
                } else {
                    println!("    {}", case.display_name);
                }
            }
        }
    }

    let warnings = catalog.warnings();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in warnings {
            println!("  ⚠ {warning}");
        }
    }
    println!();

    Ok(())
}

async fn list_devices(args: cli::DevicesArgs, config: RunConfig) {
    let discovery = PortScanDiscovery::new(config.physical.clone());
    let ports = if args.ports.is_empty() {
        config.ports.clone()
    } else {
        args.ports
    };

    let stream = if ports.is_empty() {
        discovery.discover_all(&config.exclude_ports)
    } else {
        discovery.discover_selected(&ports)
    };
    let targets: Vec<_> = stream.collect().await;

    if targets.is_empty() {
        println!("No devices found");
        return;
    }

    println!("Discovered devices:");
    for target in targets {
        let descriptor = target.descriptor();
        println!(
            "  {:20} platform={} target={} firmware={}",
            descriptor.id,
            descriptor.platform,
            descriptor.target,
            descriptor.firmware_version.as_deref().unwrap_or("-")
        );
    }
}

fn manage_config(args: cli::ConfigArgs, path: Option<&Path>, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { path, force } => {
            let path = path.unwrap_or_else(ConfigFile::default_path);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }

            ConfigFile::example().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show => {
            let config = load_config(path, env)?;
            println!("{}", serde_yaml::to_string(&config)?);
        }

        cli::ConfigAction::Validate { path: target } => {
            let target = target
                .or_else(|| path.map(Path::to_path_buf))
                .or_else(ConfigFile::find)
                .ok_or_else(|| anyhow::anyhow!("No configuration file found"))?;

            match ConfigFile::load(&target) {
                Ok(_) => println!("✓ Configuration file is valid: {}", target.display()),
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", target.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Env => {
            config::env::print_env_help();
            if env.has_any() {
                println!();
                env.print_summary();
            }
        }
    }

    Ok(())
}
