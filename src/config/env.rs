//! Environment variable configuration
//!
//! Overrides applied on top of the configuration file.

use std::env;
use std::path::PathBuf;

use super::RunConfig;
use crate::device::TargetLogLevel;

/// Environment variable prefix
const ENV_PREFIX: &str = "DEVRUNNER";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Config file from DEVRUNNER_CONFIG
    pub config_file: Option<String>,
    /// Virtual concurrency from DEVRUNNER_MAX_VIRTUAL
    pub max_virtual_targets: Option<usize>,
    /// From DEVRUNNER_VIRTUAL_TIMEOUT (seconds)
    pub virtual_timeout: Option<u64>,
    /// From DEVRUNNER_PHYSICAL_TIMEOUT (seconds)
    pub physical_timeout: Option<u64>,
    /// From DEVRUNNER_VIRTUAL
    pub run_virtual: Option<bool>,
    /// From DEVRUNNER_PHYSICAL
    pub run_physical: Option<bool>,
    /// Engine path from DEVRUNNER_ENGINE
    pub engine: Option<String>,
    /// Target log level from DEVRUNNER_TARGET_LOG
    pub target_log_level: Option<TargetLogLevel>,
    /// Comma separated list from DEVRUNNER_PORTS
    pub ports: Option<Vec<String>>,
    /// Comma separated list from DEVRUNNER_EXCLUDE_PORTS
    pub exclude_ports: Option<Vec<String>>,
    /// Verbose from DEVRUNNER_VERBOSE
    pub verbose: Option<bool>,
    /// Output format from DEVRUNNER_FORMAT
    pub format: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            config_file: get_env("CONFIG"),
            max_virtual_targets: get_env_parse("MAX_VIRTUAL"),
            virtual_timeout: get_env_parse("VIRTUAL_TIMEOUT"),
            physical_timeout: get_env_parse("PHYSICAL_TIMEOUT"),
            run_virtual: get_env_bool("VIRTUAL"),
            run_physical: get_env_bool("PHYSICAL"),
            engine: get_env("ENGINE"),
            target_log_level: get_env("TARGET_LOG").and_then(|v| TargetLogLevel::from_str(&v)),
            ports: get_env_list("PORTS"),
            exclude_ports: get_env_list("EXCLUDE_PORTS"),
            verbose: get_env_bool("VERBOSE"),
            format: get_env("FORMAT"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.config_file.is_some()
            || self.max_virtual_targets.is_some()
            || self.virtual_timeout.is_some()
            || self.physical_timeout.is_some()
            || self.run_virtual.is_some()
            || self.run_physical.is_some()
            || self.engine.is_some()
            || self.target_log_level.is_some()
            || self.ports.is_some()
            || self.exclude_ports.is_some()
            || self.verbose.is_some()
            || self.format.is_some()
    }

    /// Overwrite the run settings that are set in the environment
    pub fn apply_to(&self, config: &mut RunConfig) {
        if let Some(n) = self.max_virtual_targets {
            config.max_virtual_targets = Some(n);
        }
        if let Some(secs) = self.virtual_timeout {
            config.virtual_timeout_secs = secs;
        }
        if let Some(secs) = self.physical_timeout {
            config.physical_timeout_secs = secs;
        }
        if let Some(enabled) = self.run_virtual {
            config.run_virtual = enabled;
        }
        if let Some(enabled) = self.run_physical {
            config.run_physical = enabled;
        }
        if let Some(engine) = &self.engine {
            config.engine_path = Some(PathBuf::from(engine));
        }
        if let Some(level) = self.target_log_level {
            config.target_log_level = level;
        }
        if let Some(ports) = &self.ports {
            config.ports = ports.clone();
        }
        if let Some(ports) = &self.exclude_ports {
            config.exclude_ports = ports.clone();
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_CONFIG:            {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_MAX_VIRTUAL:       {:?}", ENV_PREFIX, self.max_virtual_targets);
        println!("  {}_VIRTUAL_TIMEOUT:   {:?}", ENV_PREFIX, self.virtual_timeout);
        println!("  {}_PHYSICAL_TIMEOUT:  {:?}", ENV_PREFIX, self.physical_timeout);
        println!("  {}_VIRTUAL:           {:?}", ENV_PREFIX, self.run_virtual);
        println!("  {}_PHYSICAL:          {:?}", ENV_PREFIX, self.run_physical);
        println!("  {}_ENGINE:            {:?}", ENV_PREFIX, self.engine);
        println!("  {}_TARGET_LOG:        {:?}", ENV_PREFIX, self.target_log_level);
        println!("  {}_PORTS:             {:?}", ENV_PREFIX, self.ports);
        println!("  {}_EXCLUDE_PORTS:     {:?}", ENV_PREFIX, self.exclude_ports);
        println!("  {}_VERBOSE:           {:?}", ENV_PREFIX, self.verbose);
        println!("  {}_FORMAT:            {:?}", ENV_PREFIX, self.format);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Get comma separated environment variable
fn get_env_list(name: &str) -> Option<Vec<String>> {
    get_env(name).map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

/// Print all DEVRUNNER environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG            Path to configuration file");
    println!("  {ENV_PREFIX}_MAX_VIRTUAL       Concurrent virtual executions");
    println!("  {ENV_PREFIX}_VIRTUAL_TIMEOUT   Virtual execution timeout in seconds");
    println!("  {ENV_PREFIX}_PHYSICAL_TIMEOUT  Physical execution timeout in seconds");
    println!("  {ENV_PREFIX}_VIRTUAL           Run on the virtual engine (true/false)");
    println!("  {ENV_PREFIX}_PHYSICAL          Run on discovered devices (true/false)");
    println!("  {ENV_PREFIX}_ENGINE            Path to the virtual engine executable");
    println!("  {ENV_PREFIX}_TARGET_LOG        Target log level (none, minimal, detailed, verbose)");
    println!("  {ENV_PREFIX}_PORTS             Comma separated ports to use");
    println!("  {ENV_PREFIX}_EXCLUDE_PORTS     Comma separated ports to ignore");
    println!("  {ENV_PREFIX}_VERBOSE           Enable verbose output (true/false)");
    println!("  {ENV_PREFIX}_FORMAT            Output format (table, json, json-pretty, csv, summary)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_PHYSICAL=true");
    println!("  export {ENV_PREFIX}_EXCLUDE_PORTS=/dev/ttyS0");
    println!("  devrunner run catalog.yaml");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    /// Tests that touch the process environment run one at a time
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Builder for setting environment variables in tests
    struct EnvBuilder {
        vars: Vec<(String, String)>,
    }

    impl EnvBuilder {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn var(mut self, name: &str, value: impl Into<String>) -> Self {
            self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
            self
        }

        fn max_virtual(self, n: usize) -> Self {
            self.var("MAX_VIRTUAL", n.to_string())
        }

        fn virtual_timeout(self, secs: u64) -> Self {
            self.var("VIRTUAL_TIMEOUT", secs.to_string())
        }

        fn physical(self, enabled: bool) -> Self {
            self.var("PHYSICAL", enabled.to_string())
        }

        fn engine(self, path: impl Into<String>) -> Self {
            self.var("ENGINE", path)
        }

        fn exclude_ports(self, ports: impl Into<String>) -> Self {
            self.var("EXCLUDE_PORTS", ports)
        }

        /// Set the variables, holding the environment lock until the guard drops
        fn apply_scoped(self) -> EnvGuard {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let previous: Vec<_> = self
                .vars
                .iter()
                .map(|(k, _)| (k.clone(), env::var(k).ok()))
                .collect();

            for (key, value) in self.vars {
                env::set_var(key, value);
            }

            EnvGuard {
                previous,
                _lock: lock,
            }
        }
    }

    /// Guard that restores environment variables on drop
    struct EnvGuard {
        previous: Vec<(String, Option<String>)>,
        _lock: MutexGuard<'static, ()>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.previous {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.engine.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_builder() {
        let _guard = EnvBuilder::new()
            .max_virtual(3)
            .virtual_timeout(60)
            .engine("/opt/engine")
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.max_virtual_targets, Some(3));
        assert_eq!(config.virtual_timeout, Some(60));
        assert_eq!(config.engine.as_deref(), Some("/opt/engine"));
    }

    #[test]
    fn test_env_list_and_bool_parsing() {
        let _guard = EnvBuilder::new()
            .physical(true)
            .exclude_ports("COM1, COM2,,")
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.run_physical, Some(true));
        assert_eq!(
            config.exclude_ports,
            Some(vec!["COM1".to_string(), "COM2".to_string()])
        );
    }

    #[test]
    fn test_apply_to_overrides_only_set_values() {
        let env = EnvConfig {
            physical_timeout: Some(300),
            run_physical: Some(true),
            target_log_level: Some(TargetLogLevel::Verbose),
            ..Default::default()
        };
        let mut config = RunConfig::default();
        env.apply_to(&mut config);

        assert_eq!(config.physical_timeout_secs, 300);
        assert!(config.run_physical);
        assert_eq!(config.target_log_level, TargetLogLevel::Verbose);
        assert_eq!(config.virtual_timeout_secs, 120);
        assert!(config.run_virtual);
    }
}
