//! Real-target selectors
//!
//! A selector decides whether a case applies to a physical target and
//! whether two targets are interchangeable for that case. Selectors are
//! user-supplied and fallible; the selection engine never lets an error
//! run a case twice or drop it silently.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::target::TargetDescriptor;

/// Error raised by a selector predicate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("selector '{selector}' failed: {message}")]
pub struct SelectorError {
    pub selector: String,
    pub message: String,
}

impl SelectorError {
    pub fn new(selector: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            message: message.into(),
        }
    }
}

/// Pair of predicates deciding applicability and equivalence on hardware
pub trait RealTargetSelector: Send + Sync + fmt::Debug {
    /// Stable identity, used as the memoization key
    fn id(&self) -> String;

    fn should_run_on(&self, target: &TargetDescriptor) -> Result<bool, SelectorError>;

    fn are_equivalent(
        &self,
        a: &TargetDescriptor,
        b: &TargetDescriptor,
    ) -> Result<bool, SelectorError>;
}

/// Runs on targets of a given platform; same platform means equivalent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformSelector {
    pub platform: String,
}

impl RealTargetSelector for PlatformSelector {
    fn id(&self) -> String {
        format!("platform:{}", self.platform)
    }

    fn should_run_on(&self, target: &TargetDescriptor) -> Result<bool, SelectorError> {
        Ok(target.platform.eq_ignore_ascii_case(&self.platform))
    }

    fn are_equivalent(
        &self,
        a: &TargetDescriptor,
        b: &TargetDescriptor,
    ) -> Result<bool, SelectorError> {
        Ok(a.platform.eq_ignore_ascii_case(&b.platform))
    }
}

/// Runs on targets with a given firmware/target tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetTagSelector {
    pub target: String,
}

impl RealTargetSelector for TargetTagSelector {
    fn id(&self) -> String {
        format!("target:{}", self.target)
    }

    fn should_run_on(&self, target: &TargetDescriptor) -> Result<bool, SelectorError> {
        Ok(target.target.eq_ignore_ascii_case(&self.target))
    }

    fn are_equivalent(
        &self,
        a: &TargetDescriptor,
        b: &TargetDescriptor,
    ) -> Result<bool, SelectorError> {
        Ok(a.target.eq_ignore_ascii_case(&b.target))
    }
}

/// Runs on any physical target; every target covers every other
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnyHardwareSelector;

impl RealTargetSelector for AnyHardwareSelector {
    fn id(&self) -> String {
        "any-hardware".to_string()
    }

    fn should_run_on(&self, _target: &TargetDescriptor) -> Result<bool, SelectorError> {
        Ok(true)
    }

    fn are_equivalent(
        &self,
        _a: &TargetDescriptor,
        _b: &TargetDescriptor,
    ) -> Result<bool, SelectorError> {
        Ok(true)
    }
}

/// Declarative selector as written in a catalog file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SelectorSpec {
    Platform { platform: String },
    Target { target: String },
    AnyHardware,
}

impl SelectorSpec {
    pub fn build(&self) -> Arc<dyn RealTargetSelector> {
        match self {
            SelectorSpec::Platform { platform } => Arc::new(PlatformSelector {
                platform: platform.clone(),
            }),
            SelectorSpec::Target { target } => Arc::new(TargetTagSelector {
                target: target.clone(),
            }),
            SelectorSpec::AnyHardware => Arc::new(AnyHardwareSelector),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_selector() {
        let selector = PlatformSelector {
            platform: "ESP32".to_string(),
        };
        let a = TargetDescriptor::physical("COM3", "esp32", "ESP32_REV0");
        let b = TargetDescriptor::physical("COM4", "ESP32", "ESP32_PSRAM");
        let c = TargetDescriptor::physical("COM5", "STM32", "ST_NUCLEO");

        assert_eq!(selector.should_run_on(&a), Ok(true));
        assert_eq!(selector.should_run_on(&c), Ok(false));
        assert_eq!(selector.are_equivalent(&a, &b), Ok(true));
        assert_eq!(selector.are_equivalent(&a, &c), Ok(false));
    }

    #[test]
    fn test_target_selector_distinguishes_firmware() {
        let selector = TargetTagSelector {
            target: "ESP32_REV0".to_string(),
        };
        let a = TargetDescriptor::physical("COM3", "ESP32", "ESP32_REV0");
        let b = TargetDescriptor::physical("COM4", "ESP32", "ESP32_PSRAM");

        assert_eq!(selector.should_run_on(&a), Ok(true));
        assert_eq!(selector.should_run_on(&b), Ok(false));
        assert_eq!(selector.are_equivalent(&a, &b), Ok(false));
    }

    #[test]
    fn test_selector_spec_from_json() {
        let spec: SelectorSpec =
            serde_json::from_str(r#"{"kind":"platform","platform":"ESP32"}"#).unwrap();
        assert_eq!(spec.build().id(), "platform:ESP32");

        let spec: SelectorSpec = serde_json::from_str(r#"{"kind":"any-hardware"}"#).unwrap();
        assert_eq!(spec.build().id(), "any-hardware");
    }
}
