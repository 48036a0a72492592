//! Execution target descriptors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device class a selection is scheduled on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Virtual,
    Physical,
}

impl DeviceClass {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceClass::Virtual => "virtual",
            DeviceClass::Physical => "physical",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capability descriptor of a target, as seen by selectors
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Stable identity; the transport name for physical targets
    pub id: String,
    pub class: DeviceClass,
    /// Platform tag, e.g. a chip family
    pub platform: String,
    /// Firmware/target tag
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

impl TargetDescriptor {
    pub fn physical(
        id: impl Into<String>,
        platform: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            class: DeviceClass::Physical,
            platform: platform.into(),
            target: target.into(),
            firmware_version: None,
        }
    }

    pub fn virtual_slot(slot: usize) -> Self {
        Self {
            id: format!("virtual-{slot}"),
            class: DeviceClass::Virtual,
            platform: "virtual".to_string(),
            target: "virtual".to_string(),
            firmware_version: None,
        }
    }

    pub fn with_firmware(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }

    /// Name reported alongside results
    pub fn display_name(&self) -> String {
        match self.class {
            DeviceClass::Virtual => self.id.clone(),
            DeviceClass::Physical => format!("{} ({})", self.target, self.id),
        }
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
