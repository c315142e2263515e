use serde::{Deserialize, Serialize};

/// A device found on the network that answers the ECP search target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Base URL of the control endpoint, e.g. "http://192.168.1.134:8060/"
    pub location: String,

    /// Unique service name from the SSDP response, e.g. "uuid:roku:ecp:YH00AB123456"
    pub usn: String,
}

/// Identity and coarse state reported by a device.
/// This is the canonical data model shared by the adapter, builder and controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Vendor, e.g. "Roku"
    pub vendor_name: String,

    /// Marketing model name, e.g. "Roku Ultra"
    pub friendly_model_name: String,

    /// Hardware model number, e.g. "4800X"
    pub model_number: String,

    pub software_version: String,
    pub software_build: String,
    pub serial_number: String,

    /// Name the owner gave the device
    pub user_device_name: String,

    /// Power mode as reported by the device, e.g. "PowerOn" or "DisplayOff"
    pub power_mode: String,
}

impl DeviceIdentity {
    /// Copy of this identity with quotation marks stripped from the display name.
    /// Accessory names containing `"` cannot be paired.
    pub fn sanitized(&self) -> Self {
        Self {
            user_device_name: sanitize_name(&self.user_device_name),
            ..self.clone()
        }
    }

    /// Model string published to the controller: "Roku Ultra (4800X)"
    pub fn model(&self) -> String {
        format!("{} ({})", self.friendly_model_name, self.model_number)
    }

    /// Firmware string published to the controller: "11.5.0-4312"
    pub fn firmware(&self) -> String {
        format!("{}-{}", self.software_version, self.software_build)
    }
}

/// An installed application as listed by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    pub name: String,

    /// Identifier as reported; empty when the device could not determine one
    pub id: String,
}

impl AppEntry {
    /// Numeric identifier, if the reported one is a non-negative integer.
    pub fn numeric_id(&self) -> Option<u32> {
        self.id.parse().ok()
    }
}

/// Remove every quotation mark, leaving the rest of the string untouched.
pub fn sanitize_name(name: &str) -> String {
    name.replace('"', "")
}
