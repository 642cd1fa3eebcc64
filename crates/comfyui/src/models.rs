//! Engine system statistics (`/system_stats`).
//!
//! Fields added in later engine releases are optional so older servers
//! still deserialize.

use serde::{Deserialize, Serialize};

/// Device information from `/system_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub vram_total: u64,
    #[serde(default)]
    pub vram_free: u64,
    #[serde(default)]
    pub torch_vram_total: u64,
    #[serde(default)]
    pub torch_vram_free: u64,
}

/// Host information from `/system_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub ram_total: u64,
    #[serde(default)]
    pub ram_free: u64,
    #[serde(default)]
    pub comfyui_version: Option<String>,
    #[serde(default)]
    pub python_version: Option<String>,
    #[serde(default)]
    pub pytorch_version: Option<String>,
    #[serde(default)]
    pub embedded_python: bool,
    #[serde(default)]
    pub required_frontend_version: Option<String>,
    #[serde(default)]
    pub installed_templates_version: Option<String>,
}

/// Complete `/system_stats` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub system: SystemInfo,
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
}

impl SystemStats {
    /// Engine version string, `"unknown"` on servers that do not report it.
    pub fn version(&self) -> &str {
        self.system.comfyui_version.as_deref().unwrap_or("unknown")
    }

    /// Total free VRAM across all devices, in bytes.
    pub fn vram_free(&self) -> u64 {
        self.devices.iter().map(|d| d.vram_free).sum()
    }

    /// Name of the first device, if any.
    pub fn primary_device(&self) -> Option<&str> {
        self.devices.first().map(|d| d.name.as_str())
    }
}
