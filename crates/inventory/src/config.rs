use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DEBOUNCE_MS: u64 = 520;
pub const DEFAULT_VIRTUAL_ADAPTER_EXCEPTION: &str = "RAS Async Adapter";
pub const DEFAULT_UNKNOWN_MARKER: &str = "Unknown";
pub const HOST_LABEL_ENV: &str = "HWSCOPE_HOST_LABEL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Delay shared by the hardware-change and filter-edit debouncers.
    pub debounce_ms: u64,
    /// Label of the synthetic host node; the machine host name when unset.
    pub host_label: Option<String>,
    /// Offline devices whose description contains this are never cleaned.
    pub virtual_adapter_exception: String,
    pub unknown_marker: String,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            host_label: None,
            virtual_adapter_exception: DEFAULT_VIRTUAL_ADAPTER_EXCEPTION.to_string(),
            unknown_marker: DEFAULT_UNKNOWN_MARKER.to_string(),
        }
    }
}

impl InventoryConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(label) = std::env::var(HOST_LABEL_ENV) {
            if !label.trim().is_empty() {
                self.host_label = Some(label.trim().to_string());
            }
        }
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn resolve_host_label(&self, fallback: &str) -> String {
        self.host_label
            .clone()
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }
}
