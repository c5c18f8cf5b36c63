use anyhow::Result;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

pub mod mock;

pub const INVENTORY_SCHEMA_VERSION: &str = "1.0.0";

/// Setup class of a device, used to group devices for icon lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassGuid(pub Uuid);

impl ClassGuid {
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for ClassGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated())
    }
}

bitflags! {
    /// Device node status flags as reported by the device manager.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DeviceStatus: u32 {
        const ROOT_ENUMERATED = 0x0000_0001;
        const DRIVER_LOADED = 0x0000_0002;
        const ENUM_LOADED = 0x0000_0004;
        const STARTED = 0x0000_0008;
        const MANUAL = 0x0000_0010;
        const NEED_TO_ENUM = 0x0000_0020;
        const NOT_FIRST_TIME = 0x0000_0040;
        const HARDWARE_ENUM = 0x0000_0080;
        const NEED_RESTART = 0x0000_0100;
        const HAS_MARK = 0x0000_0200;
        const HAS_PROBLEM = 0x0000_0400;
        const FILTERED = 0x0000_0800;
        const MOVED = 0x0000_1000;
        const DISABLEABLE = 0x0000_2000;
        const REMOVABLE = 0x0000_4000;
        const PRIVATE_PROBLEM = 0x0000_8000;
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::empty()
    }
}

impl DeviceStatus {
    /// Flag names joined with ", ", or "0" when no flag is set.
    pub fn describe(&self) -> String {
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        if names.is_empty() {
            "0".to_string()
        } else {
            names.join(", ")
        }
    }
}

/// Normalized description of one device or device interface.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_id: String,
    pub parent_device_id: String, // empty: attached directly to the host
    pub class_guid: ClassGuid,
    pub description: String,
    pub manufacturer: String,
    pub class_description: String,
    pub device_path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub revision: u16,
    pub status: DeviceStatus,
    pub is_present: bool,
    pub is_hidden: bool,
    pub is_removable: bool,
    pub is_interface: bool,
}

/// How a record should be rendered relative to its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayTone {
    Normal,
    Hidden,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareIds {
    pub vendor_id: String,
    pub product_id: String,
    pub revision: String,
}

impl DeviceRecord {
    pub fn new(
        device_id: impl Into<String>,
        parent_device_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            parent_device_id: parent_device_id.into(),
            description: description.into(),
            is_present: true,
            ..Self::default()
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_device_id.is_empty()
    }

    pub fn has_problem(&self) -> bool {
        self.status.contains(DeviceStatus::HAS_PROBLEM)
    }

    /// Text searched by the filter: class, description, manufacturer and id.
    pub fn search_text(&self) -> String {
        [
            self.class_description.as_str(),
            self.description.as_str(),
            self.manufacturer.as_str(),
            self.device_id.as_str(),
        ]
        .join(" ")
    }

    pub fn display_tone(&self) -> DisplayTone {
        if self.is_hidden {
            DisplayTone::Hidden
        } else if self.is_present {
            DisplayTone::Normal
        } else {
            DisplayTone::Absent
        }
    }

    pub fn hardware_ids(&self) -> HardwareIds {
        HardwareIds {
            vendor_id: format!("0x{:04X}", self.vendor_id),
            product_id: format!("0x{:04X}", self.product_id),
            revision: format!("0x{:04X}", self.revision),
        }
    }
}

/// Icon resolved for a device class. Only the catalog key is carried here.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClassIcon {
    pub class_guid: ClassGuid,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HostInfo {
    pub os: String, // "windows", "linux", "macos"
    pub os_version: String,
    pub machine: String,
    pub host_name: String,
}

/// Out-of-band notification from the OS device manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceChange {
    DevnodesChanged,
    Arrival(String),
    RemoveComplete(String),
    Other(u32),
}

/// Device enumeration and device state capability provided by the host OS.
pub trait DeviceBackend: Send + Sync {
    fn devices(&self) -> Result<Vec<DeviceRecord>>;
    fn interfaces(&self) -> Result<Vec<DeviceRecord>>;
    fn class_icon(&self, class_guid: ClassGuid) -> Option<ClassIcon>;
    /// `None` when the state cannot be determined.
    fn is_device_disabled(&self, device_id: &str) -> Option<bool>;
    fn set_device_state(&self, device_id: &str, enabled: bool) -> Result<()>;
    fn remove_device(&self, device_id: &str) -> Result<()>;
    fn scan_for_hardware_changes(&self) -> Result<()>;
}

pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
