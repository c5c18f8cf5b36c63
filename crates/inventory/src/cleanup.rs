//! Classification of devices eligible for bulk removal.

use crate::config::InventoryConfig;
use hwscope_core::DeviceRecord;
use serde::Serialize;

pub const CONFIRM_TITLE: &str = "Do you want to remove devices?";
pub const NOTHING_FOUND: &str = "No offline, problem or unknown devices found.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupRules {
    pub virtual_adapter_exception: String,
    pub unknown_marker: String,
}

impl From<&InventoryConfig> for CleanupRules {
    fn from(config: &InventoryConfig) -> Self {
        Self {
            virtual_adapter_exception: config.virtual_adapter_exception.clone(),
            unknown_marker: config.unknown_marker.clone(),
        }
    }
}

impl Default for CleanupRules {
    fn default() -> Self {
        Self::from(&InventoryConfig::default())
    }
}

/// Disjoint cleanup categories, checked in priority order: a device lands
/// in the first category it qualifies for.
#[derive(Debug, Clone, Default)]
pub struct CleanupPlan {
    pub offline: Vec<DeviceRecord>,
    pub problem: Vec<DeviceRecord>,
    pub unknown: Vec<DeviceRecord>,
}

impl CleanupPlan {
    pub fn categorize(devices: &[DeviceRecord], rules: &CleanupRules) -> Self {
        let mut plan = Self::default();
        for device in devices {
            if is_offline(device, rules) {
                plan.offline.push(device.clone());
            } else if device.has_problem() {
                plan.problem.push(device.clone());
            } else if device.description.contains(rules.unknown_marker.as_str()) {
                plan.unknown.push(device.clone());
            }
        }
        plan
    }

    pub fn total(&self) -> usize {
        self.offline.len() + self.problem.len() + self.unknown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// One line per non-empty category, e.g. "3 offline devices.".
    pub fn summary_lines(&self) -> Vec<String> {
        [
            (self.offline.len(), "offline"),
            (self.problem.len(), "problem"),
            (self.unknown.len(), "unknown"),
        ]
        .into_iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, name)| format!("{count} {name} devices."))
        .collect()
    }

    pub fn confirmation_message(&self) -> String {
        format!(
            "Do you want to remove offline, problem or unknown devices?\n\n{}",
            self.summary_lines().join("\n")
        )
    }

    /// Offline first, then problem, then unknown.
    pub fn removal_order(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.offline
            .iter()
            .chain(self.problem.iter())
            .chain(self.unknown.iter())
    }
}

fn is_offline(device: &DeviceRecord, rules: &CleanupRules) -> bool {
    !device.is_present
        && device.is_removable
        && !device
            .description
            .contains(rules.virtual_adapter_exception.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleanupOutcome {
    NothingFound,
    ReportOnly,
    Declined,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub device_id: String,
    pub description: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub outcome: CleanupOutcome,
    pub offline: usize,
    pub problem: usize,
    pub unknown: usize,
    pub removed: Vec<String>,
    pub failures: Vec<CleanupFailure>,
    pub lines: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwscope_core::DeviceStatus;

    fn device(id: &str, description: &str, present: bool, removable: bool, problem: bool) -> DeviceRecord {
        let mut record = DeviceRecord::new(id, "", description);
        record.is_present = present;
        record.is_removable = removable;
        if problem {
            record.status |= DeviceStatus::HAS_PROBLEM;
        }
        record
    }

    #[test]
    fn offline_wins_over_problem() {
        let devices = vec![device("a", "Gamepad", false, true, true)];
        let plan = CleanupPlan::categorize(&devices, &CleanupRules::default());
        assert_eq!(plan.offline.len(), 1);
        assert!(plan.problem.is_empty());
    }

    #[test]
    fn categories_are_disjoint() {
        let devices = vec![
            device("off", "Unknown Pad", false, true, true),
            device("prob", "Unknown Disk", true, true, true),
            device("unk", "Unknown USB Device", true, false, false),
            device("ok", "Keyboard", true, true, false),
        ];
        let plan = CleanupPlan::categorize(&devices, &CleanupRules::default());
        let ids: Vec<&str> = plan.removal_order().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["off", "prob", "unk"]);
        let mut unique = ids.clone();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn virtual_adapter_is_never_offline() {
        let devices = vec![device("ras", "RAS Async Adapter", false, true, false)];
        let plan = CleanupPlan::categorize(&devices, &CleanupRules::default());
        assert!(plan.is_empty());
    }

    #[test]
    fn virtual_adapter_with_problem_still_counts_as_problem() {
        let devices = vec![device("ras", "RAS Async Adapter", false, true, true)];
        let plan = CleanupPlan::categorize(&devices, &CleanupRules::default());
        assert_eq!(plan.problem.len(), 1);
    }

    #[test]
    fn absent_but_fixed_device_is_not_offline() {
        let devices = vec![device("fixed", "PCI Bridge", false, false, false)];
        assert!(CleanupPlan::categorize(&devices, &CleanupRules::default()).is_empty());
    }

    #[test]
    fn unknown_match_is_case_sensitive() {
        let devices = vec![device("u", "unknown thing", true, false, false)];
        assert!(CleanupPlan::categorize(&devices, &CleanupRules::default()).is_empty());
    }

    #[test]
    fn summary_skips_empty_categories() {
        let devices = vec![
            device("a", "Pad", false, true, false),
            device("b", "Pad", false, true, false),
            device("c", "Unknown", true, false, false),
        ];
        let plan = CleanupPlan::categorize(&devices, &CleanupRules::default());
        assert_eq!(plan.summary_lines(), vec!["2 offline devices.", "1 unknown devices."]);
        assert!(plan.confirmation_message().ends_with("2 offline devices.\n1 unknown devices."));
    }
}
