use crate::topology::DeviceForest;
use hwscope_core::{now_utc_rfc3339, ClassGuid, ClassIcon, DeviceRecord, INVENTORY_SCHEMA_VERSION};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Result of one refresh cycle, handed to the presentation layer read-only.
#[derive(Debug, Clone, Serialize)]
pub struct InventorySnapshot {
    pub snapshot_id: Uuid,
    pub schema_version: String,
    pub generated_at_utc: String,
    /// Increments once per completed refresh cycle; 0 before the first one.
    pub cycle: u64,
    pub query: String,
    /// Records that matched the query, devices first then interfaces.
    pub records: Vec<DeviceRecord>,
    pub forest: DeviceForest,
    pub class_icons: BTreeMap<ClassGuid, ClassIcon>,
}

impl InventorySnapshot {
    pub fn new(
        cycle: u64,
        query: String,
        records: Vec<DeviceRecord>,
        forest: DeviceForest,
        class_icons: BTreeMap<ClassGuid, ClassIcon>,
    ) -> Self {
        Self {
            snapshot_id: Uuid::new_v4(),
            schema_version: INVENTORY_SCHEMA_VERSION.to_string(),
            generated_at_utc: now_utc_rfc3339(),
            cycle,
            query,
            records,
            forest,
            class_icons,
        }
    }

    pub fn empty(host_label: &str) -> Self {
        Self::new(
            0,
            String::new(),
            Vec::new(),
            DeviceForest::empty(host_label),
            BTreeMap::new(),
        )
    }

    pub fn list_label(&self) -> String {
        format!("Device List [{}]", self.records.len())
    }

    /// Counts every node in the tree, including ancestors spliced in for
    /// filtered children.
    pub fn tree_label(&self) -> String {
        format!("Device Tree [{}]", self.forest.len())
    }

    pub fn icon_for(&self, record: &DeviceRecord) -> Option<&ClassIcon> {
        self.class_icons.get(&record.class_guid)
    }
}
