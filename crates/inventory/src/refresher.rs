use crate::filter::DeviceFilter;
use crate::snapshot::InventorySnapshot;
use crate::topology::{build_forest, TopologyIssue};
use anyhow::{Context, Result};
use hwscope_core::{ClassIcon, ClassGuid, DeviceBackend, DeviceRecord};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Records pulled from the backend by the last fresh cycle.
#[derive(Debug, Default)]
struct RecordCache {
    records: Vec<DeviceRecord>,
    loaded: bool,
    cycle: u64,
}

/// Owns the record cache and runs refresh cycles one at a time.
///
/// The cache is only touched while the cycle guard is held. The query is
/// read after the guard is acquired, so a cycle that had to wait always runs
/// with the inputs current at the moment it starts.
pub struct InventoryRefresher {
    backend: Arc<dyn DeviceBackend>,
    host_label: String,
    query: RwLock<String>,
    cache: Mutex<RecordCache>,
    publisher: watch::Sender<Arc<InventorySnapshot>>,
}

impl InventoryRefresher {
    pub fn new(backend: Arc<dyn DeviceBackend>, host_label: impl Into<String>) -> Self {
        let host_label = host_label.into();
        let (publisher, _) = watch::channel(Arc::new(InventorySnapshot::empty(&host_label)));
        Self {
            backend,
            host_label,
            query: RwLock::new(String::new()),
            cache: Mutex::new(RecordCache::default()),
            publisher,
        }
    }

    pub fn host_label(&self) -> &str {
        &self.host_label
    }

    pub fn set_query(&self, query: &str) {
        let mut current = self.query.write().unwrap_or_else(|p| p.into_inner());
        *current = query.trim().to_string();
    }

    pub fn query(&self) -> String {
        self.query.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<InventorySnapshot>> {
        self.publisher.subscribe()
    }

    pub fn snapshot(&self) -> Arc<InventorySnapshot> {
        Arc::clone(&self.publisher.borrow())
    }

    /// Run one full cycle and publish its snapshot.
    ///
    /// With `pull_fresh` the backend is queried again; otherwise the cached
    /// records are re-filtered. The first cycle always pulls.
    pub fn refresh(&self, pull_fresh: bool) -> Arc<InventorySnapshot> {
        let mut cache = self.lock_cache();
        if pull_fresh || !cache.loaded {
            match self.pull() {
                Ok(records) => {
                    cache.records = records;
                    cache.loaded = true;
                }
                Err(err) => {
                    warn!(error = %format!("{err:#}"), kept = cache.records.len(), "device enumeration failed; keeping previous records");
                }
            }
        }
        cache.cycle += 1;

        let query = self.query();
        let filter = DeviceFilter::new(&query);
        let filtered: Vec<DeviceRecord> = filter.apply(&cache.records).cloned().collect();
        let forest = build_forest(&filtered, &cache.records, &self.host_label);
        for issue in &forest.issues {
            match issue {
                TopologyIssue::DanglingParent { device_id, parent_device_id } => {
                    debug!(%device_id, %parent_device_id, "parent not enumerated; attached to host")
                }
                TopologyIssue::Cycle { device_id } => {
                    warn!(%device_id, "parent cycle in enumeration; attached to host")
                }
            }
        }
        let class_icons = self.resolve_icons(forest.class_guids());

        let snapshot = Arc::new(InventorySnapshot::new(
            cache.cycle,
            query,
            filtered,
            forest,
            class_icons,
        ));
        info!(
            cycle = snapshot.cycle,
            pulled = pull_fresh,
            total = cache.records.len(),
            listed = snapshot.records.len(),
            tree = snapshot.forest.len(),
            "inventory refreshed"
        );
        self.publisher.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    fn pull(&self) -> Result<Vec<DeviceRecord>> {
        let mut records = self.backend.devices().context("enumerate devices")?;
        // Interfaces go after devices so a device keeps precedence for a
        // shared id when the tree is built.
        match self.backend.interfaces().context("enumerate interfaces") {
            Ok(interfaces) => records.extend(interfaces),
            Err(err) => warn!(error = %format!("{err:#}"), "continuing without interfaces"),
        }
        Ok(records)
    }

    fn resolve_icons(
        &self,
        classes: impl IntoIterator<Item = ClassGuid>,
    ) -> BTreeMap<ClassGuid, ClassIcon> {
        classes
            .into_iter()
            .filter_map(|guid| self.backend.class_icon(guid).map(|icon| (guid, icon)))
            .collect()
    }

    fn lock_cache(&self) -> MutexGuard<'_, RecordCache> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for InventoryRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryRefresher")
            .field("host_label", &self.host_label)
            .field("query", &self.query())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwscope_core::mock::MockBackend;
    use std::time::Duration;

    fn hub_and_port() -> Vec<DeviceRecord> {
        vec![
            DeviceRecord::new("A1", "", "Root Hub"),
            DeviceRecord::new("B1", "A1", "Port1"),
        ]
    }

    #[test]
    fn refresh_publishes_filtered_list_and_forest() {
        let backend = Arc::new(MockBackend::new(hub_and_port()));
        let refresher = InventoryRefresher::new(backend, "host");
        let mut rx = refresher.subscribe();
        refresher.set_query("Port1");
        let snapshot = refresher.refresh(true);

        assert!(rx.has_changed().unwrap());
        let published = rx.borrow_and_update().clone();
        assert_eq!(published.snapshot_id, snapshot.snapshot_id);
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.forest.root_ids(), vec!["A1"]);
        assert_eq!(snapshot.forest.child_ids("A1"), vec!["B1"]);
    }

    #[test]
    fn interfaces_are_appended_after_devices() {
        let mut iface = DeviceRecord::new("A1", "", "Hub Interface");
        iface.is_interface = true;
        let backend = Arc::new(MockBackend::new(hub_and_port()).with_interfaces(vec![iface]));
        let refresher = InventoryRefresher::new(backend, "host");
        let snapshot = refresher.refresh(true);
        let kinds: Vec<bool> = snapshot.records.iter().map(|r| r.is_interface).collect();
        assert_eq!(kinds, vec![false, false, true]);
        assert!(!snapshot.forest.find("A1").unwrap().record.is_interface);
    }

    #[test]
    fn filter_refresh_reuses_cached_records() {
        let backend = Arc::new(MockBackend::new(hub_and_port()));
        let refresher = InventoryRefresher::new(backend.clone(), "host");
        refresher.refresh(true);
        refresher.set_query("root");
        let snapshot = refresher.refresh(false);
        assert_eq!(backend.pulls(), 1);
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.query, "root");
    }

    #[test]
    fn first_refresh_pulls_even_when_not_asked() {
        let backend = Arc::new(MockBackend::new(hub_and_port()));
        let refresher = InventoryRefresher::new(backend.clone(), "host");
        let snapshot = refresher.refresh(false);
        assert_eq!(backend.pulls(), 1);
        assert_eq!(snapshot.records.len(), 2);
    }

    #[test]
    fn enumeration_failure_keeps_previous_records() {
        let backend = Arc::new(MockBackend::new(hub_and_port()));
        let refresher = InventoryRefresher::new(backend.clone(), "host");
        refresher.refresh(true);
        backend.fail_enumeration(true);
        let snapshot = refresher.refresh(true);
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.cycle, 2);
    }

    #[test]
    fn enumeration_failure_on_first_cycle_gives_empty_tree() {
        let backend = Arc::new(MockBackend::new(hub_and_port()));
        backend.fail_enumeration(true);
        let refresher = InventoryRefresher::new(backend, "host");
        let snapshot = refresher.refresh(true);
        assert!(snapshot.records.is_empty());
        assert!(snapshot.forest.is_empty());
    }

    #[test]
    fn icons_resolved_for_classes_in_tree() {
        let guid = ClassGuid::from_u128(0x36fc9e60_c465_11cf_8056_444553540000);
        let mut records = hub_and_port();
        records[0].class_guid = guid;
        let backend = Arc::new(MockBackend::new(records));
        backend.set_icon(guid, "usb-hub");
        let refresher = InventoryRefresher::new(backend, "host");
        refresher.set_query("Port1");
        let snapshot = refresher.refresh(true);
        // the hub only appears as an ancestor, but its icon is still needed
        assert_eq!(snapshot.class_icons.get(&guid).map(|i| i.name.as_str()), Some("usb-hub"));
    }

    #[test]
    fn overlapping_refreshes_serialize_without_lost_update() {
        let backend = Arc::new(MockBackend::new(hub_and_port()));
        backend.set_enumeration_delay(Duration::from_millis(150));
        let refresher = Arc::new(InventoryRefresher::new(backend.clone(), "host"));

        let first = {
            let refresher = Arc::clone(&refresher);
            std::thread::spawn(move || refresher.refresh(true))
        };
        std::thread::sleep(Duration::from_millis(30));
        let mut devices = hub_and_port();
        devices.push(DeviceRecord::new("C1", "A1", "Port2"));
        backend.set_devices(devices);
        refresher.set_query("Port2");
        let second = {
            let refresher = Arc::clone(&refresher);
            std::thread::spawn(move || refresher.refresh(true))
        };
        let a = first.join().unwrap();
        let b = second.join().unwrap();

        assert_ne!(a.cycle, b.cycle);
        let latest = refresher.snapshot();
        assert_eq!(latest.cycle, 2);
        assert_eq!(latest.query, "Port2");
        assert_eq!(latest.forest.child_ids("A1"), vec!["C1"]);
    }
}
