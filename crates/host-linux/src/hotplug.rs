use anyhow::{Context, Result};
use hwscope_core::DeviceChange;
use notify::event::{CreateKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tracing::{debug, info, warn};

/// Device nodes for USB show up here as they are plugged in.
pub const DEFAULT_DEVNODE_DIR: &str = "/dev/bus/usb";

/// Watches a devnode directory and reports plug and unplug events.
///
/// Every creation or removal produces the matching arrival or removal
/// notification followed by `DevnodesChanged`.
pub struct HotplugWatcher {
    _watcher: RecommendedWatcher,
}

impl HotplugWatcher {
    pub fn new(
        dir: impl AsRef<Path>,
        on_change: impl Fn(DeviceChange) + Send + 'static,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in classify_event(&event) {
                    on_change(change);
                }
            }
            Err(err) => warn!(error = %err, "hotplug watch error"),
        })
        .context("create hotplug watcher")?;
        watcher
            .watch(dir, RecursiveMode::Recursive)
            .with_context(|| format!("watch {}", dir.display()))?;
        info!(dir = %dir.display(), "hotplug watcher started");
        Ok(Self { _watcher: watcher })
    }
}

impl std::fmt::Debug for HotplugWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotplugWatcher").finish_non_exhaustive()
    }
}

pub fn classify_event(event: &Event) -> Vec<DeviceChange> {
    let path = event
        .paths
        .first()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let change = match event.kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => {
            DeviceChange::Arrival(path)
        }
        EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => {
            DeviceChange::RemoveComplete(path)
        }
        // Bus directories come and go with their controllers.
        EventKind::Create(_) | EventKind::Remove(_) => return vec![DeviceChange::DevnodesChanged],
        _ => {
            debug!(kind = ?event.kind, "ignoring devnode event");
            return Vec::new();
        }
    };
    vec![change, DeviceChange::DevnodesChanged]
}
