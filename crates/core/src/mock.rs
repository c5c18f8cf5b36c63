//! In-memory device backend for tests and offline demos.

use crate::{ClassGuid, ClassIcon, DeviceBackend, DeviceRecord};
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A mutating call observed by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    SetState { device_id: String, enabled: bool },
    Remove(String),
    Scan,
}

/// Backend holding its device and interface lists in memory.
///
/// Every mutating call is recorded so tests can assert on what reached the
/// backend. Removal actually drops the device, and state changes are
/// reflected by `is_device_disabled`.
#[derive(Debug, Default)]
pub struct MockBackend {
    devices: Mutex<Vec<DeviceRecord>>,
    interfaces: Mutex<Vec<DeviceRecord>>,
    icons: Mutex<HashMap<ClassGuid, String>>,
    disabled: Mutex<HashMap<String, bool>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<BackendCall>>,
    enumeration_delay: Mutex<Duration>,
    fail_enumeration: AtomicBool,
    pulls: AtomicUsize,
}

impl MockBackend {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Self::default()
        }
    }

    pub fn with_interfaces(self, interfaces: Vec<DeviceRecord>) -> Self {
        *lock(&self.interfaces) = interfaces;
        self
    }

    pub fn set_devices(&self, devices: Vec<DeviceRecord>) {
        *lock(&self.devices) = devices;
    }

    pub fn set_icon(&self, class_guid: ClassGuid, name: impl Into<String>) {
        lock(&self.icons).insert(class_guid, name.into());
    }

    pub fn set_disabled(&self, device_id: &str, disabled: bool) {
        lock(&self.disabled).insert(device_id.to_string(), disabled);
    }

    /// Make every mutation of `device_id` fail.
    pub fn fail_on(&self, device_id: &str) {
        lock(&self.failing).insert(device_id.to_string());
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    /// Sleep inside `devices()` to widen race windows in tests.
    pub fn set_enumeration_delay(&self, delay: Duration) {
        *lock(&self.enumeration_delay) = delay;
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    fn check_failing(&self, device_id: &str, op: &str) -> Result<()> {
        if lock(&self.failing).contains(device_id) {
            return Err(anyhow!("{op} failed for {device_id}: access denied"));
        }
        Ok(())
    }
}

impl DeviceBackend for MockBackend {
    fn devices(&self) -> Result<Vec<DeviceRecord>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.enumeration_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(anyhow!("device enumeration unavailable"));
        }
        Ok(lock(&self.devices).clone())
    }

    fn interfaces(&self) -> Result<Vec<DeviceRecord>> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(anyhow!("interface enumeration unavailable"));
        }
        Ok(lock(&self.interfaces).clone())
    }

    fn class_icon(&self, class_guid: ClassGuid) -> Option<ClassIcon> {
        lock(&self.icons).get(&class_guid).map(|name| ClassIcon {
            class_guid,
            name: name.clone(),
        })
    }

    fn is_device_disabled(&self, device_id: &str) -> Option<bool> {
        if !lock(&self.devices).iter().any(|d| d.device_id == device_id) {
            return None;
        }
        Some(lock(&self.disabled).get(device_id).copied().unwrap_or(false))
    }

    fn set_device_state(&self, device_id: &str, enabled: bool) -> Result<()> {
        lock(&self.calls).push(BackendCall::SetState {
            device_id: device_id.to_string(),
            enabled,
        });
        self.check_failing(device_id, "set state")?;
        lock(&self.disabled).insert(device_id.to_string(), !enabled);
        Ok(())
    }

    fn remove_device(&self, device_id: &str) -> Result<()> {
        lock(&self.calls).push(BackendCall::Remove(device_id.to_string()));
        self.check_failing(device_id, "remove")?;
        lock(&self.devices).retain(|d| d.device_id != device_id);
        Ok(())
    }

    fn scan_for_hardware_changes(&self) -> Result<()> {
        lock(&self.calls).push(BackendCall::Scan);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
