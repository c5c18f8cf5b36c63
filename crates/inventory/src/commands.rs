//! Privileged device commands.
//!
//! Every command re-checks elevation when invoked and reports its progress
//! as human-readable lines through a [`CommandLog`].

use crate::cleanup::{
    CleanupFailure, CleanupOutcome, CleanupPlan, CleanupReport, CleanupRules, CONFIRM_TITLE,
    NOTHING_FOUND,
};
use crate::debounce::Debouncer;
use crate::error::{CommandError, CommandResult};
use crate::refresher::InventoryRefresher;
use anyhow::Context;
use hwscope_core::{DeviceBackend, DeviceRecord};
use hwscope_safety::{can_mutate_devices, Confirmer, PrivilegeChecker, SafetyDecision};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandState {
    Idle,
    Enumerating,
    Confirming,
    Executing,
    Done,
    Rejected,
}

/// Receives progress and result lines for the presentation layer.
pub trait CommandLog: Send + Sync {
    fn record(&self, state: CommandState, line: &str);
}

/// Sends command lines to `tracing` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl CommandLog for TracingLog {
    fn record(&self, state: CommandState, line: &str) {
        info!(target: "hwscope::commands", ?state, "{line}");
    }
}

/// Keeps every line in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(CommandState, String)>>,
}

impl MemoryLog {
    pub fn entries(&self) -> Vec<(CommandState, String)> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries().into_iter().map(|(_, line)| line).collect()
    }

    pub fn states(&self) -> Vec<CommandState> {
        let mut states: Vec<CommandState> = self.entries().into_iter().map(|(s, _)| s).collect();
        states.dedup();
        states
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl CommandLog for MemoryLog {
    fn record(&self, state: CommandState, line: &str) {
        info!(target: "hwscope::commands", ?state, "{line}");
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((state, line.to_string()));
    }
}

/// Which commands make sense for the current selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommandAvailability {
    pub enable: bool,
    pub disable: bool,
    pub remove: bool,
    pub clean: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub device_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub removed: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Clone)]
pub struct DeviceCommandExecutor {
    backend: Arc<dyn DeviceBackend>,
    privilege: Arc<dyn PrivilegeChecker>,
    confirmer: Arc<dyn Confirmer>,
    log: Arc<dyn CommandLog>,
    refresher: Arc<InventoryRefresher>,
    hardware_refresh: Arc<Debouncer>,
    rules: CleanupRules,
}

impl DeviceCommandExecutor {
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        privilege: Arc<dyn PrivilegeChecker>,
        confirmer: Arc<dyn Confirmer>,
        log: Arc<dyn CommandLog>,
        refresher: Arc<InventoryRefresher>,
        hardware_refresh: Arc<Debouncer>,
        rules: CleanupRules,
    ) -> Self {
        Self {
            backend,
            privilege,
            confirmer,
            log,
            refresher,
            hardware_refresh,
            rules,
        }
    }

    /// The follow-up pull-fresh cycle runs on the caller's thread, outside
    /// the orchestrator, so the new state is published when this returns.
    pub fn set_enabled(&self, device_id: &str, enabled: bool) -> CommandResult<()> {
        self.require_privilege()?;
        let device = self.find_device(device_id)?;
        let verb = if enabled { "Enabling" } else { "Disabling" };
        self.log(CommandState::Executing, format!("{verb} device: {}", device.description));
        if let Err(err) = self.backend.set_device_state(device_id, enabled) {
            let err = CommandError::backend(device_id, &err);
            self.log(CommandState::Done, err.to_string());
            return Err(err);
        }
        let done = if enabled { "enabled" } else { "disabled" };
        self.log(CommandState::Done, format!("Device {done}: {}", device.description));
        self.refresher.refresh(true);
        Ok(())
    }

    /// Refreshes on the caller's thread like [`set_enabled`](Self::set_enabled).
    pub fn remove(&self, device_id: &str) -> CommandResult<()> {
        self.require_privilege()?;
        let device = self.find_device(device_id)?;
        self.remove_record(&device)?;
        self.refresher.refresh(true);
        Ok(())
    }

    /// Remove several devices; a failing item never stops the rest.
    pub fn remove_many(&self, device_ids: &[String]) -> CommandResult<BatchReport> {
        self.require_privilege()?;
        let devices = self.enumerate()?;
        let mut report = BatchReport::default();
        for device_id in device_ids {
            let result = match devices.iter().find(|d| &d.device_id == device_id) {
                Some(device) => self.remove_record(device),
                None => Err(self.not_found(device_id)),
            };
            match result {
                Ok(()) => report.removed.push(device_id.clone()),
                Err(err) => report.failed.push(BatchFailure {
                    device_id: device_id.clone(),
                    message: err.to_string(),
                }),
            }
        }
        self.log(
            CommandState::Done,
            format!("Removed {} of {} devices.", report.removed.len(), device_ids.len()),
        );
        if !report.removed.is_empty() {
            self.refresher.refresh(true);
        }
        Ok(report)
    }

    /// Ask the OS to rescan; the inventory follows through the hardware
    /// debounce path.
    pub fn scan_for_changes(&self) -> CommandResult<()> {
        self.log(CommandState::Executing, "Scanning for hardware changes...");
        let result = self
            .backend
            .scan_for_hardware_changes()
            .map_err(|err| CommandError::backend("*", &err));
        if let Err(err) = &result {
            warn!(error = %err, "hardware scan failed");
        }
        self.hardware_refresh.schedule();
        self.log(CommandState::Done, "Scan requested.");
        result
    }

    pub fn availability(
        &self,
        selection: Option<&DeviceRecord>,
        device_view_active: bool,
    ) -> CommandAvailability {
        let Some(device) = selection else {
            return CommandAvailability {
                clean: device_view_active,
                ..CommandAvailability::default()
            };
        };
        // An undeterminable state counts as enabled.
        let disabled = self.backend.is_device_disabled(&device.device_id) == Some(true);
        CommandAvailability {
            enable: disabled,
            disable: !disabled,
            remove: device.is_removable,
            clean: device_view_active,
        }
    }

    /// Scan for offline, problem and unknown devices and, when `confirm` is
    /// set and the user agrees, remove all of them.
    pub fn cleanup(&self, confirm: bool) -> CommandResult<CleanupReport> {
        self.require_privilege()?;
        self.log(CommandState::Enumerating, "Enumerating Devices...");
        let devices = self.enumerate()?;
        let plan = CleanupPlan::categorize(&devices, &self.rules);
        let mut report = CleanupReport {
            outcome: CleanupOutcome::ReportOnly,
            offline: plan.offline.len(),
            problem: plan.problem.len(),
            unknown: plan.unknown.len(),
            removed: Vec::new(),
            failures: Vec::new(),
            lines: vec!["Enumerating Devices...".to_string()],
        };

        if plan.is_empty() {
            report.outcome = CleanupOutcome::NothingFound;
            self.push_line(&mut report, CommandState::Enumerating, NOTHING_FOUND.to_string());
        } else {
            for line in plan.summary_lines() {
                self.push_line(&mut report, CommandState::Enumerating, line);
            }
            if confirm {
                self.execute_cleanup(&plan, &mut report);
            }
        }

        self.push_line(&mut report, CommandState::Done, "Done".to_string());
        if report.outcome == CleanupOutcome::Completed {
            self.hardware_refresh.schedule();
        }
        Ok(report)
    }

    /// Run [`cleanup`](Self::cleanup) on a dedicated thread. It works from
    /// its own enumeration and never touches the refresher's cache.
    pub fn spawn_cleanup(
        &self,
        confirm: bool,
    ) -> anyhow::Result<JoinHandle<CommandResult<CleanupReport>>> {
        let executor = self.clone();
        std::thread::Builder::new()
            .name("hwscope-cleanup".to_string())
            .spawn(move || executor.cleanup(confirm))
            .context("spawn cleanup thread")
    }

    fn execute_cleanup(&self, plan: &CleanupPlan, report: &mut CleanupReport) {
        self.log(CommandState::Confirming, CONFIRM_TITLE);
        if !self.confirmer.confirm(&plan.confirmation_message(), CONFIRM_TITLE) {
            report.outcome = CleanupOutcome::Declined;
            self.push_line(report, CommandState::Confirming, "Cleanup cancelled.".to_string());
            return;
        }

        let total = plan.total();
        for (index, device) in plan.removal_order().enumerate() {
            self.push_line(
                report,
                CommandState::Executing,
                format!("Removing Device: {}/{} - {}", index + 1, total, device.description),
            );
            match self.backend.remove_device(&device.device_id) {
                Ok(()) => report.removed.push(device.device_id.clone()),
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(device_id = %device.device_id, error = %message, "device removal failed");
                    self.push_line(report, CommandState::Executing, message.clone());
                    report.failures.push(CleanupFailure {
                        device_id: device.device_id.clone(),
                        description: device.description.clone(),
                        message,
                    });
                }
            }
        }
        report.outcome = CleanupOutcome::Completed;
    }

    fn remove_record(&self, device: &DeviceRecord) -> CommandResult<()> {
        if !device.is_removable {
            let err = CommandError::NotRemovable(device.device_id.clone());
            self.log(CommandState::Done, err.to_string());
            return Err(err);
        }
        self.log(CommandState::Executing, format!("Removing Device: {}", device.description));
        match self.backend.remove_device(&device.device_id) {
            Ok(()) => {
                self.log(CommandState::Done, format!("Device removed: {}", device.description));
                Ok(())
            }
            Err(err) => {
                let err = CommandError::backend(&device.device_id, &err);
                self.log(CommandState::Done, err.to_string());
                Err(err)
            }
        }
    }

    fn require_privilege(&self) -> CommandResult<()> {
        match can_mutate_devices(self.privilege.as_ref()) {
            SafetyDecision::Allow => Ok(()),
            SafetyDecision::Deny(reason) => {
                self.log(CommandState::Rejected, reason.clone());
                Err(CommandError::PrivilegeDenied(reason))
            }
        }
    }

    fn enumerate(&self) -> CommandResult<Vec<DeviceRecord>> {
        self.backend
            .devices()
            .map_err(|err| CommandError::backend("*", &err.context("enumerate devices")))
    }

    fn find_device(&self, device_id: &str) -> CommandResult<DeviceRecord> {
        self.log(CommandState::Enumerating, format!("Looking up device {device_id}"));
        self.enumerate()?
            .into_iter()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| self.not_found(device_id))
    }

    fn not_found(&self, device_id: &str) -> CommandError {
        let err = CommandError::RecordNotFound(device_id.to_string());
        warn!(%device_id, "device vanished before the command ran");
        self.log(CommandState::Done, err.to_string());
        err
    }

    fn push_line(&self, report: &mut CleanupReport, state: CommandState, line: String) {
        self.log.record(state, &line);
        report.lines.push(line);
    }

    fn log(&self, state: CommandState, line: impl AsRef<str>) {
        self.log.record(state, line.as_ref());
    }
}

impl std::fmt::Debug for DeviceCommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCommandExecutor")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}
