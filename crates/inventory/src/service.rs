use crate::cleanup::CleanupRules;
use crate::commands::{CommandLog, DeviceCommandExecutor};
use crate::config::InventoryConfig;
use crate::debounce::Debouncer;
use crate::refresher::InventoryRefresher;
use crate::snapshot::InventorySnapshot;
use anyhow::{Context, Result};
use hwscope_core::{DeviceBackend, DeviceChange};
use hwscope_safety::{Confirmer, PrivilegeChecker};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshRequest {
    Refresh { pull_fresh: bool },
    Shutdown,
}

/// Wires the refresher, both debouncers and the orchestration thread.
///
/// Every refresh triggered through the service runs on the
/// `hwscope-orchestrator` thread. Debouncer fires only post a request to it.
pub struct InventoryService {
    backend: Arc<dyn DeviceBackend>,
    refresher: Arc<InventoryRefresher>,
    hardware: Arc<Debouncer>,
    filter: Arc<Debouncer>,
    requests: mpsc::UnboundedSender<RefreshRequest>,
    worker: Mutex<Option<JoinHandle<()>>>,
    rules: CleanupRules,
}

impl InventoryService {
    /// Start the orchestration thread and queue the initial full refresh.
    pub fn start(
        backend: Arc<dyn DeviceBackend>,
        config: &InventoryConfig,
        fallback_host_label: &str,
        runtime: Handle,
    ) -> Result<Self> {
        let host_label = config.resolve_host_label(fallback_host_label);
        let refresher = Arc::new(InventoryRefresher::new(Arc::clone(&backend), host_label));
        let (requests, inbox) = mpsc::unbounded_channel();

        let worker = {
            let refresher = Arc::clone(&refresher);
            std::thread::Builder::new()
                .name("hwscope-orchestrator".to_string())
                .spawn(move || run_orchestrator(refresher, inbox))
                .context("spawn orchestrator thread")?
        };

        let hardware = Arc::new(Debouncer::new(
            "hardware",
            config.debounce(),
            runtime.clone(),
            poster(requests.clone(), true),
        ));
        let filter = Arc::new(Debouncer::new(
            "filter",
            config.debounce(),
            runtime,
            poster(requests.clone(), false),
        ));

        info!(
            host = refresher.host_label(),
            debounce_ms = config.debounce_ms,
            "inventory service started"
        );
        let service = Self {
            backend,
            refresher,
            hardware,
            filter,
            requests,
            worker: Mutex::new(Some(worker)),
            rules: CleanupRules::from(config),
        };
        service.refresh_now(true);
        Ok(service)
    }

    /// Feed an OS change notification. Only a devnode change refreshes.
    pub fn on_device_change(&self, change: &DeviceChange) {
        match change {
            DeviceChange::DevnodesChanged => self.hardware.schedule(),
            other => debug!(change = ?other, "ignoring device change"),
        }
    }

    pub fn refresh_hardware(&self) {
        self.hardware.schedule();
    }

    /// Store the query now; the re-filter happens after the debounce delay.
    pub fn set_filter(&self, text: &str) {
        self.refresher.set_query(text);
        self.filter.schedule();
    }

    /// Queue a cycle without waiting for a debouncer.
    pub fn refresh_now(&self, pull_fresh: bool) {
        if self
            .requests
            .send(RefreshRequest::Refresh { pull_fresh })
            .is_err()
        {
            debug!("orchestrator stopped; refresh request dropped");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<InventorySnapshot>> {
        self.refresher.subscribe()
    }

    pub fn snapshot(&self) -> Arc<InventorySnapshot> {
        self.refresher.snapshot()
    }

    /// Resolve once the first cycle has been published.
    pub async fn loaded(&self) -> Arc<InventorySnapshot> {
        let mut snapshots = self.subscribe();
        let loaded = match snapshots.wait_for(|snapshot| snapshot.cycle > 0).await {
            Ok(snapshot) => Arc::clone(&snapshot),
            Err(_) => self.snapshot(),
        };
        loaded
    }

    pub fn refresher(&self) -> &Arc<InventoryRefresher> {
        &self.refresher
    }

    pub fn executor(
        &self,
        privilege: Arc<dyn PrivilegeChecker>,
        confirmer: Arc<dyn Confirmer>,
        log: Arc<dyn CommandLog>,
    ) -> DeviceCommandExecutor {
        DeviceCommandExecutor::new(
            Arc::clone(&self.backend),
            privilege,
            confirmer,
            log,
            Arc::clone(&self.refresher),
            Arc::clone(&self.hardware),
            self.rules.clone(),
        )
    }

    /// Cancel pending timers, let the orchestrator finish its current
    /// cycle and join it. Safe to call more than once.
    pub fn shutdown(&self) {
        self.hardware.cancel();
        self.filter.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let Some(worker) = worker else {
            return;
        };
        let _ = self.requests.send(RefreshRequest::Shutdown);
        if worker.join().is_err() {
            warn!("orchestrator thread panicked");
        }
        info!("inventory service stopped");
    }
}

impl Drop for InventoryService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for InventoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryService")
            .field("refresher", &self.refresher)
            .field("hardware", &self.hardware)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

fn poster(
    requests: mpsc::UnboundedSender<RefreshRequest>,
    pull_fresh: bool,
) -> impl Fn() + Send + Sync + 'static {
    move || {
        if requests
            .send(RefreshRequest::Refresh { pull_fresh })
            .is_err()
        {
            debug!("orchestrator stopped; debounced refresh dropped");
        }
    }
}

fn run_orchestrator(
    refresher: Arc<InventoryRefresher>,
    mut inbox: mpsc::UnboundedReceiver<RefreshRequest>,
) {
    debug!("orchestrator running");
    while let Some(request) = inbox.blocking_recv() {
        let RefreshRequest::Refresh { mut pull_fresh } = request else {
            break;
        };
        // Collapse whatever queued up behind this request into one cycle.
        let mut stop = false;
        let mut coalesced = 0usize;
        while let Ok(next) = inbox.try_recv() {
            match next {
                RefreshRequest::Refresh { pull_fresh: pull } => {
                    pull_fresh |= pull;
                    coalesced += 1;
                }
                RefreshRequest::Shutdown => {
                    stop = true;
                    break;
                }
            }
        }
        if coalesced > 0 {
            debug!(coalesced, pull_fresh, "coalesced refresh requests");
        }
        refresher.refresh(pull_fresh);
        if stop {
            break;
        }
    }
    debug!("orchestrator exiting");
}
