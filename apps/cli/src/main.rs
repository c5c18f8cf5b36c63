use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hwscope_core::mock::MockBackend;
use hwscope_core::{DeviceBackend, DeviceRecord};
use hwscope_host_linux::{
    host_name, read_host_info, EffectiveUidChecker, HotplugWatcher, SysfsBackend,
    DEFAULT_DEVNODE_DIR,
};
use hwscope_inventory::{
    CommandLog, CommandState, DeviceCommandExecutor, InventoryConfig, InventoryService,
    InventorySnapshot,
};
use hwscope_safety::{Confirmer, FixedAnswer, PrivilegeChecker, StaticPrivilege};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

mod render;

#[derive(Parser)]
#[command(name = "hwscope", version, about = "Live hardware device inventory")]
struct Cli {
    /// JSON file with inventory settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use device records from a JSON file instead of sysfs.
    #[arg(long, global = true, value_name = "FILE")]
    simulate: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the filtered flat device list.
    List {
        #[arg(short, long, default_value = "")]
        filter: String,
        #[arg(long)]
        json: bool,
    },
    /// Print the filtered device tree with ancestors kept for context.
    Tree {
        #[arg(short, long, default_value = "")]
        filter: String,
        #[arg(long)]
        json: bool,
    },
    /// Print one device with its hardware ids and available commands.
    Show { device_id: String },
    /// Follow hot-plug events; each stdin line replaces the filter.
    Watch {
        #[arg(short, long, default_value = "")]
        filter: String,
    },
    Enable { device_id: String },
    Disable { device_id: String },
    /// Remove one or more removable devices.
    Remove {
        #[arg(required = true)]
        device_ids: Vec<String>,
    },
    /// Ask the kernel to rescan for hardware.
    Scan,
    /// Remove offline, problem and unknown devices.
    Clean {
        /// Only report what would be removed.
        #[arg(long)]
        dry_run: bool,
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
    /// Print host details as JSON.
    HostInfo,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => InventoryConfig::load(path)?,
        None => InventoryConfig::default(),
    }
    .with_env_overrides();

    if let Command::HostInfo = cli.command {
        println!("{}", serde_json::to_string_pretty(&read_host_info())?);
        return Ok(());
    }

    let backend = open_backend(cli.simulate.as_ref())?;
    let privilege: Arc<dyn PrivilegeChecker> = if cli.simulate.is_some() {
        Arc::new(StaticPrivilege(true))
    } else {
        Arc::new(EffectiveUidChecker)
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("hwscope-timer")
        .build()
        .context("build tokio runtime")?;
    let service = Arc::new(InventoryService::start(
        backend,
        &config,
        &host_name(),
        runtime.handle().clone(),
    )?);

    let confirmer: Arc<dyn Confirmer> = match cli.command {
        Command::Clean { yes: true, .. } => Arc::new(FixedAnswer(true)),
        _ => Arc::new(StdinConfirmer),
    };
    let executor = service.executor(privilege, confirmer, Arc::new(ConsoleLog));

    let result = run(cli.command, &service, &executor, &runtime);
    service.shutdown();
    result
}

fn run(
    command: Command,
    service: &Arc<InventoryService>,
    executor: &DeviceCommandExecutor,
    runtime: &tokio::runtime::Runtime,
) -> Result<()> {
    match command {
        Command::List { filter, json } => {
            let snapshot = filtered(service, runtime, &filter);
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot.records)?);
            } else {
                print!("{}", render::list(&snapshot));
            }
        }
        Command::Tree { filter, json } => {
            let snapshot = filtered(service, runtime, &filter);
            if json {
                println!("{}", serde_json::to_string_pretty(&*snapshot)?);
            } else {
                print!("{}", render::tree(&snapshot));
            }
        }
        Command::Show { device_id } => {
            let snapshot = runtime.block_on(service.loaded());
            let record = snapshot
                .records
                .iter()
                .find(|r| r.device_id == device_id && !r.is_interface)
                .or_else(|| snapshot.records.iter().find(|r| r.device_id == device_id))
                .with_context(|| format!("device not found: {device_id}"))?;
            let availability = executor.availability(Some(record), true);
            print!("{}", render::details(record, availability));
        }
        Command::Watch { filter } => runtime.block_on(watch(Arc::clone(service), filter))?,
        Command::Enable { device_id } => executor.set_enabled(&device_id, true)?,
        Command::Disable { device_id } => executor.set_enabled(&device_id, false)?,
        Command::Remove { device_ids } => {
            if let [device_id] = device_ids.as_slice() {
                executor.remove(device_id)?;
            } else {
                let report = executor.remove_many(&device_ids)?;
                for failure in &report.failed {
                    eprintln!("{}: {}", failure.device_id, failure.message);
                }
                if !report.failed.is_empty() {
                    anyhow::bail!("{} of {} removals failed", report.failed.len(), device_ids.len());
                }
            }
        }
        Command::Scan => executor.scan_for_changes()?,
        Command::Clean { dry_run, .. } => {
            let handle = executor.spawn_cleanup(!dry_run)?;
            let report = handle
                .join()
                .map_err(|_| anyhow::anyhow!("cleanup thread panicked"))??;
            info!(outcome = ?report.outcome, removed = report.removed.len(), "cleanup finished");
            if !report.failures.is_empty() {
                anyhow::bail!("{} devices could not be removed", report.failures.len());
            }
        }
        Command::HostInfo => {}
    }
    Ok(())
}

/// Reuse the startup pull and only re-filter it.
fn filtered(
    service: &InventoryService,
    runtime: &tokio::runtime::Runtime,
    filter: &str,
) -> Arc<InventorySnapshot> {
    let loaded = runtime.block_on(service.loaded());
    if filter.trim().is_empty() {
        return loaded;
    }
    let refresher = service.refresher();
    refresher.set_query(filter);
    refresher.refresh(false)
}

async fn watch(service: Arc<InventoryService>, filter: String) -> Result<()> {
    let _watcher = {
        let service = Arc::clone(&service);
        match HotplugWatcher::new(DEFAULT_DEVNODE_DIR, move |change| {
            service.on_device_change(&change)
        }) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "hot-plug events unavailable");
                None
            }
        }
    };

    if !filter.is_empty() {
        service.set_filter(&filter);
    }
    let mut snapshots = service.subscribe();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let current = snapshots.borrow_and_update().clone();
    if current.cycle > 0 {
        print!("{}", render::tree(&current));
    }

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print!("{}", render::tree(&snapshot));
            }
            line = lines.next_line(), if stdin_open => match line.context("read stdin")? {
                Some(text) => service.set_filter(&text),
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn open_backend(simulate: Option<&PathBuf>) -> Result<Arc<dyn DeviceBackend>> {
    let Some(path) = simulate else {
        return Ok(Arc::new(SysfsBackend::new()));
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    let records: Vec<DeviceRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("parse {}", path.display()))?;
    let (interfaces, devices): (Vec<_>, Vec<_>) =
        records.into_iter().partition(|record| record.is_interface);
    info!(devices = devices.len(), interfaces = interfaces.len(), "using simulated backend");
    Ok(Arc::new(MockBackend::new(devices).with_interfaces(interfaces)))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Command progress goes to stdout, refusals to stderr.
struct ConsoleLog;

impl CommandLog for ConsoleLog {
    fn record(&self, state: CommandState, line: &str) {
        match state {
            CommandState::Rejected => eprintln!("{line}"),
            _ => println!("{line}"),
        }
    }
}

struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, message: &str, title: &str) -> bool {
        eprintln!("{title}");
        eprintln!("{message}");
        eprint!("[y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}
