//! Live device inventory: filtering, topology reconstruction, debounced
//! refresh scheduling and privilege-gated device commands.

pub mod cleanup;
pub mod commands;
pub mod config;
pub mod debounce;
pub mod error;
pub mod filter;
pub mod refresher;
pub mod service;
pub mod snapshot;
pub mod topology;

pub use cleanup::{CleanupOutcome, CleanupPlan, CleanupReport, CleanupRules};
pub use commands::{
    BatchFailure, BatchReport, CommandAvailability, CommandLog, CommandState,
    DeviceCommandExecutor, MemoryLog, TracingLog,
};
pub use config::InventoryConfig;
pub use debounce::Debouncer;
pub use error::{CommandError, CommandResult};
pub use filter::DeviceFilter;
pub use refresher::InventoryRefresher;
pub use service::InventoryService;
pub use snapshot::InventorySnapshot;
pub use topology::{build_forest, DeviceForest, ForestNode, TopologyIssue};
