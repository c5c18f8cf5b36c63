use thiserror::Error;

/// Failures surfaced by device commands.
///
/// Topology problems are not errors; they are reported as
/// [`crate::TopologyIssue`] values on the forest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The process is not elevated. Nothing was changed.
    #[error("{0}")]
    PrivilegeDenied(String),

    /// A single backend mutation failed.
    #[error("device {device_id}: {message}")]
    BackendOperationFailed { device_id: String, message: String },

    /// The device disappeared between selection and execution.
    #[error("device not found: {0}")]
    RecordNotFound(String),

    #[error("device is not removable: {0}")]
    NotRemovable(String),
}

impl CommandError {
    pub(crate) fn backend(device_id: &str, err: &anyhow::Error) -> Self {
        Self::BackendOperationFailed {
            device_id: device_id.to_string(),
            message: format!("{err:#}"),
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;
