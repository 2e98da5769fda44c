//! Crate error types.

use thiserror::Error;

use crate::batch::BatchError;

#[derive(Debug, Error)]
pub enum Error {
    /// Programmer error in a core computation (zero hosts, empty search space).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The batch service failed to answer a start-time-estimate query.
    #[error("wait-time oracle unavailable: {0}")]
    OracleUnavailable(#[source] BatchError),

    /// The batch service predicted a negative start time for a probe.
    #[error("wait-time oracle returned an unschedulable estimate {0} for probe {1}")]
    OracleInvalid(f64, String),

    /// A pilot start event arrived while no placeholder job was pending.
    #[error("no pending placeholder job for started pilot {0}")]
    MissingPlaceholder(u64),

    /// A standard job completed for a task no running placeholder owns.
    #[error("task {0} completed outside any placeholder while not in individual mode")]
    OrphanCompletion(String),

    /// A workflow specification string could not be parsed.
    #[error("malformed workflow specification: {0}")]
    MalformedSpec(String),

    /// A configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
