use std::time::Duration;

use thiserror::Error;

use crate::domain::Serial;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid software version '{raw}': {reason}")]
pub struct VersionParseError {
    pub raw: String,
    pub reason: String,
}

impl VersionParseError {
    pub fn new(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

/// Failures reported by the management controller or a relayed device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("controller returned an error: {0}")]
    Api(String),
    #[error("malformed controller response: {0}")]
    Malformed(String),
    #[error("job {job_id} failed: {detail}")]
    JobFailed { job_id: u64, detail: String },
    #[error("job {job_id} did not finish within {timeout:?}")]
    JobTimeout { job_id: u64, timeout: Duration },
    #[error("version {version} is not available for download")]
    VersionUnavailable { version: String },
}

/// Conditions that end a convergence run.
#[derive(Debug, Error)]
pub enum ConvergenceError {
    #[error("cannot determine NSX device-group setting: {0}")]
    GroupUnresolved(ControllerError),
    #[error("cannot retrieve managed devices: {0}")]
    Inventory(ControllerError),
    #[error("no firewalls found in device group: {group}")]
    EmptyFleet { group: String },
    #[error(
        "an equal number of firewalls ({count}) run {first} and {second}; cannot determine which version to upgrade to"
    )]
    AmbiguousConsensus {
        first: String,
        second: String,
        count: usize,
    },
    #[error("target version is not a strict version: {0}")]
    InvalidTarget(VersionParseError),
    #[error("upgrade of {serial} failed, stopping: {source}")]
    UpgradeAborted {
        serial: Serial,
        #[source]
        source: ControllerError,
    },
}

impl ConvergenceError {
    pub fn exit_code(&self) -> u8 {
        1
    }
}
