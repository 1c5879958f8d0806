use std::collections::BTreeMap;

use async_trait::async_trait;
use shared::{
    domain::{DeviceRecord, Serial, SoftwareVersion},
    error::{ControllerError, ConvergenceError, VersionParseError},
};
use tracing::{debug, info, warn};

pub mod consensus;
pub mod upgrade;

pub use consensus::{compute_consensus, tally, Consensus};
pub use upgrade::{dispatch_upgrades, plan_upgrades, DeviceOutcome, UpgradePlan, UpgradeResult};

/// The management controller as seen by a convergence run.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Name of the device-group bound to the NSX service manager.
    async fn nsx_device_group(&self) -> Result<String, ControllerError>;

    async fn managed_devices(&self) -> Result<BTreeMap<Serial, DeviceRecord>, ControllerError>;

    /// Upgrades one firewall to `version` through the controller and reboots it.
    async fn upgrade_device(
        &self,
        serial: &Serial,
        version: &SoftwareVersion,
    ) -> Result<(), ControllerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub stop_on_error: bool,
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stop_on_error: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    AlreadyConverged { version: String, devices: usize },
    Dispatched(RunReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub group: String,
    pub target: SoftwareVersion,
    pub outcomes: Vec<DeviceOutcome>,
    pub unchanged: Vec<Serial>,
    pub unparsable: Vec<(Serial, VersionParseError)>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_failure())
    }
}

/// Devices in `group`, in serial order.
pub fn filter_group(inventory: &BTreeMap<Serial, DeviceRecord>, group: &str) -> Vec<DeviceRecord> {
    inventory
        .values()
        .filter(|device| device.in_group(group))
        .cloned()
        .collect()
}

pub async fn run<C: Controller + ?Sized>(
    controller: &C,
    config: &RunConfig,
) -> Result<RunOutcome, ConvergenceError> {
    let group = controller
        .nsx_device_group()
        .await
        .map_err(ConvergenceError::GroupUnresolved)?;
    info!(%group, "NSX device-group found");

    let inventory = controller
        .managed_devices()
        .await
        .map_err(ConvergenceError::Inventory)?;
    debug!(devices = ?inventory, "managed devices");

    let devices = filter_group(&inventory, &group);
    debug!(%group, count = devices.len(), "devices in NSX device-group");
    for device in &devices {
        debug!(
            serial = %device.serial,
            ip_address = device.address(),
            version = %device.sw_version,
            "device"
        );
    }

    let target = match compute_consensus(&group, &devices)? {
        Consensus::Converged { version, devices } => {
            info!(%version, devices, "all firewalls are running the same version, no upgrade needed");
            return Ok(RunOutcome::AlreadyConverged { version, devices });
        }
        Consensus::Target {
            version,
            count,
            total,
        } => {
            info!(%version, count, total, "determined target version");
            version
        }
    };

    let plan = plan_upgrades(&devices, &target)?;
    if plan.upgrades.is_empty() {
        info!(target = %plan.target, "no firewalls below target version");
    }

    let outcomes = dispatch_upgrades(controller, &plan, config).await?;
    let report = RunReport {
        group,
        target: plan.target,
        outcomes,
        unchanged: plan.unchanged,
        unparsable: plan.unparsable,
    };

    let failed = report.failures().count();
    if failed > 0 {
        warn!(failed, "some firewalls could not be upgraded");
    }

    Ok(RunOutcome::Dispatched(report))
}

#[cfg(test)]
#[path = "tests/run_tests.rs"]
mod tests;
