use shared::{
    domain::{DeviceRecord, Serial, SoftwareVersion},
    error::{ControllerError, ConvergenceError, VersionParseError},
};
use tracing::{info, warn};

use crate::{Controller, RunConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpgrade {
    pub serial: Serial,
    pub ip_address: Option<String>,
    pub current: SoftwareVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePlan {
    pub target: SoftwareVersion,
    pub upgrades: Vec<PlannedUpgrade>,
    /// Devices at or above the target. They are never downgraded.
    pub unchanged: Vec<Serial>,
    pub unparsable: Vec<(Serial, VersionParseError)>,
}

/// Selects the devices strictly below `target`.
///
/// A device whose reported version is not strict is skipped with a warning;
/// only an unparsable target fails the plan.
pub fn plan_upgrades(
    devices: &[DeviceRecord],
    target: &str,
) -> Result<UpgradePlan, ConvergenceError> {
    let target = SoftwareVersion::parse(target).map_err(ConvergenceError::InvalidTarget)?;

    let mut upgrades = Vec::new();
    let mut unchanged = Vec::new();
    let mut unparsable = Vec::new();

    for device in devices {
        match SoftwareVersion::parse(&device.sw_version) {
            Ok(current) if current < target => upgrades.push(PlannedUpgrade {
                serial: device.serial.clone(),
                ip_address: device.ip_address.clone(),
                current,
            }),
            Ok(_) => unchanged.push(device.serial.clone()),
            Err(err) => {
                warn!(serial = %device.serial, %err, "skipping device with unparsable version");
                unparsable.push((device.serial.clone(), err));
            }
        }
    }

    Ok(UpgradePlan {
        target,
        upgrades,
        unchanged,
        unparsable,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeResult {
    Upgraded,
    DryRun,
    Failed(ControllerError),
}

impl UpgradeResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOutcome {
    pub serial: Serial,
    pub from: SoftwareVersion,
    pub result: UpgradeResult,
}

/// Upgrades each planned device in order, one at a time.
///
/// With `stop_on_error` the first failure ends the dispatch and the remaining
/// devices are left untouched. Otherwise failures are recorded and the loop
/// moves on. Nothing is retried.
pub async fn dispatch_upgrades<C: Controller + ?Sized>(
    controller: &C,
    plan: &UpgradePlan,
    config: &RunConfig,
) -> Result<Vec<DeviceOutcome>, ConvergenceError> {
    let mut outcomes = Vec::with_capacity(plan.upgrades.len());

    for device in &plan.upgrades {
        let result = if config.dry_run {
            info!(
                serial = %device.serial,
                from = %device.current,
                to = %plan.target,
                "dry run: would upgrade firewall"
            );
            UpgradeResult::DryRun
        } else {
            info!(
                serial = %device.serial,
                ip_address = device.ip_address.as_deref().unwrap_or("-"),
                from = %device.current,
                to = %plan.target,
                "upgrading firewall"
            );
            match controller.upgrade_device(&device.serial, &plan.target).await {
                Ok(()) => UpgradeResult::Upgraded,
                Err(err) => UpgradeResult::Failed(err),
            }
        };

        if let UpgradeResult::Failed(err) = &result {
            if config.stop_on_error {
                return Err(ConvergenceError::UpgradeAborted {
                    serial: device.serial.clone(),
                    source: err.clone(),
                });
            }
            warn!(serial = %device.serial, %err, "upgrade failed, continuing with next firewall");
        }

        outcomes.push(DeviceOutcome {
            serial: device.serial.clone(),
            from: device.current.clone(),
            result,
        });
    }

    Ok(outcomes)
}
