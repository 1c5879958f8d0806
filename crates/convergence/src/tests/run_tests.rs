use std::{collections::HashSet, sync::Arc};

use tokio::sync::Mutex;

use super::*;

struct FakeController {
    group: Result<String, ControllerError>,
    devices: Result<Vec<DeviceRecord>, ControllerError>,
    failing: HashSet<Serial>,
    upgrades: Arc<Mutex<Vec<(Serial, String)>>>,
}

impl FakeController {
    fn new(devices: Vec<DeviceRecord>) -> Self {
        Self {
            group: Ok("NSX".into()),
            devices: Ok(devices),
            failing: HashSet::new(),
            upgrades: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing_on(mut self, serial: &str) -> Self {
        self.failing.insert(Serial::new(serial));
        self
    }

    fn without_group(mut self) -> Self {
        self.group = Err(ControllerError::Malformed("missing result/device-group".into()));
        self
    }

    fn without_inventory(mut self) -> Self {
        self.devices = Err(ControllerError::Transport("connection reset".into()));
        self
    }

    async fn upgrade_calls(&self) -> Vec<(Serial, String)> {
        self.upgrades.lock().await.clone()
    }
}

#[async_trait]
impl Controller for FakeController {
    async fn nsx_device_group(&self) -> Result<String, ControllerError> {
        self.group.clone()
    }

    async fn managed_devices(&self) -> Result<BTreeMap<Serial, DeviceRecord>, ControllerError> {
        let devices = self.devices.clone()?;
        Ok(devices
            .into_iter()
            .map(|device| (device.serial.clone(), device))
            .collect())
    }

    async fn upgrade_device(
        &self,
        serial: &Serial,
        version: &SoftwareVersion,
    ) -> Result<(), ControllerError> {
        self.upgrades
            .lock()
            .await
            .push((serial.clone(), version.to_string()));
        if self.failing.contains(serial) {
            return Err(ControllerError::Api(format!("{serial} refused the upgrade")));
        }
        Ok(())
    }
}

fn device(serial: &str, version: &str) -> DeviceRecord {
    grouped(serial, version, Some("NSX"))
}

fn grouped(serial: &str, version: &str, group: Option<&str>) -> DeviceRecord {
    DeviceRecord {
        serial: Serial::new(serial),
        ip_address: Some(format!("192.0.2.{}", serial.len())),
        sw_version: version.into(),
        device_group: group.map(str::to_string),
    }
}

fn report(outcome: RunOutcome) -> RunReport {
    match outcome {
        RunOutcome::Dispatched(report) => report,
        other => panic!("expected a dispatch, got {other:?}"),
    }
}

#[tokio::test]
async fn converged_fleet_issues_no_upgrades() {
    let controller = FakeController::new(vec![device("A", "9.1.3"), device("B", "9.1.3")]);

    let outcome = run(&controller, &RunConfig::default()).await.expect("run");

    assert_eq!(
        outcome,
        RunOutcome::AlreadyConverged {
            version: "9.1.3".into(),
            devices: 2
        }
    );
    assert!(controller.upgrade_calls().await.is_empty());
}

#[tokio::test]
async fn newer_minority_is_not_downgraded() {
    let controller = FakeController::new(vec![
        device("A", "9.1.3"),
        device("B", "9.1.3"),
        device("C", "9.1.4"),
    ]);

    let report = report(run(&controller, &RunConfig::default()).await.expect("run"));

    assert_eq!(report.target.to_string(), "9.1.3");
    assert!(report.outcomes.is_empty());
    assert_eq!(report.unchanged.len(), 3);
    assert!(controller.upgrade_calls().await.is_empty());
}

#[tokio::test]
async fn older_minority_is_upgraded_to_computed_target() {
    let controller = FakeController::new(vec![
        device("A", "9.1.3"),
        device("B", "9.1.4"),
        device("C", "9.1.4"),
    ]);

    let report = report(run(&controller, &RunConfig::default()).await.expect("run"));

    assert_eq!(
        controller.upgrade_calls().await,
        vec![(Serial::new("A"), "9.1.4".to_string())]
    );
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].result, UpgradeResult::Upgraded);
    assert_eq!(report.outcomes[0].from.to_string(), "9.1.3");
}

#[tokio::test]
async fn devices_outside_the_group_are_ignored() {
    let controller = FakeController::new(vec![
        device("A", "9.1.3"),
        device("B", "9.1.4"),
        device("C", "9.1.4"),
        grouped("D", "8.0.0", Some("branch")),
        grouped("E", "8.0.0", None),
    ]);

    run(&controller, &RunConfig::default()).await.expect("run");

    let upgraded: Vec<Serial> = controller
        .upgrade_calls()
        .await
        .into_iter()
        .map(|(serial, _)| serial)
        .collect();
    assert_eq!(upgraded, vec![Serial::new("A")]);
}

#[tokio::test]
async fn empty_group_fails() {
    let controller = FakeController::new(vec![grouped("A", "9.1.3", Some("branch"))]);

    let err = run(&controller, &RunConfig::default())
        .await
        .expect_err("should fail");

    assert!(matches!(err, ConvergenceError::EmptyFleet { .. }));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn unresolved_group_fails_before_inventory() {
    let controller = FakeController::new(vec![device("A", "9.1.3")]).without_group();

    let err = run(&controller, &RunConfig::default())
        .await
        .expect_err("should fail");

    assert!(matches!(err, ConvergenceError::GroupUnresolved(_)));
}

#[tokio::test]
async fn inventory_failure_stops_before_dispatch() {
    let controller =
        FakeController::new(vec![device("A", "9.1.3"), device("B", "9.1.4"), device("C", "9.1.4")])
            .without_inventory();

    let err = run(&controller, &RunConfig::default())
        .await
        .expect_err("should fail");

    assert!(matches!(err, ConvergenceError::Inventory(ControllerError::Transport(_))));
    assert_eq!(err.exit_code(), 1);
    assert!(controller.upgrade_calls().await.is_empty());
}

#[tokio::test]
async fn even_split_dispatches_nothing() {
    let controller = FakeController::new(vec![device("A", "9.1.3"), device("B", "9.1.4")]);

    let err = run(&controller, &RunConfig::default())
        .await
        .expect_err("should fail");

    assert!(matches!(err, ConvergenceError::AmbiguousConsensus { .. }));
    assert!(controller.upgrade_calls().await.is_empty());
}

#[tokio::test]
async fn stop_on_error_leaves_remaining_devices_untouched() {
    let controller = FakeController::new(vec![
        device("A", "9.1.2"),
        device("B", "9.1.3"),
        device("C", "9.1.1"),
        device("D", "9.1.4"),
        device("E", "9.1.4"),
        device("F", "9.1.4"),
        device("G", "9.1.4"),
    ])
    .failing_on("B");

    let err = run(&controller, &RunConfig::default())
        .await
        .expect_err("should abort");

    match err {
        ConvergenceError::UpgradeAborted { serial, .. } => assert_eq!(serial, Serial::new("B")),
        other => panic!("unexpected error: {other}"),
    }
    let attempted: Vec<Serial> = controller
        .upgrade_calls()
        .await
        .into_iter()
        .map(|(serial, _)| serial)
        .collect();
    assert_eq!(attempted, vec![Serial::new("A"), Serial::new("B")]);
}

#[tokio::test]
async fn continue_on_error_attempts_every_device() {
    let controller = FakeController::new(vec![
        device("A", "9.1.2"),
        device("B", "9.1.3"),
        device("C", "9.1.1"),
        device("D", "9.1.4"),
        device("E", "9.1.4"),
        device("F", "9.1.4"),
        device("G", "9.1.4"),
    ])
    .failing_on("A");
    let config = RunConfig {
        stop_on_error: false,
        dry_run: false,
    };

    let report = report(run(&controller, &config).await.expect("run"));

    assert_eq!(controller.upgrade_calls().await.len(), 3);
    let failed: Vec<&Serial> = report.failures().map(|outcome| &outcome.serial).collect();
    assert_eq!(failed, vec![&Serial::new("A")]);
    assert_eq!(report.outcomes[1].result, UpgradeResult::Upgraded);
    assert_eq!(report.outcomes[2].result, UpgradeResult::Upgraded);
}

#[tokio::test]
async fn dry_run_issues_no_device_commands() {
    let controller = FakeController::new(vec![
        device("A", "9.1.3"),
        device("B", "9.1.4"),
        device("C", "9.1.4"),
    ]);
    let config = RunConfig {
        stop_on_error: true,
        dry_run: true,
    };

    let report = report(run(&controller, &config).await.expect("run"));

    assert!(controller.upgrade_calls().await.is_empty());
    assert_eq!(report.outcomes[0].result, UpgradeResult::DryRun);
}

#[tokio::test]
async fn unparsable_device_does_not_block_others() {
    let controller = FakeController::new(vec![
        device("A", "9.1.3-h4"),
        device("B", "9.1.2"),
        device("C", "9.1.4"),
        device("D", "9.1.4"),
    ]);

    let report = report(run(&controller, &RunConfig::default()).await.expect("run"));

    assert_eq!(report.unparsable.len(), 1);
    assert_eq!(
        controller.upgrade_calls().await,
        vec![(Serial::new("B"), "9.1.4".to_string())]
    );
}
