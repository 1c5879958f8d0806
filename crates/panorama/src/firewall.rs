use std::time::Instant;

use shared::{
    domain::{Serial, SoftwareVersion},
    error::ControllerError,
};
use tracing::{debug, info};

use crate::{
    xml::{self, AvailableVersion, JobStatus},
    PanoramaClient,
};

const SOFTWARE_CHECK: &str = "<request><system><software><check></check></software></system></request>";
const RESTART_SYSTEM: &str = "<request><restart><system></system></restart></request>";

/// A managed firewall addressed through the controller with the session key.
///
/// Commands go to the device itself rather than to the controller's batch
/// upgrade, so each device fails or succeeds on its own.
pub struct Firewall<'a> {
    client: &'a PanoramaClient,
    serial: Serial,
}

impl<'a> Firewall<'a> {
    pub(crate) fn new(client: &'a PanoramaClient, serial: Serial) -> Self {
        Self { client, serial }
    }

    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    async fn op(&self, cmd: &str) -> Result<String, ControllerError> {
        self.client.op(cmd, Some(&self.serial)).await
    }

    /// Refreshes and returns the versions the device can install.
    pub async fn check_software(&self) -> Result<Vec<AvailableVersion>, ControllerError> {
        let body = self.op(SOFTWARE_CHECK).await?;
        xml::software_versions(&body)
    }

    pub async fn download(&self, version: &SoftwareVersion) -> Result<u64, ControllerError> {
        let cmd = format!(
            "<request><system><software><download><version>{version}</version></download></software></system></request>"
        );
        let body = self.op(&cmd).await?;
        xml::job_id(&body)
    }

    pub async fn install(&self, version: &SoftwareVersion) -> Result<u64, ControllerError> {
        let cmd = format!(
            "<request><system><software><install><version>{version}</version></install></software></system></request>"
        );
        let body = self.op(&cmd).await?;
        xml::job_id(&body)
    }

    pub async fn restart(&self) -> Result<(), ControllerError> {
        self.op(RESTART_SYSTEM).await?;
        Ok(())
    }

    pub async fn job(&self, job_id: u64) -> Result<JobStatus, ControllerError> {
        let body = self
            .op(&format!("<show><jobs><id>{job_id}</id></jobs></show>"))
            .await?;
        xml::job_status(&body)
    }

    /// Polls a job until it finishes, failing if it does not report `OK`.
    pub async fn wait_for_job(&self, job_id: u64) -> Result<JobStatus, ControllerError> {
        let started = Instant::now();
        loop {
            let job = self.job(job_id).await?;
            if job.is_finished() {
                if job.succeeded() {
                    return Ok(job);
                }
                return Err(ControllerError::JobFailed {
                    job_id,
                    detail: if job.details.is_empty() {
                        job.result
                    } else {
                        job.details
                    },
                });
            }

            if started.elapsed() >= self.client.job_timeout() {
                return Err(ControllerError::JobTimeout {
                    job_id,
                    timeout: self.client.job_timeout(),
                });
            }
            debug!(serial = %self.serial, job_id, status = %job.status, "waiting for job");
            tokio::time::sleep(self.client.job_poll_interval()).await;
        }
    }

    /// Downloads and installs `version`, then reboots the device.
    ///
    /// A device already running `version` is left alone. The download is
    /// skipped when the image is already on the device.
    pub async fn upgrade_to_version(&self, version: &SoftwareVersion) -> Result<(), ControllerError> {
        let wanted = version.to_string();
        let available = self.check_software().await?;
        let Some(entry) = available.iter().find(|entry| entry.version == wanted) else {
            return Err(ControllerError::VersionUnavailable { version: wanted });
        };

        if entry.current {
            info!(serial = %self.serial, %version, "firewall already runs target version");
            return Ok(());
        }

        if entry.downloaded {
            debug!(serial = %self.serial, %version, "image already downloaded");
        } else {
            info!(serial = %self.serial, %version, "downloading software");
            let job_id = self.download(version).await?;
            self.wait_for_job(job_id).await?;
        }

        info!(serial = %self.serial, %version, "installing software");
        let job_id = self.install(version).await?;
        self.wait_for_job(job_id).await?;

        info!(serial = %self.serial, %version, "rebooting firewall");
        self.restart().await
    }
}
