use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use convergence::Controller;
use reqwest::Client;
use shared::{
    domain::{DeviceRecord, Serial, SoftwareVersion},
    error::ControllerError,
};
use tracing::{debug, info};
use url::Url;

mod firewall;
pub mod xml;

pub use firewall::Firewall;

/// Configuration path holding the device-group bound to the NSX service manager.
pub const NSX_DEVICE_GROUP_XPATH: &str =
    "/config/devices/entry[@name='localhost.localdomain']/vmware-service-manager/device-group";

const SHOW_ALL_DEVICES: &str = "<show><devices><all></all></devices></show>";
const SHOW_DEVICE_GROUPS: &str = "<show><devicegroups></devicegroups></show>";

#[derive(Debug, Clone)]
pub struct PanoramaConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Skips key generation when set.
    pub api_key: Option<String>,
    pub accept_invalid_certs: bool,
    pub request_timeout: Duration,
    pub job_poll_interval: Duration,
    pub job_timeout: Duration,
}

impl Default for PanoramaConfig {
    fn default() -> Self {
        Self {
            hostname: "10.0.0.1".into(),
            port: 443,
            username: "admin".into(),
            password: "admin".into(),
            api_key: None,
            accept_invalid_certs: false,
            request_timeout: Duration::from_secs(60),
            job_poll_interval: Duration::from_secs(10),
            job_timeout: Duration::from_secs(3600),
        }
    }
}

impl PanoramaConfig {
    pub fn endpoint(&self) -> Result<Url, ControllerError> {
        Url::parse(&format!("https://{}:{}/api/", self.hostname, self.port)).map_err(|err| {
            ControllerError::Transport(format!("invalid controller address '{}': {err}", self.hostname))
        })
    }
}

/// An authenticated session against the Panorama XML API.
pub struct PanoramaClient {
    http: Client,
    endpoint: Url,
    api_key: String,
    job_poll_interval: Duration,
    job_timeout: Duration,
}

impl PanoramaClient {
    pub async fn connect(config: &PanoramaConfig) -> Result<Self, ControllerError> {
        let endpoint = config.endpoint()?;
        Self::connect_to(endpoint, config).await
    }

    /// Like [`PanoramaClient::connect`] but against an explicit API endpoint.
    pub async fn connect_to(endpoint: Url, config: &PanoramaConfig) -> Result<Self, ControllerError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(transport)?;

        let mut client = Self {
            http,
            endpoint,
            api_key: String::new(),
            job_poll_interval: config.job_poll_interval,
            job_timeout: config.job_timeout,
        };

        let api_key = match &config.api_key {
            Some(key) => key.clone(),
            None => {
                info!(hostname = %config.hostname, "logging in to Panorama");
                let body = client
                    .send(&[
                        ("type", "keygen"),
                        ("user", config.username.as_str()),
                        ("password", config.password.as_str()),
                    ])
                    .await?;
                xml::api_key(&body)?
            }
        };
        client.api_key = api_key;

        Ok(client)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// A command channel to one managed firewall, relayed through this controller.
    pub fn firewall(&self, serial: Serial) -> Firewall<'_> {
        Firewall::new(self, serial)
    }

    pub(crate) fn job_poll_interval(&self) -> Duration {
        self.job_poll_interval
    }

    pub(crate) fn job_timeout(&self) -> Duration {
        self.job_timeout
    }

    async fn send(&self, params: &[(&str, &str)]) -> Result<String, ControllerError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .form(params)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            let message = xml::error_text(&body).unwrap_or_else(|| format!("HTTP {status}"));
            return Err(ControllerError::Api(message));
        }
        Ok(body)
    }

    pub async fn show_config(&self, xpath: &str) -> Result<String, ControllerError> {
        self.send(&[
            ("type", "config"),
            ("action", "show"),
            ("key", self.api_key.as_str()),
            ("xpath", xpath),
        ])
        .await
    }

    /// Runs an operational command on the controller, or on `target` when given.
    pub async fn op(&self, cmd: &str, target: Option<&Serial>) -> Result<String, ControllerError> {
        let mut params = vec![("type", "op"), ("key", self.api_key.as_str()), ("cmd", cmd)];
        if let Some(serial) = target {
            params.push(("target", serial.as_str()));
        }
        debug!(cmd, target = target.map(Serial::as_str), "op command");
        self.send(&params).await
    }
}

fn transport(err: reqwest::Error) -> ControllerError {
    ControllerError::Transport(err.to_string())
}

#[async_trait]
impl Controller for PanoramaClient {
    async fn nsx_device_group(&self) -> Result<String, ControllerError> {
        let body = self.show_config(NSX_DEVICE_GROUP_XPATH).await?;
        xml::device_group(&body)
    }

    async fn managed_devices(&self) -> Result<BTreeMap<Serial, DeviceRecord>, ControllerError> {
        let body = self.op(SHOW_ALL_DEVICES, None).await?;
        let mut inventory: BTreeMap<Serial, DeviceRecord> = xml::devices(&body)?
            .into_iter()
            .map(|device| (device.serial.clone(), device))
            .collect();

        let body = self.op(SHOW_DEVICE_GROUPS, None).await?;
        for member in xml::device_group_members(&body)? {
            match inventory.get_mut(&member.serial) {
                Some(device) => device.device_group = member.device_group,
                None => {
                    inventory.insert(member.serial.clone(), member);
                }
            }
        }

        Ok(inventory)
    }

    async fn upgrade_device(
        &self,
        serial: &Serial,
        version: &SoftwareVersion,
    ) -> Result<(), ControllerError> {
        self.firewall(serial.clone()).upgrade_to_version(version).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
