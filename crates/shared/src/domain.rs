use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::VersionParseError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Serial(pub String);

impl Serial {
    pub fn new(serial: impl Into<String>) -> Self {
        Self(serial.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A managed firewall as reported by the controller inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub serial: Serial,
    pub ip_address: Option<String>,
    pub sw_version: String,
    pub device_group: Option<String>,
}

impl DeviceRecord {
    pub fn in_group(&self, group: &str) -> bool {
        self.device_group.as_deref() == Some(group)
    }

    pub fn address(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("-")
    }
}

/// Strict `major.minor.patch` firmware version.
///
/// Pre-release tags, build metadata and hotfix suffixes are rejected
/// rather than coerced, so `9.1.3-h4` and `9.1` both fail to parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SoftwareVersion(semver::Version);

impl SoftwareVersion {
    pub fn parse(raw: &str) -> Result<Self, VersionParseError> {
        let version = semver::Version::parse(raw.trim()).map_err(|err| {
            VersionParseError::new(raw, err.to_string())
        })?;
        if !version.pre.is_empty() {
            return Err(VersionParseError::new(raw, "pre-release tags are not allowed"));
        }
        if !version.build.is_empty() {
            return Err(VersionParseError::new(raw, "build metadata is not allowed"));
        }
        Ok(Self(version))
    }
}

impl FromStr for SoftwareVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialOrd for SoftwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SoftwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for SoftwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
