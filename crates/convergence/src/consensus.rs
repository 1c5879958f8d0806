use std::collections::HashMap;

use shared::{domain::DeviceRecord, error::ConvergenceError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consensus {
    /// Every device in the group already runs this version.
    Converged { version: String, devices: usize },
    Target {
        version: String,
        count: usize,
        total: usize,
    },
}

/// Version strings with their device counts, most common first.
///
/// Equal counts are ordered by version string so the result does not depend
/// on inventory order.
pub fn tally(devices: &[DeviceRecord]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for device in devices {
        *counts.entry(device.sw_version.trim()).or_default() += 1;
    }

    let mut tallied: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(version, count)| (version.to_string(), count))
        .collect();
    tallied.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    tallied
}

pub fn compute_consensus(
    group: &str,
    devices: &[DeviceRecord],
) -> Result<Consensus, ConvergenceError> {
    let tallied = tally(devices);

    match tallied.as_slice() {
        [] => Err(ConvergenceError::EmptyFleet {
            group: group.to_string(),
        }),
        [(version, count)] => Ok(Consensus::Converged {
            version: version.clone(),
            devices: *count,
        }),
        [(first, first_count), (second, second_count), ..] if first_count == second_count => {
            Err(ConvergenceError::AmbiguousConsensus {
                first: first.clone(),
                second: second.clone(),
                count: *first_count,
            })
        }
        [(version, count), ..] => Ok(Consensus::Target {
            version: version.clone(),
            count: *count,
            total: devices.len(),
        }),
    }
}
