//! Decoding of XML API responses.

use roxmltree::{Document, Node};
use shared::{
    domain::{DeviceRecord, Serial},
    error::ControllerError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableVersion {
    pub version: String,
    pub downloaded: bool,
    pub current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub id: u64,
    pub status: String,
    pub result: String,
    pub details: String,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        self.status == "FIN"
    }

    pub fn succeeded(&self) -> bool {
        self.result == "OK"
    }
}

/// Parses a `<response>` document and rejects anything but `status="success"`.
fn parse(body: &str) -> Result<Document<'_>, ControllerError> {
    let doc = Document::parse(body).map_err(|err| ControllerError::Malformed(err.to_string()))?;
    let root = doc.root_element();
    if !root.has_tag_name("response") {
        return Err(ControllerError::Malformed(format!(
            "unexpected root element <{}>",
            root.tag_name().name()
        )));
    }
    if root.attribute("status") == Some("success") {
        return Ok(doc);
    }
    if root.attribute("status").is_none() {
        return Err(ControllerError::Malformed("response without status".into()));
    }
    Err(ControllerError::Api(
        error_message(root).unwrap_or_else(|| "request failed".to_string()),
    ))
}

/// The error text carried by a failed response body, if it is one.
pub fn error_text(body: &str) -> Option<String> {
    let doc = Document::parse(body).ok()?;
    let root = doc.root_element();
    if root.attribute("status") == Some("success") {
        return None;
    }
    error_message(root)
}

fn error_message(root: Node<'_, '_>) -> Option<String> {
    let msg = root.descendants().find(|node| node.has_tag_name("msg"))?;
    let lines: Vec<&str> = msg
        .descendants()
        .filter(|node| node.is_text())
        .filter_map(|node| node.text())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join(" "))
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|child| child.has_tag_name(name))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn result<'a, 'input>(doc: &'a Document<'input>) -> Result<Node<'a, 'input>, ControllerError> {
    child(doc.root_element(), "result")
        .ok_or_else(|| ControllerError::Malformed("response without result".into()))
}

fn path<'a, 'input>(
    mut node: Node<'a, 'input>,
    names: &[&str],
) -> Result<Node<'a, 'input>, ControllerError> {
    for name in names {
        node = child(node, name)
            .ok_or_else(|| ControllerError::Malformed(format!("missing element <{name}>")))?;
    }
    Ok(node)
}

pub fn api_key(body: &str) -> Result<String, ControllerError> {
    let doc = parse(body)?;
    let key = child_text(result(&doc)?, "key")
        .map(str::to_string)
        .ok_or_else(|| ControllerError::Malformed("keygen response without key".into()))?;
    Ok(key)
}

pub fn device_group(body: &str) -> Result<String, ControllerError> {
    let doc = parse(body)?;
    let group = child_text(result(&doc)?, "device-group")
        .map(str::to_string)
        .ok_or_else(|| ControllerError::Malformed("missing result/device-group".into()))?;
    Ok(group)
}

fn device_entry(entry: Node<'_, '_>, device_group: Option<&str>) -> Option<DeviceRecord> {
    let serial = child_text(entry, "serial").or_else(|| entry.attribute("name"))?;
    Some(DeviceRecord {
        serial: Serial::new(serial),
        ip_address: child_text(entry, "ip-address").map(str::to_string),
        sw_version: child_text(entry, "sw-version").unwrap_or_default().to_string(),
        device_group: device_group.map(str::to_string),
    })
}

/// Devices from `show devices all`, without group membership.
pub fn devices(body: &str) -> Result<Vec<DeviceRecord>, ControllerError> {
    let doc = parse(body)?;
    let devices = path(result(&doc)?, &["devices"])?;
    let records = devices
        .children()
        .filter(|node| node.has_tag_name("entry"))
        .filter_map(|entry| device_entry(entry, None))
        .collect();
    Ok(records)
}

/// Devices from `show devicegroups`, tagged with the group listing them.
pub fn device_group_members(body: &str) -> Result<Vec<DeviceRecord>, ControllerError> {
    let doc = parse(body)?;
    let groups = path(result(&doc)?, &["devicegroups"])?;

    let mut members = Vec::new();
    for group in groups.children().filter(|node| node.has_tag_name("entry")) {
        let Some(name) = group.attribute("name") else {
            continue;
        };
        let Some(devices) = child(group, "devices") else {
            continue;
        };
        members.extend(
            devices
                .children()
                .filter(|node| node.has_tag_name("entry"))
                .filter_map(|entry| device_entry(entry, Some(name))),
        );
    }
    Ok(members)
}

pub fn job_id(body: &str) -> Result<u64, ControllerError> {
    let doc = parse(body)?;
    let raw = child_text(result(&doc)?, "job")
        .ok_or_else(|| ControllerError::Malformed("response without job id".into()))?;
    let id = raw
        .parse()
        .map_err(|_| ControllerError::Malformed(format!("invalid job id '{raw}'")))?;
    Ok(id)
}

pub fn job_status(body: &str) -> Result<JobStatus, ControllerError> {
    let doc = parse(body)?;
    let job = path(result(&doc)?, &["job"])?;
    let raw_id = child_text(job, "id").unwrap_or_default();
    let details = child(job, "details")
        .map(|details| {
            details
                .descendants()
                .filter(|node| node.is_text())
                .filter_map(|node| node.text())
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    Ok(JobStatus {
        id: raw_id
            .parse()
            .map_err(|_| ControllerError::Malformed(format!("invalid job id '{raw_id}'")))?,
        status: child_text(job, "status").unwrap_or_default().to_string(),
        result: child_text(job, "result").unwrap_or_default().to_string(),
        details,
    })
}

pub fn software_versions(body: &str) -> Result<Vec<AvailableVersion>, ControllerError> {
    let doc = parse(body)?;
    let versions = path(result(&doc)?, &["sw-updates", "versions"])?;
    let available = versions
        .children()
        .filter(|node| node.has_tag_name("entry"))
        .filter_map(|entry| {
            Some(AvailableVersion {
                version: child_text(entry, "version")?.to_string(),
                downloaded: child_text(entry, "downloaded") == Some("yes"),
                current: child_text(entry, "current") == Some("yes"),
            })
        })
        .collect();
    Ok(available)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_carries_message_lines() {
        let body = r#"<response status="error" code="403"><result><msg><line>Invalid credentials.</line></msg></result></response>"#;
        let err = api_key(body).expect_err("should fail");
        assert_eq!(err, ControllerError::Api("Invalid credentials.".into()));
        assert_eq!(error_text(body).as_deref(), Some("Invalid credentials."));
    }

    #[test]
    fn missing_device_group_is_malformed() {
        let body = r#"<response status="success"><result total-count="0" count="0"/></response>"#;
        assert!(matches!(
            device_group(body),
            Err(ControllerError::Malformed(_))
        ));
        assert!(matches!(device_group("not xml"), Err(ControllerError::Malformed(_))));
    }

    #[test]
    fn group_members_are_tagged_with_their_group() {
        let body = r#"<response status="success"><result><devicegroups>
            <entry name="NSX-DG"><devices>
              <entry name="0071"><serial>0071</serial><ip-address>10.0.0.5</ip-address><sw-version>9.1.3</sw-version></entry>
              <entry name="0072"><serial>0072</serial><sw-version>9.1.4</sw-version></entry>
            </devices></entry>
            <entry name="empty"/>
        </devicegroups></result></response>"#;

        let members = device_group_members(body).expect("members");
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].device_group.as_deref(), Some("NSX-DG"));
        assert_eq!(members[0].ip_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(members[1].ip_address, None);
        assert_eq!(members[1].sw_version, "9.1.4");
    }

    #[test]
    fn job_status_collects_details() {
        let body = r#"<response status="success"><result><job>
            <id>42</id><status>FIN</status><result>FAIL</result>
            <details><line>Image exists already</line><line>Aborted</line></details>
        </job></result></response>"#;

        let job = job_status(body).expect("job");
        assert_eq!(job.id, 42);
        assert!(job.is_finished());
        assert!(!job.succeeded());
        assert_eq!(job.details, "Image exists already Aborted");
    }
}
