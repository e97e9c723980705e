/// Instances as recorded in the metadata and as observed in the group
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{GrupoError, GrupoResult};

/// Maximum length of an instance label
pub const MAX_LABEL_LENGTH: usize = 256;

lazy_static! {
    static ref LABEL_RE: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.:\-]*$").unwrap();
}

/// Group Replication member state.
///
/// Always a live value: callers re-query it before any mutating step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberState {
    Online,
    Recovering,
    Offline,
    Unreachable,
    Error,
    /// Recorded in metadata but not listed by the group
    Missing,
}

impl MemberState {
    pub const ACTIVE: [MemberState; 2] = [MemberState::Online, MemberState::Recovering];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberState::Online => "ONLINE",
            MemberState::Recovering => "RECOVERING",
            MemberState::Offline => "OFFLINE",
            MemberState::Unreachable => "UNREACHABLE",
            MemberState::Error => "ERROR",
            MemberState::Missing => "(MISSING)",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, MemberState::Online | MemberState::Recovering)
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberState {
    type Err = GrupoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(MemberState::Online),
            "RECOVERING" => Ok(MemberState::Recovering),
            "OFFLINE" => Ok(MemberState::Offline),
            "UNREACHABLE" => Ok(MemberState::Unreachable),
            "ERROR" => Ok(MemberState::Error),
            "MISSING" | "(MISSING)" | "" => Ok(MemberState::Missing),
            other => Err(GrupoError::internal(format!("Unknown member state '{}'", other))),
        }
    }
}

/// Primary election mode of a replica-set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopologyMode {
    SinglePrimary,
    MultiPrimary,
}

impl TopologyMode {
    /// Short tag stored in the metadata schema
    pub fn metadata_tag(&self) -> &'static str {
        match self {
            TopologyMode::SinglePrimary => "pm",
            TopologyMode::MultiPrimary => "mm",
        }
    }

    pub fn from_metadata_tag(tag: &str) -> GrupoResult<Self> {
        match tag {
            "pm" => Ok(TopologyMode::SinglePrimary),
            "mm" => Ok(TopologyMode::MultiPrimary),
            other => Err(GrupoError::metadata(format!("Unknown topology type '{}'", other))),
        }
    }

    /// Mode implied by the group's primary member UUID
    pub fn from_primary_uuid(primary_uuid: &str) -> Self {
        if primary_uuid.is_empty() {
            TopologyMode::MultiPrimary
        } else {
            TopologyMode::SinglePrimary
        }
    }
}

impl fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyMode::SinglePrimary => write!(f, "Single-Primary"),
            TopologyMode::MultiPrimary => write!(f, "Multi-Primary"),
        }
    }
}

/// Host row owning one or more instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub host_name: String,
    pub ip_address: Option<String>,
    pub location: Option<String>,
}

/// An instance as tracked in metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: u64,
    pub host_id: u64,
    pub replicaset_id: u64,
    /// Classic protocol endpoint, `host:port`
    pub endpoint: String,
    /// X protocol endpoint, when the server exposes one
    pub xendpoint: Option<String>,
    /// `group_replication_local_address`
    pub grendpoint: Option<String>,
    pub server_uuid: String,
    pub label: String,
    pub role: String,
    /// Observed member state, filled by state-aware queries
    pub state: MemberState,
}

impl InstanceRecord {
    pub fn new<S: Into<String>>(endpoint: S, server_uuid: S, replicaset_id: u64) -> Self {
        let endpoint = endpoint.into();
        Self {
            id: 0,
            host_id: 0,
            replicaset_id,
            label: endpoint.clone(),
            endpoint,
            xendpoint: None,
            grendpoint: None,
            server_uuid: server_uuid.into(),
            role: "HA".to_string(),
            state: MemberState::Missing,
        }
    }
}

/// Validate an instance label
pub fn validate_label(label: &str) -> GrupoResult<()> {
    if label.is_empty() {
        return Err(GrupoError::invalid_option(
            "An empty value is not accepted for the 'label' option.",
        ));
    }
    if label.chars().count() > MAX_LABEL_LENGTH {
        return Err(GrupoError::invalid_option(format!(
            "The label can not be greater than {} characters.",
            MAX_LABEL_LENGTH
        )));
    }
    if !LABEL_RE.is_match(label) {
        return Err(GrupoError::invalid_option(format!(
            "The label can only start with an alphanumeric or the '_' character and \
             can only contain alphanumerics or the '_', '.', '-', ':' characters. \
             Invalid label: '{}'.",
            label
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_state_parse() {
        assert_eq!("ONLINE".parse::<MemberState>().unwrap(), MemberState::Online);
        assert_eq!("recovering".parse::<MemberState>().unwrap(), MemberState::Recovering);
        assert_eq!("".parse::<MemberState>().unwrap(), MemberState::Missing);
        assert!("BOGUS".parse::<MemberState>().is_err());
        assert!(MemberState::Recovering.is_active());
        assert!(!MemberState::Unreachable.is_active());
    }

    #[test]
    fn test_topology_from_primary_uuid() {
        assert_eq!(TopologyMode::from_primary_uuid(""), TopologyMode::MultiPrimary);
        assert_eq!(
            TopologyMode::from_primary_uuid("3c5a7b4e-0000-11e9-a1b2-0242ac110002"),
            TopologyMode::SinglePrimary
        );
        assert_eq!(TopologyMode::from_metadata_tag("mm").unwrap(), TopologyMode::MultiPrimary);
        assert!(TopologyMode::from_metadata_tag("xx").is_err());
    }

    #[test]
    fn test_label_defaults_to_endpoint() {
        let record = InstanceRecord::new("db1:3306", "uuid-1", 1);
        assert_eq!(record.label, "db1:3306");
        assert_eq!(record.role, "HA");
    }

    #[test]
    fn test_validate_label() {
        assert!(validate_label("db1:3306").is_ok());
        assert!(validate_label("_node-1.eu").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label("-leading").is_err());
        assert!(validate_label("has space").is_err());
        assert!(validate_label(&"a".repeat(257)).is_err());
        assert!(validate_label(&"a".repeat(256)).is_ok());
    }
}
