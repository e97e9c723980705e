/// Cluster data model shared by every orchestration component
pub mod cluster;
pub mod instance;
pub mod notices;
pub mod version;

pub use cluster::{Cluster, ClusterHandle, ReplicaSet};
pub use instance::{validate_label, HostRecord, InstanceRecord, MemberState, TopologyMode};
pub use notices::{Notice, NoticeLevel, Notices};
pub use version::Version;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How command names are rendered in operator messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingStyle {
    /// `configureLocalInstance`
    #[default]
    Camel,
    /// `configure_local_instance`
    Snake,
}

impl NamingStyle {
    /// Render a camelCase command name in this style
    pub fn member_name(&self, camel: &str) -> String {
        match self {
            NamingStyle::Camel => camel.to_string(),
            NamingStyle::Snake => {
                let mut out = String::with_capacity(camel.len() + 4);
                for c in camel.chars() {
                    if c.is_ascii_uppercase() {
                        out.push('_');
                        out.push(c.to_ascii_lowercase());
                    } else {
                        out.push(c);
                    }
                }
                out
            }
        }
    }
}

impl fmt::Display for NamingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamingStyle::Camel => write!(f, "camel"),
            NamingStyle::Snake => write!(f, "snake"),
        }
    }
}

impl FromStr for NamingStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "camel" => Ok(NamingStyle::Camel),
            "snake" => Ok(NamingStyle::Snake),
            other => Err(format!("Invalid naming style: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_name() {
        assert_eq!(
            NamingStyle::Camel.member_name("configureLocalInstance"),
            "configureLocalInstance"
        );
        assert_eq!(
            NamingStyle::Snake.member_name("configureLocalInstance"),
            "configure_local_instance"
        );
        assert_eq!("snake".parse::<NamingStyle>().unwrap(), NamingStyle::Snake);
        assert!("kebab".parse::<NamingStyle>().is_err());
    }
}
