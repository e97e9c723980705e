/// MySQL server version numbers
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` server version. Suffixes such as `-log` are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// First version with `SET PERSIST` usable for cluster settings
    pub const SET_PERSIST: Version = Version::new(8, 0, 11);
    /// First version with binary logging enabled by default and server_id defaulting to 1
    pub const LOG_BIN_DEFAULT: Version = Version::new(8, 0, 3);
    /// First version exposing the group communication protocol UDFs
    pub const PROTOCOL_UDFS: Version = Version::new(8, 0, 16);
    /// First version with `group_replication_recovery_get_public_key`
    pub const RECOVERY_PUBLIC_KEY: Version = Version::new(8, 0, 5);

    pub fn is_8_0_or_newer(&self) -> bool {
        self.major >= 8
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let base = s
            .trim()
            .split(|c: char| c == '-' || c.is_whitespace())
            .next()
            .unwrap_or_default();

        let mut parts = base.split('.');
        let mut next = |name: &str, required: bool| -> Result<u32, String> {
            match parts.next() {
                Some(p) => p
                    .parse::<u32>()
                    .map_err(|_| format!("Invalid {} version component in '{}'", name, s)),
                None if required => Err(format!("Invalid version string: '{}'", s)),
                None => Ok(0),
            }
        };

        let major = next("major", true)?;
        let minor = next("minor", false)?;
        let patch = next("patch", false)?;
        Ok(Version::new(major, minor, patch))
    }
}
