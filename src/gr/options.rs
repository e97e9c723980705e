/// Group Replication options accepted from the operator
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::core::{Notices, Version};
use crate::error::{GrupoError, GrupoResult};
use crate::session::{InstanceSession, VarQualifier};
use crate::utils::split_list;

pub const SYSVAR_EXIT_STATE_ACTION: &str = "group_replication_exit_state_action";
pub const SYSVAR_MEMBER_WEIGHT: &str = "group_replication_member_weight";
pub const SYSVAR_CONSISTENCY: &str = "group_replication_consistency";
pub const SYSVAR_EXPEL_TIMEOUT: &str = "group_replication_member_expel_timeout";
pub const SYSVAR_AUTO_REJOIN_TRIES: &str = "group_replication_autorejoin_tries";

const CONSISTENCY_LEVELS: [&str; 5] = [
    "EVENTUAL",
    "BEFORE_ON_PRIMARY_FAILOVER",
    "BEFORE",
    "AFTER",
    "BEFORE_AND_AFTER",
];
const EXIT_STATE_ACTIONS: [&str; 2] = ["ABORT_SERVER", "READ_ONLY"];
const MAX_EXPEL_TIMEOUT: i64 = 3600;
const MAX_AUTO_REJOIN_TRIES: i64 = 2016;

/// Minimum versions of an option on the 8.0 and 5.7 release lines
#[derive(Debug, Clone, Copy)]
pub struct OptionSupport {
    pub name: &'static str,
    pub min_8_0: Version,
    pub min_5_7: Option<Version>,
}

impl OptionSupport {
    pub fn is_supported(&self, version: Version) -> bool {
        if version.is_8_0_or_newer() {
            version >= self.min_8_0
        } else if version.major == 5 && version.minor == 7 {
            self.min_5_7.map_or(false, |min| version >= min)
        } else {
            false
        }
    }

    pub fn check(&self, version: Version) -> GrupoResult<()> {
        if self.is_supported(version) {
            Ok(())
        } else {
            Err(GrupoError::unsupported_option(self.name, version))
        }
    }
}

pub const EXIT_STATE_ACTION: OptionSupport = OptionSupport {
    name: "exitStateAction",
    min_8_0: Version::new(8, 0, 12),
    min_5_7: Some(Version::new(5, 7, 24)),
};
pub const MEMBER_WEIGHT: OptionSupport = OptionSupport {
    name: "memberWeight",
    min_8_0: Version::new(8, 0, 11),
    min_5_7: Some(Version::new(5, 7, 20)),
};
pub const CONSISTENCY: OptionSupport = OptionSupport {
    name: "consistency",
    min_8_0: Version::new(8, 0, 14),
    min_5_7: None,
};
pub const EXPEL_TIMEOUT: OptionSupport = OptionSupport {
    name: "expelTimeout",
    min_8_0: Version::new(8, 0, 13),
    min_5_7: None,
};
pub const AUTO_REJOIN_TRIES: OptionSupport = OptionSupport {
    name: "autoRejoinTries",
    min_8_0: Version::new(8, 0, 16),
    min_5_7: None,
};

/// `memberSslMode` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SslMode {
    Auto,
    Disabled,
    Required,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Auto => "AUTO",
            SslMode::Disabled => "DISABLED",
            SslMode::Required => "REQUIRED",
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SslMode {
    type Err = GrupoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(SslMode::Auto),
            "DISABLED" => Ok(SslMode::Disabled),
            "REQUIRED" => Ok(SslMode::Required),
            _ => Err(GrupoError::invalid_option(format!(
                "Invalid value for memberSslMode option. Supported values: AUTO,DISABLED,REQUIRED."
            ))),
        }
    }
}

/// Optional tuning values for starting or joining Group Replication
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReplicationOptions {
    pub ssl_mode: Option<SslMode>,
    pub ip_allowlist: Option<String>,
    pub local_address: Option<String>,
    pub group_seeds: Option<String>,
    pub group_name: Option<String>,
    pub exit_state_action: Option<String>,
    pub member_weight: Option<i64>,
    pub consistency: Option<String>,
    pub expel_timeout: Option<i64>,
    pub auto_rejoin_tries: Option<i64>,
}

fn non_empty(option: &str, value: &Option<String>) -> GrupoResult<()> {
    match value {
        Some(v) if v.trim().is_empty() => Err(GrupoError::invalid_option(format!(
            "Invalid value for {}, string value cannot be empty.",
            option
        ))),
        _ => Ok(()),
    }
}

fn validate_local_address(address: &str) -> GrupoResult<()> {
    let port = match address.rsplit_once(':') {
        Some((_, port)) => port,
        None if address.chars().all(|c| c.is_ascii_digit()) => address,
        None => return Ok(()),
    };
    if port.is_empty() {
        return Ok(());
    }
    match port.parse::<u32>() {
        Ok(p) if (1..=65535).contains(&p) => Ok(()),
        _ => Err(GrupoError::invalid_option(format!(
            "Invalid port '{}' for localAddress option. The port must be an integer between 1 and 65535.",
            port
        ))),
    }
}

impl GroupReplicationOptions {
    /// Validate values and reject options the target version does not support
    pub fn check_option_values(&self, version: Version) -> GrupoResult<()> {
        non_empty("ipWhitelist", &self.ip_allowlist)?;
        non_empty("localAddress", &self.local_address)?;
        non_empty("groupSeeds", &self.group_seeds)?;
        non_empty("groupName", &self.group_name)?;

        if let Some(address) = &self.local_address {
            validate_local_address(address.trim())?;
        }

        if let Some(action) = &self.exit_state_action {
            EXIT_STATE_ACTION.check(version)?;
            let upper = action.trim().to_ascii_uppercase();
            if upper.is_empty() {
                return Err(GrupoError::invalid_option(
                    "Invalid value for exitStateAction, string value cannot be empty.",
                ));
            }
            if !EXIT_STATE_ACTIONS.contains(&upper.as_str()) && upper != "0" && upper != "1" {
                return Err(GrupoError::invalid_option(format!(
                    "Invalid value for exitStateAction, supported values: {}.",
                    EXIT_STATE_ACTIONS.join(", ")
                )));
            }
        }

        if self.member_weight.is_some() {
            MEMBER_WEIGHT.check(version)?;
        }

        if let Some(consistency) = &self.consistency {
            CONSISTENCY.check(version)?;
            let upper = consistency.trim().to_ascii_uppercase();
            if upper.is_empty() {
                return Err(GrupoError::invalid_option(
                    "Invalid value for consistency, string value cannot be empty.",
                ));
            }
            let numeric_ok = upper
                .parse::<usize>()
                .map_or(false, |n| n < CONSISTENCY_LEVELS.len());
            if !numeric_ok && !CONSISTENCY_LEVELS.contains(&upper.as_str()) {
                return Err(GrupoError::invalid_option(format!(
                    "Invalid value for consistency, supported values: {}.",
                    CONSISTENCY_LEVELS.join(", ")
                )));
            }
        }

        if let Some(timeout) = self.expel_timeout {
            EXPEL_TIMEOUT.check(version)?;
            if !(0..=MAX_EXPEL_TIMEOUT).contains(&timeout) {
                return Err(GrupoError::invalid_option(format!(
                    "Invalid value for expelTimeout, integer value must be in the range: [0, {}]",
                    MAX_EXPEL_TIMEOUT
                )));
            }
        }

        if let Some(tries) = self.auto_rejoin_tries {
            AUTO_REJOIN_TRIES.check(version)?;
            if !(0..=MAX_AUTO_REJOIN_TRIES).contains(&tries) {
                return Err(GrupoError::invalid_option(format!(
                    "Invalid value for autoRejoinTries, integer value must be in the range: [0, {}]",
                    MAX_AUTO_REJOIN_TRIES
                )));
            }
        }

        Ok(())
    }

    /// Operator warnings implied by the supplied values
    pub fn collect_warnings(&self, notices: &mut Notices) {
        if let Some(tries) = self.auto_rejoin_tries {
            if tries != 0 {
                notices.warn(
                    "The member will only proceed according to its exitStateAction if \
                     auto-rejoin fails (i.e. all retry attempts are exhausted).",
                );
            }
        }
    }

    /// Fill unset options from the values currently configured on the server
    pub async fn read_option_values(&mut self, session: &dyn InstanceSession) -> GrupoResult<()> {
        let version = session.version().await?;

        if self.exit_state_action.is_none() && EXIT_STATE_ACTION.is_supported(version) {
            self.exit_state_action = session
                .get_sysvar(SYSVAR_EXIT_STATE_ACTION, VarQualifier::Global)
                .await?;
        }
        if self.member_weight.is_none() && MEMBER_WEIGHT.is_supported(version) {
            self.member_weight = session
                .get_sysvar_int(SYSVAR_MEMBER_WEIGHT, VarQualifier::Global)
                .await?;
        }
        if self.consistency.is_none() && CONSISTENCY.is_supported(version) {
            self.consistency = session
                .get_sysvar(SYSVAR_CONSISTENCY, VarQualifier::Global)
                .await?;
        }
        if self.expel_timeout.is_none() && EXPEL_TIMEOUT.is_supported(version) {
            self.expel_timeout = session
                .get_sysvar_int(SYSVAR_EXPEL_TIMEOUT, VarQualifier::Global)
                .await?;
        }
        if self.auto_rejoin_tries.is_none() && AUTO_REJOIN_TRIES.is_supported(version) {
            self.auto_rejoin_tries = session
                .get_sysvar_int(SYSVAR_AUTO_REJOIN_TRIES, VarQualifier::Global)
                .await?;
        }
        Ok(())
    }

    pub fn log_values(&self) {
        if let Some(v) = &self.ssl_mode {
            info!("Using Group Replication SSL mode: {}", v);
        }
        if let Some(v) = &self.ip_allowlist {
            info!("Using Group Replication IP allowlist: {}", v);
        }
        if let Some(v) = &self.local_address {
            info!("Using Group Replication local address: {}", v);
        }
        if let Some(v) = &self.group_seeds {
            info!("Using Group Replication group seeds: {}", v);
        }
        if let Some(v) = &self.exit_state_action {
            info!("Using Group Replication exit state action: {}", v);
        }
        if let Some(v) = self.member_weight {
            info!("Using Group Replication member weight: {}", v);
        }
        if let Some(v) = self.auto_rejoin_tries {
            info!("Using Group Replication rejoin retries: {}", v);
        }
    }

    /// Group seeds as a list
    pub fn seeds(&self) -> Vec<String> {
        self.group_seeds.as_deref().map(split_list).unwrap_or_default()
    }
}
