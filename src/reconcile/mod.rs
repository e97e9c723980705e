/// Configuration Reconciler
///
/// Compares an instance against the settings Group Replication needs and
/// applies the difference. A setting can live on the running server
/// (`SET PERSIST`, `SET PERSIST_ONLY` or `SET GLOBAL`) and in the option
/// file read on startup; each invalid setting records which of the two
/// must change.
pub mod checks;
pub mod configure;
pub mod option_file;

pub use checks::check_instance_config;
pub use configure::configure_instance;
pub use option_file::OptionFile;

use serde::Serialize;
use std::fmt;
use std::ops::BitOr;
use std::path::Path;
use tracing::info;

use crate::error::GrupoResult;
use crate::replicaset::{release, Orchestrator};

/// Required value meaning "remove the option from the option file"
pub const VALUE_NOT_SET: &str = "<not set>";
/// Required value meaning "option present without a value"
pub const NO_VALUE: &str = "<no value>";

/// Where a setting must be changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ConfigTypes(u8);

impl ConfigTypes {
    pub const NONE: ConfigTypes = ConfigTypes(0);
    /// The running server
    pub const SERVER: ConfigTypes = ConfigTypes(1);
    /// The option file
    pub const CONFIG: ConfigTypes = ConfigTypes(2);

    pub fn contains(self, other: ConfigTypes) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ConfigTypes) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ConfigTypes) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ConfigTypes {
    type Output = ConfigTypes;

    fn bitor(self, rhs: ConfigTypes) -> ConfigTypes {
        ConfigTypes(self.0 | rhs.0)
    }
}

impl fmt::Display for ConfigTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::SERVER), self.contains(Self::CONFIG)) {
            (true, true) => f.write_str("server+config"),
            (true, false) => f.write_str("server"),
            (false, true) => f.write_str("config"),
            (false, false) => f.write_str("none"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
}

/// One setting found wrong on an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidConfig {
    pub var_name: String,
    /// Live value, `None` when only the option file was inspected
    pub current_val: Option<String>,
    /// Value in the option file; `None` when absent
    pub config_val: Option<String>,
    pub required_val: String,
    pub types: ConfigTypes,
    /// The change only takes effect after a restart
    pub restart: bool,
    pub val_type: ValueType,
}

impl InvalidConfig {
    pub fn new(var_name: &str, required_val: &str, types: ConfigTypes) -> Self {
        Self {
            var_name: var_name.to_string(),
            current_val: None,
            config_val: None,
            required_val: required_val.to_string(),
            types,
            restart: false,
            val_type: ValueType::String,
        }
    }

    pub fn requiring_restart(mut self) -> Self {
        self.restart = true;
        self
    }

    pub fn integer(mut self) -> Self {
        self.val_type = ValueType::Integer;
        self
    }
}

/// Merge `row` into `rows`, combining the channels of rows for the same
/// setting and keeping the position of the first one
pub fn merge_invalid(rows: &mut Vec<InvalidConfig>, row: InvalidConfig) {
    match rows.iter_mut().find(|r| r.var_name == row.var_name) {
        Some(existing) => {
            existing.types.insert(row.types);
            existing.restart |= row.restart;
            if existing.current_val.is_none() {
                existing.current_val = row.current_val;
            }
            if existing.config_val.is_none() {
                existing.config_val = row.config_val;
            }
        }
        None => rows.push(row),
    }
}

/// What `configure_instance` left to do
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigureOutcome {
    /// Some change only takes effect after the server restarts
    pub restart_required: bool,
    /// Option-file changes that could not be written
    pub manual_followups: Vec<InvalidConfig>,
}

impl Orchestrator {
    /// Settings of the instance at `endpoint` that Group Replication rejects
    pub async fn check_instance(
        &self,
        endpoint: &str,
        option_file: Option<&Path>,
    ) -> GrupoResult<Vec<InvalidConfig>> {
        let file = match option_file {
            Some(path) => Some(OptionFile::load(path).await?),
            None => None,
        };
        let session = self.connect(endpoint).await?;
        let result = check_instance_config(session.as_ref(), file.as_ref()).await;
        release(&session).await;
        result
    }

    /// Check the instance at `endpoint` and fix what it can
    pub async fn configure_instance(
        &self,
        endpoint: &str,
        option_file: Option<&Path>,
    ) -> GrupoResult<(Vec<InvalidConfig>, ConfigureOutcome)> {
        let mut file = match option_file {
            Some(path) => Some(OptionFile::load(path).await?),
            None => None,
        };
        let session = self.connect(endpoint).await?;
        let result: GrupoResult<(Vec<InvalidConfig>, ConfigureOutcome)> = async {
            let invalid = check_instance_config(session.as_ref(), file.as_ref()).await?;
            if invalid.is_empty() {
                info!("The instance '{}' is valid for Group Replication", endpoint);
                return Ok((invalid, ConfigureOutcome::default()));
            }
            let outcome = configure_instance(
                session.as_ref(),
                file.as_mut(),
                &invalid,
                self.settings().persist_delay,
            )
            .await?;
            Ok((invalid, outcome))
        }
        .await;
        release(&session).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TopologyMode;
    use crate::testing::FakeFleet;

    #[test]
    fn test_config_types() {
        let both = ConfigTypes::SERVER | ConfigTypes::CONFIG;
        assert!(both.contains(ConfigTypes::SERVER));
        assert!(both.contains(ConfigTypes::CONFIG));
        assert!(!ConfigTypes::SERVER.contains(ConfigTypes::CONFIG));
        assert!(!ConfigTypes::SERVER.contains(ConfigTypes::NONE));
        assert_eq!(both.to_string(), "server+config");

        let mut types = both;
        types.remove(ConfigTypes::SERVER);
        assert_eq!(types, ConfigTypes::CONFIG);
    }

    #[test]
    fn test_merge_keeps_first_position() {
        let mut rows = vec![
            InvalidConfig::new("binlog_format", "ROW", ConfigTypes::SERVER),
            InvalidConfig::new("gtid_mode", "ON", ConfigTypes::SERVER).requiring_restart(),
        ];
        let mut from_file = InvalidConfig::new("binlog_format", "ROW", ConfigTypes::CONFIG);
        from_file.config_val = Some("MIXED".to_string());
        merge_invalid(&mut rows, from_file);
        merge_invalid(&mut rows, InvalidConfig::new("log_slave_updates", "ON", ConfigTypes::CONFIG));

        let names: Vec<&str> = rows.iter().map(|r| r.var_name.as_str()).collect();
        assert_eq!(names, vec!["binlog_format", "gtid_mode", "log_slave_updates"]);
        assert_eq!(rows[0].types, ConfigTypes::SERVER | ConfigTypes::CONFIG);
        assert_eq!(rows[0].config_val.as_deref(), Some("MIXED"));
    }

    #[tokio::test]
    async fn test_configure_through_orchestrator() {
        let fleet = FakeFleet::new(TopologyMode::SinglePrimary);
        fleet.add_standalone("db1:3306", 5);
        fleet.set_sysvar("db1:3306", "binlog_format", "MIXED");
        let orchestrator = fleet.orchestrator();

        let invalid = orchestrator.check_instance("db1:3306", None).await.unwrap();
        assert_eq!(invalid.len(), 1);

        let (invalid, outcome) = orchestrator.configure_instance("db1:3306", None).await.unwrap();
        assert_eq!(invalid[0].var_name, "binlog_format");
        assert!(!outcome.restart_required);
        assert!(orchestrator.check_instance("db1:3306", None).await.unwrap().is_empty());
        assert_eq!(fleet.open_sessions(), 0);
    }
}
