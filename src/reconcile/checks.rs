/// Compliance checks of an instance against the Group Replication requirements
use tracing::{debug, info};

use super::option_file::OptionFile;
use super::{merge_invalid, ConfigTypes, InvalidConfig, NO_VALUE, VALUE_NOT_SET};
use crate::core::Version;
use crate::error::GrupoResult;
use crate::session::{parse_bool, InstanceSession, VarQualifier};

/// Required value of `server_id`, generated when applied
pub const UNIQUE_ID: &str = "<unique ID>";

/// One required setting of the catalog
#[derive(Debug, Clone, Copy)]
pub struct Requirement {
    pub name: &'static str,
    pub value: &'static str,
    pub restart: bool,
}

const fn required(name: &'static str, value: &'static str, restart: bool) -> Requirement {
    Requirement { name, value, restart }
}

/// Settings every member needs; `gtid_mode` comes after
/// `enforce_gtid_consistency` since it can only be enabled on top of it
pub const REQUIREMENTS: &[Requirement] = &[
    required("binlog_format", "ROW", false),
    required("binlog_checksum", "NONE", false),
    required("enforce_gtid_consistency", "ON", true),
    required("gtid_mode", "ON", true),
    required("log_slave_updates", "ON", true),
    required("master_info_repository", "TABLE", true),
    required("relay_log_info_repository", "TABLE", true),
    required("transaction_write_set_extraction", "XXHASH64", true),
];

/// Option-file spellings that turn binary logging off
const LOG_BIN_DISABLERS: &[&str] = &["skip_log_bin", "disable_log_bin"];

fn value_matches(current: &str, required: &str) -> bool {
    if required == "ON" {
        parse_bool(current)
    } else {
        current.trim().eq_ignore_ascii_case(required)
    }
}

async fn check_server_id(
    session: &dyn InstanceSession,
    version: Version,
    file: Option<&OptionFile>,
    rows: &mut Vec<InvalidConfig>,
) -> GrupoResult<()> {
    let server_id = session
        .get_sysvar_int("server_id", VarQualifier::Global)
        .await?
        .unwrap_or(0);
    // 8.0.3 made 1 the compiled default, which is as good as unset
    let compiled_default = server_id == 1
        && version >= Version::LOG_BIN_DEFAULT
        && session
            .sysvar_source("server_id")
            .await?
            .map_or(false, |s| s.eq_ignore_ascii_case("COMPILED"));

    if server_id == 0 || compiled_default {
        let mut row = InvalidConfig::new("server_id", UNIQUE_ID, ConfigTypes::SERVER)
            .requiring_restart()
            .integer();
        row.current_val = Some(server_id.to_string());
        merge_invalid(rows, row);
    }

    if let Some(file) = file {
        let configured = file.get("server_id").flatten();
        if configured.as_deref().map_or(true, |v| v.trim() == "0") {
            let mut row = InvalidConfig::new("server_id", UNIQUE_ID, ConfigTypes::CONFIG)
                .requiring_restart()
                .integer();
            row.config_val = configured;
            merge_invalid(rows, row);
        }
    }
    Ok(())
}

async fn check_log_bin(
    session: &dyn InstanceSession,
    version: Version,
    file: Option<&OptionFile>,
    rows: &mut Vec<InvalidConfig>,
) -> GrupoResult<()> {
    let enabled = session
        .get_sysvar_bool("log_bin", VarQualifier::Global)
        .await?
        .unwrap_or(false);
    if !enabled {
        let mut row = InvalidConfig::new("log_bin", NO_VALUE, ConfigTypes::SERVER).requiring_restart();
        row.current_val = Some("OFF".to_string());
        merge_invalid(rows, row);
    }

    if let Some(file) = file {
        for disabler in LOG_BIN_DISABLERS {
            if let Some(value) = file.get(disabler) {
                let mut row = InvalidConfig::new(disabler, VALUE_NOT_SET, ConfigTypes::CONFIG)
                    .requiring_restart();
                row.config_val = Some(value.unwrap_or_else(|| NO_VALUE.to_string()));
                merge_invalid(rows, row);
            }
        }
        // binary logging is off by default before 8.0.3
        if version < Version::LOG_BIN_DEFAULT && !file.has("log_bin") {
            merge_invalid(
                rows,
                InvalidConfig::new("log_bin", NO_VALUE, ConfigTypes::CONFIG).requiring_restart(),
            );
        }
    }
    Ok(())
}

async fn check_requirements(
    session: &dyn InstanceSession,
    file: Option<&OptionFile>,
    rows: &mut Vec<InvalidConfig>,
) -> GrupoResult<()> {
    for req in REQUIREMENTS {
        let current = session.get_sysvar(req.name, VarQualifier::Global).await?;
        let server_ok = current
            .as_deref()
            .map_or(false, |v| value_matches(v, req.value));
        if !server_ok {
            let mut row = InvalidConfig::new(req.name, req.value, ConfigTypes::SERVER);
            row.restart = req.restart;
            row.current_val = Some(current.unwrap_or_else(|| VALUE_NOT_SET.to_string()));
            merge_invalid(rows, row);
        }

        if let Some(file) = file {
            let configured = file.get(req.name).flatten();
            let file_ok = configured
                .as_deref()
                .map_or(false, |v| value_matches(v, req.value));
            if !file_ok {
                let mut row = InvalidConfig::new(req.name, req.value, ConfigTypes::CONFIG);
                row.restart = req.restart;
                row.config_val = Some(configured.unwrap_or_else(|| VALUE_NOT_SET.to_string()));
                merge_invalid(rows, row);
            }
        }
    }
    Ok(())
}

/// Every setting of the instance behind `session` (and of its option file,
/// when given) that does not satisfy Group Replication. The order of the
/// returned rows is the order they must be applied in.
pub async fn check_instance_config(
    session: &dyn InstanceSession,
    file: Option<&OptionFile>,
) -> GrupoResult<Vec<InvalidConfig>> {
    let version = session.version().await?;
    let mut rows = Vec::new();

    check_server_id(session, version, file, &mut rows).await?;
    check_log_bin(session, version, file, &mut rows).await?;
    check_requirements(session, file, &mut rows).await?;

    // without durable persistence a server change is lost on restart, so
    // the option file has to carry it too
    let durable = session.is_set_persist_supported().await? == Some(true);
    if !durable && file.is_none() {
        for row in rows.iter_mut() {
            row.types.insert(ConfigTypes::CONFIG);
        }
    }

    if rows.is_empty() {
        info!("Instance '{}' configuration is compliant", session.endpoint());
    } else {
        for row in &rows {
            debug!(
                "'{}': {} must be '{}' ({}{})",
                session.endpoint(),
                row.var_name,
                row.required_val,
                row.types,
                if row.restart { ", restart" } else { "" }
            );
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TopologyMode;
    use crate::testing::FakeFleet;

    fn names(rows: &[InvalidConfig]) -> Vec<&str> {
        rows.iter().map(|r| r.var_name.as_str()).collect()
    }

    fn standalone() -> FakeFleet {
        let fleet = FakeFleet::new(TopologyMode::SinglePrimary);
        fleet.add_standalone("db1:3306", 7);
        fleet
    }

    #[test]
    fn test_value_matches() {
        assert!(value_matches("1", "ON"));
        assert!(value_matches("on", "ON"));
        assert!(!value_matches("ON_PERMISSIVE", "ON"));
        assert!(value_matches("row", "ROW"));
        assert!(!value_matches("MIXED", "ROW"));
    }

    #[tokio::test]
    async fn test_compliant_instance() {
        let fleet = standalone();
        let rows = check_instance_config(&*fleet.session("db1:3306"), None).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_server_id() {
        let fleet = standalone();
        let session = fleet.session("db1:3306");

        fleet.set_sysvar("db1:3306", "server_id", "0");
        let rows = check_instance_config(&*session, None).await.unwrap();
        assert_eq!(names(&rows), vec!["server_id"]);
        assert_eq!(rows[0].required_val, UNIQUE_ID);
        assert!(rows[0].restart);

        fleet.set_sysvar("db1:3306", "server_id", "1");
        assert!(check_instance_config(&*session, None).await.unwrap().is_empty());

        fleet.set_source("db1:3306", "server_id", "COMPILED");
        let rows = check_instance_config(&*session, None).await.unwrap();
        assert_eq!(names(&rows), vec!["server_id"]);
        assert_eq!(rows[0].current_val.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_catalog_order_and_restart() {
        let fleet = standalone();
        fleet.set_sysvar("db1:3306", "gtid_mode", "OFF");
        fleet.set_sysvar("db1:3306", "enforce_gtid_consistency", "OFF");
        fleet.set_sysvar("db1:3306", "binlog_checksum", "CRC32");
        fleet.set_sysvar("db1:3306", "log_slave_updates", "1");
        fleet.remove_sysvar("db1:3306", "transaction_write_set_extraction");

        let rows = check_instance_config(&*fleet.session("db1:3306"), None).await.unwrap();
        assert_eq!(
            names(&rows),
            vec![
                "binlog_checksum",
                "enforce_gtid_consistency",
                "gtid_mode",
                "transaction_write_set_extraction"
            ]
        );
        assert!(!rows[0].restart);
        assert!(rows[1].restart && rows[2].restart);
        assert_eq!(rows[3].current_val.as_deref(), Some(VALUE_NOT_SET));
        assert!(rows.iter().all(|r| r.types == ConfigTypes::SERVER));
    }

    #[tokio::test]
    async fn test_log_bin_disabled() {
        let fleet = standalone();
        fleet.set_sysvar("db1:3306", "log_bin", "OFF");
        let file = OptionFile::parse("my.cnf", "[mysqld]\nskip-log-bin\n").unwrap();

        let rows = check_instance_config(&*fleet.session("db1:3306"), Some(&file))
            .await
            .unwrap();
        assert_eq!(rows[0].var_name, "server_id");
        assert_eq!(rows[0].types, ConfigTypes::CONFIG);
        assert_eq!(rows[1].var_name, "log_bin");
        assert_eq!(rows[1].required_val, NO_VALUE);
        assert_eq!(rows[1].types, ConfigTypes::SERVER);
        assert_eq!(rows[2].var_name, "skip_log_bin");
        assert_eq!(rows[2].required_val, VALUE_NOT_SET);
        // the file carries none of the catalog
        assert_eq!(rows.len(), 3 + REQUIREMENTS.len());
    }

    #[tokio::test]
    async fn test_server_and_file_rows_merge() {
        let fleet = standalone();
        fleet.set_sysvar("db1:3306", "binlog_format", "MIXED");
        let file = OptionFile::parse(
            "my.cnf",
            "[mysqld]\nserver_id = 7\nbinlog_format = MIXED\nbinlog_checksum = NONE\n\
             enforce_gtid_consistency = ON\ngtid_mode = ON\nlog_slave_updates = ON\n\
             master_info_repository = TABLE\nrelay_log_info_repository = TABLE\n\
             transaction_write_set_extraction = XXHASH64\n",
        )
        .unwrap();

        let rows = check_instance_config(&*fleet.session("db1:3306"), Some(&file))
            .await
            .unwrap();
        assert_eq!(names(&rows), vec!["binlog_format"]);
        assert_eq!(rows[0].types, ConfigTypes::SERVER | ConfigTypes::CONFIG);
        assert_eq!(rows[0].current_val.as_deref(), Some("MIXED"));
        assert_eq!(rows[0].config_val.as_deref(), Some("MIXED"));
    }

    #[tokio::test]
    async fn test_old_server_without_file() {
        let fleet = standalone();
        fleet.set_version("db1:3306", Version::new(5, 7, 25));
        fleet.set_sysvar("db1:3306", "gtid_mode", "OFF");

        let rows = check_instance_config(&*fleet.session("db1:3306"), None).await.unwrap();
        assert_eq!(names(&rows), vec!["gtid_mode"]);
        assert_eq!(rows[0].types, ConfigTypes::SERVER | ConfigTypes::CONFIG);
    }

    #[tokio::test]
    async fn test_old_server_file_needs_log_bin() {
        let fleet = standalone();
        fleet.set_version("db1:3306", Version::new(5, 7, 25));
        let file = OptionFile::parse("my.cnf", "[mysqld]\nserver_id = 7\n").unwrap();

        let rows = check_instance_config(&*fleet.session("db1:3306"), Some(&file))
            .await
            .unwrap();
        assert_eq!(rows[0].var_name, "log_bin");
        assert_eq!(rows[0].types, ConfigTypes::CONFIG);
        assert_eq!(rows[0].required_val, NO_VALUE);
    }
}
