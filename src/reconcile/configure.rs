/// Application of the changes found by the compliance checks
use std::time::Duration;
use tracing::{debug, info};

use super::checks::UNIQUE_ID;
use super::option_file::OptionFile;
use super::{ConfigTypes, ConfigureOutcome, InvalidConfig, ValueType, NO_VALUE, VALUE_NOT_SET};
use crate::error::{GrupoError, GrupoResult};
use crate::session::{InstanceSession, SysvarValue, VarQualifier};
use crate::utils::generate_server_id;

/// Settings the server only accepts at startup
const READ_ONLY_SYSVARS: &[&str] = &[
    "enforce_gtid_consistency",
    "log_slave_updates",
    "gtid_mode",
    "master_info_repository",
    "relay_log_info_repository",
    "transaction_write_set_extraction",
    "server_id",
];

/// Settings with no runtime equivalent
const OPTION_FILE_ONLY: &[&str] = &["log_bin"];

/// Settings whose persisted write must not share a timestamp with the next one
const DELAYED_SYSVARS: &[&str] = &["enforce_gtid_consistency"];

fn is_read_only(name: &str) -> bool {
    READ_ONLY_SYSVARS.contains(&name)
}

fn is_option_file_only(name: &str) -> bool {
    OPTION_FILE_ONLY.contains(&name)
}

fn server_value(row: &InvalidConfig, value: &str) -> GrupoResult<SysvarValue> {
    match row.val_type {
        ValueType::Integer => value.parse::<i64>().map(SysvarValue::Int).map_err(|_| {
            GrupoError::internal(format!(
                "Invalid integer value '{}' for '{}'",
                value, row.var_name
            ))
        }),
        ValueType::String => Ok(SysvarValue::from(value)),
    }
}

fn apply_to_file(file: &mut OptionFile, row: &InvalidConfig, value: &str) {
    match value {
        VALUE_NOT_SET => {
            file.remove(&row.var_name);
        }
        NO_VALUE => file.set(&row.var_name, None),
        _ => file.set(&row.var_name, Some(value)),
    }
    debug!(
        "Option file {}: {} -> '{}'",
        file.path().display(),
        row.var_name,
        value
    );
}

/// Apply `invalid` in order to the server behind `session` and to `file`.
///
/// Startup-only settings are written with `SET PERSIST_ONLY` when the
/// server persists durably, other settings with `SET PERSIST` (or
/// `SET GLOBAL` when it cannot). Option-file changes that have no file to
/// go to are returned as follow-ups for the operator.
pub async fn configure_instance(
    session: &dyn InstanceSession,
    mut file: Option<&mut OptionFile>,
    invalid: &[InvalidConfig],
    persist_delay: Duration,
) -> GrupoResult<ConfigureOutcome> {
    let endpoint = session.endpoint();
    let durable = session.is_set_persist_supported().await? == Some(true);
    let mut outcome = ConfigureOutcome::default();

    for row in invalid {
        let name = row.var_name.as_str();
        let value = if row.required_val == UNIQUE_ID {
            generate_server_id().to_string()
        } else {
            row.required_val.clone()
        };

        let wants_server = row.types.contains(ConfigTypes::SERVER);
        let mut wants_file = row.types.contains(ConfigTypes::CONFIG);

        if wants_server {
            if is_option_file_only(name) || (is_read_only(name) && !durable) {
                wants_file = true;
            } else {
                let qualifier = if is_read_only(name) {
                    VarQualifier::PersistOnly
                } else if durable {
                    VarQualifier::Persist
                } else {
                    VarQualifier::Global
                };
                info!(
                    "Setting '{}' to '{}' on '{}' ({})",
                    name,
                    value,
                    endpoint,
                    qualifier.keyword()
                );
                session
                    .set_sysvar(name, &server_value(row, &value)?, qualifier)
                    .await?;
                outcome.restart_required |= row.restart;

                if qualifier != VarQualifier::Global && DELAYED_SYSVARS.contains(&name) {
                    tokio::time::sleep(persist_delay).await;
                }
            }
        }

        if wants_file {
            match file.as_deref_mut() {
                Some(file) => {
                    apply_to_file(file, row, &value);
                    outcome.restart_required |= row.restart;
                }
                None => {
                    let mut followup = row.clone();
                    followup.types = ConfigTypes::CONFIG;
                    outcome.manual_followups.push(followup);
                }
            }
        }
    }

    if let Some(file) = file {
        file.apply().await?;
    }

    if outcome.restart_required {
        info!("The instance '{}' must be restarted for the changes to take effect", endpoint);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TopologyMode, Version};
    use crate::reconcile::check_instance_config;
    use crate::testing::FakeFleet;
    use tempfile::TempDir;

    fn standalone() -> FakeFleet {
        let fleet = FakeFleet::new(TopologyMode::SinglePrimary);
        fleet.add_standalone("db1:3306", 1);
        fleet
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let fleet = standalone();
        fleet.set_source("db1:3306", "server_id", "COMPILED");
        fleet.set_sysvar("db1:3306", "binlog_format", "MIXED");
        fleet.set_sysvar("db1:3306", "enforce_gtid_consistency", "OFF");
        fleet.set_sysvar("db1:3306", "gtid_mode", "OFF");
        let session = fleet.session("db1:3306");

        let invalid = check_instance_config(&*session, None).await.unwrap();
        assert_eq!(invalid.len(), 4);
        let outcome = configure_instance(&*session, None, &invalid, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(outcome.restart_required);
        assert!(outcome.manual_followups.is_empty());

        assert_eq!(
            fleet.writes("db1:3306", "binlog_format"),
            vec![("ROW".to_string(), VarQualifier::Persist)]
        );
        assert_eq!(
            fleet.writes("db1:3306", "gtid_mode"),
            vec![("ON".to_string(), VarQualifier::PersistOnly)]
        );
        // startup-only values wait for the restart
        assert_eq!(fleet.sysvar("db1:3306", "gtid_mode").as_deref(), Some("OFF"));
        let server_id: u64 = fleet.persisted("db1:3306", "server_id").unwrap().parse().unwrap();
        assert!(server_id >= 1);

        fleet.restart("db1:3306");
        assert!(check_instance_config(&*session, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_option_file_channel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("my.cnf");
        tokio::fs::write(&path, "[mysqld]\n# keep\nskip-log-bin\nbinlog_format=MIXED\n")
            .await
            .unwrap();

        let fleet = standalone();
        fleet.set_sysvar("db1:3306", "server_id", "42");
        fleet.set_sysvar("db1:3306", "log_bin", "OFF");
        let session = fleet.session("db1:3306");
        let mut file = OptionFile::load(&path).await.unwrap();

        let invalid = check_instance_config(&*session, Some(&file)).await.unwrap();
        let outcome = configure_instance(&*session, Some(&mut file), &invalid, Duration::ZERO)
            .await
            .unwrap();
        assert!(outcome.restart_required);
        assert!(outcome.manual_followups.is_empty());
        assert!(fleet.writes("db1:3306", "log_bin").is_empty());

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.starts_with("[mysqld]\n# keep\n"));
        assert!(!written.contains("skip-log-bin"));

        let reloaded = OptionFile::load(&path).await.unwrap();
        assert_eq!(reloaded.get("log_bin"), Some(None));
        assert_eq!(reloaded.get("binlog_format"), Some(Some("ROW".to_string())));
        assert_eq!(reloaded.get("gtid_mode"), Some(Some("ON".to_string())));
        assert!(reloaded.get("server_id").flatten().is_some());

        // only the running server is still behind
        let remaining = check_instance_config(&*session, Some(&reloaded)).await.unwrap();
        let names: Vec<&str> = remaining.iter().map(|r| r.var_name.as_str()).collect();
        assert_eq!(names, vec!["log_bin"]);
    }

    #[tokio::test]
    async fn test_followups_without_persistence() {
        let fleet = standalone();
        fleet.set_version("db1:3306", Version::new(5, 7, 25));
        fleet.set_sysvar("db1:3306", "binlog_format", "MIXED");
        fleet.set_sysvar("db1:3306", "gtid_mode", "OFF");
        let session = fleet.session("db1:3306");

        let invalid = check_instance_config(&*session, None).await.unwrap();
        let outcome = configure_instance(&*session, None, &invalid, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(
            fleet.writes("db1:3306", "binlog_format"),
            vec![("ROW".to_string(), VarQualifier::Global)]
        );
        assert!(fleet.writes("db1:3306", "gtid_mode").is_empty());
        let followups: Vec<&str> = outcome
            .manual_followups
            .iter()
            .map(|r| r.var_name.as_str())
            .collect();
        assert_eq!(followups, vec!["binlog_format", "gtid_mode"]);
        assert!(!outcome.restart_required);
    }

    #[tokio::test]
    async fn test_persist_delay_after_gtid_consistency() {
        let fleet = standalone();
        fleet.set_sysvar("db1:3306", "enforce_gtid_consistency", "OFF");
        fleet.set_sysvar("db1:3306", "gtid_mode", "OFF");
        let session = fleet.session("db1:3306");
        let invalid = check_instance_config(&*session, None).await.unwrap();

        let started = std::time::Instant::now();
        configure_instance(&*session, None, &invalid, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
