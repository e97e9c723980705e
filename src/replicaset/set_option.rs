/// Change one option of a replica-set member
use std::fmt;
use tracing::info;

use super::{release, Orchestrator};
use crate::core::{validate_label, Notices, ReplicaSet};
use crate::error::{GrupoError, GrupoResult};
use crate::gr::options::{
    OptionSupport, AUTO_REJOIN_TRIES, EXIT_STATE_ACTION, MEMBER_WEIGHT, SYSVAR_AUTO_REJOIN_TRIES,
    SYSVAR_EXIT_STATE_ACTION, SYSVAR_MEMBER_WEIGHT,
};
use crate::gr::{persist_sysvars, GroupReplicationOptions, Persistence};
use crate::metadata::require_instance;
use crate::session::{InstanceSession, SysvarValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceOptionValue {
    Str(String),
    Int(i64),
}

impl InstanceOptionValue {
    fn as_str(&self, option: &str) -> GrupoResult<&str> {
        match self {
            InstanceOptionValue::Str(s) => Ok(s),
            InstanceOptionValue::Int(_) => Err(GrupoError::invalid_option(format!(
                "Invalid value for '{}': Argument #3 is expected to be a string",
                option
            ))),
        }
    }

    fn as_int(&self, option: &str) -> GrupoResult<i64> {
        match self {
            InstanceOptionValue::Int(i) => Ok(*i),
            InstanceOptionValue::Str(s) => s.trim().parse().map_err(|_| {
                GrupoError::invalid_option(format!(
                    "Invalid value for '{}': Argument #3 is expected to be an integer",
                    option
                ))
            }),
        }
    }
}

impl fmt::Display for InstanceOptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceOptionValue::Str(s) => f.write_str(s),
            InstanceOptionValue::Int(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for InstanceOptionValue {
    fn from(s: &str) -> Self {
        InstanceOptionValue::Str(s.to_string())
    }
}

impl From<i64> for InstanceOptionValue {
    fn from(i: i64) -> Self {
        InstanceOptionValue::Int(i)
    }
}

impl Orchestrator {
    /// Set `option` on `endpoint`: `label` lives in the metadata, the other
    /// options are Group Replication variables persisted on the instance
    pub async fn set_instance_option(
        &self,
        replicaset: &ReplicaSet,
        endpoint: &str,
        option: &str,
        value: InstanceOptionValue,
    ) -> GrupoResult<Notices> {
        let cluster = replicaset.cluster()?;
        let metadata = cluster.metadata().clone();
        require_instance(metadata.as_ref(), replicaset.record(), endpoint).await?;

        let session = self.connect(endpoint).await?;
        let mut notices = Notices::new();
        let result: GrupoResult<()> = async {
            match option {
                "label" => {
                    let label = value.as_str(option)?;
                    validate_label(label)?;
                    if !metadata.is_instance_label_unique(replicaset.id(), label).await? {
                        return Err(GrupoError::precondition(format!(
                            "An instance with label '{}' is already part of this InnoDB cluster",
                            label
                        )));
                    }
                    metadata.set_instance_label(endpoint, label).await
                }
                "exitStateAction" => {
                    let action = value.as_str(option)?.to_string();
                    self.set_gr_option(
                        session.as_ref(),
                        EXIT_STATE_ACTION,
                        SYSVAR_EXIT_STATE_ACTION,
                        GroupReplicationOptions {
                            exit_state_action: Some(action.clone()),
                            ..Default::default()
                        },
                        SysvarValue::from(action.trim().to_ascii_uppercase()),
                        &mut notices,
                    )
                    .await
                }
                "memberWeight" => {
                    let weight = value.as_int(option)?;
                    self.set_gr_option(
                        session.as_ref(),
                        MEMBER_WEIGHT,
                        SYSVAR_MEMBER_WEIGHT,
                        GroupReplicationOptions {
                            member_weight: Some(weight),
                            ..Default::default()
                        },
                        SysvarValue::Int(weight),
                        &mut notices,
                    )
                    .await
                }
                "autoRejoinTries" => {
                    let tries = value.as_int(option)?;
                    self.set_gr_option(
                        session.as_ref(),
                        AUTO_REJOIN_TRIES,
                        SYSVAR_AUTO_REJOIN_TRIES,
                        GroupReplicationOptions {
                            auto_rejoin_tries: Some(tries),
                            ..Default::default()
                        },
                        SysvarValue::Int(tries),
                        &mut notices,
                    )
                    .await
                }
                other => Err(GrupoError::invalid_option(format!(
                    "Option '{}' not supported.",
                    other
                ))),
            }
        }
        .await;
        release(&session).await;

        result.map(|_| {
            info!("Successfully set the value of '{}' to '{}' for the instance '{}'.", option, value, endpoint);
            notices
        })
    }

    async fn set_gr_option(
        &self,
        session: &dyn InstanceSession,
        support: OptionSupport,
        sysvar: &str,
        options: GroupReplicationOptions,
        value: SysvarValue,
        notices: &mut Notices,
    ) -> GrupoResult<()> {
        let version = session.version().await?;
        support.check(version)?;
        options.check_option_values(version)?;
        options.collect_warnings(notices);

        let persistence = persist_sysvars(session, &[(sysvar, value)]).await?;
        let configure = self.dba_command("configureLocalInstance");
        match persistence {
            Persistence::Durable => {}
            Persistence::NotLoadedOnBoot => notices.warn(format!(
                "On instance '{}' the persisted cluster configuration will not be loaded upon \
                 reboot since 'persisted-globals-load' is set to 'OFF'. Please use the {} \
                 command locally to persist the changes or set 'persisted-globals-load' to 'ON' \
                 on the configuration file.",
                session.endpoint(),
                configure
            )),
            Persistence::RuntimeOnly => notices.warn(format!(
                "On instance '{}' the change cannot be persisted since MySQL version {} does not \
                 support the SET PERSIST command (MySQL version >= 8.0.11 required). Please use \
                 the {} command locally to persist the changes.",
                session.endpoint(),
                version,
                configure
            )),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TopologyMode, Version};
    use crate::metadata::MetadataStore;
    use crate::session::VarQualifier;
    use crate::testing::FakeFleet;

    async fn two_members() -> FakeFleet {
        let fleet = FakeFleet::new(TopologyMode::SinglePrimary);
        fleet.add_member("db1:3306", 1).await;
        fleet.add_member("db2:3306", 2).await;
        fleet
    }

    #[tokio::test]
    async fn test_set_label() {
        let fleet = two_members().await;
        let (_cluster, replicaset) = fleet.replicaset("db1:3306").await;
        let orchestrator = fleet.orchestrator();

        orchestrator
            .set_instance_option(&replicaset, "db2:3306", "label", "replica_b".into())
            .await
            .unwrap();
        let record = fleet.metadata().get_instance("db2:3306").await.unwrap().unwrap();
        assert_eq!(record.label, "replica_b");

        let err = orchestrator
            .set_instance_option(&replicaset, "db1:3306", "label", "replica_b".into())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already part of this InnoDB cluster"));

        let err = orchestrator
            .set_instance_option(&replicaset, "db1:3306", "label", "-bad".into())
            .await
            .unwrap_err();
        assert!(matches!(err, GrupoError::InvalidOption { .. }));
    }

    #[tokio::test]
    async fn test_set_member_weight_persists() {
        let fleet = two_members().await;
        let (_cluster, replicaset) = fleet.replicaset("db1:3306").await;

        let notices = fleet
            .orchestrator()
            .set_instance_option(&replicaset, "db2:3306", "memberWeight", InstanceOptionValue::Int(25))
            .await
            .unwrap();
        assert!(notices.is_empty());
        assert_eq!(
            fleet.writes("db2:3306", SYSVAR_MEMBER_WEIGHT),
            vec![("25".to_string(), VarQualifier::Persist)]
        );
        assert_eq!(fleet.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_set_exit_state_action() {
        let fleet = two_members().await;
        let (_cluster, replicaset) = fleet.replicaset("db1:3306").await;
        let orchestrator = fleet.orchestrator();

        orchestrator
            .set_instance_option(&replicaset, "db2:3306", "exitStateAction", "abort_server".into())
            .await
            .unwrap();
        assert_eq!(
            fleet.sysvar("db2:3306", SYSVAR_EXIT_STATE_ACTION).as_deref(),
            Some("ABORT_SERVER")
        );

        let err = orchestrator
            .set_instance_option(&replicaset, "db2:3306", "exitStateAction", "RESTART".into())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid value for exitStateAction"));
    }

    #[tokio::test]
    async fn test_auto_rejoin_tries_needs_recent_server() {
        let fleet = two_members().await;
        fleet.set_version("db2:3306", Version::new(8, 0, 15));
        let (_cluster, replicaset) = fleet.replicaset("db1:3306").await;

        let err = fleet
            .orchestrator()
            .set_instance_option(&replicaset, "db2:3306", "autoRejoinTries", InstanceOptionValue::Int(3))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Option 'autoRejoinTries' not supported on target server version: '8.0.15'"
        );
        assert!(fleet.writes("db2:3306", SYSVAR_AUTO_REJOIN_TRIES).is_empty());
    }

    #[tokio::test]
    async fn test_auto_rejoin_tries_warns() {
        let fleet = two_members().await;
        fleet.set_sysvar("db2:3306", "persisted_globals_load", "OFF");
        let (_cluster, replicaset) = fleet.replicaset("db1:3306").await;

        let notices = fleet
            .orchestrator()
            .set_instance_option(&replicaset, "db2:3306", "autoRejoinTries", InstanceOptionValue::Int(3))
            .await
            .unwrap();
        assert!(notices.contains("all retry attempts are exhausted"));
        assert!(notices.contains("'persisted-globals-load' is set to 'OFF'"));
    }

    #[tokio::test]
    async fn test_unknown_option() {
        let fleet = two_members().await;
        let (_cluster, replicaset) = fleet.replicaset("db1:3306").await;

        let err = fleet
            .orchestrator()
            .set_instance_option(&replicaset, "db2:3306", "consistency", "BEFORE".into())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Option 'consistency' not supported.");
    }
}
