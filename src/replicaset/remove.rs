/// Remove instance and the leave/cleanup steps shared with rejoin
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use super::auto_increment::crosses_threshold;
use super::seeds::{SeedsChange, SeedsUpdate};
use super::{release, Orchestrator, Progress};
use crate::core::{MemberState, Notices, ReplicaSet, Version};
use crate::error::{GrupoError, GrupoResult};
use crate::gr::{
    persist_sysvars, Persistence, REPLICATION_USER_PATTERN, SYSVAR_BOOTSTRAP_GROUP,
    SYSVAR_FORCE_MEMBERS, SYSVAR_GROUP_SEEDS, SYSVAR_LOCAL_ADDRESS, SYSVAR_START_ON_BOOT,
};
use crate::metadata::require_instance;
use crate::session::{InstanceSession, SysvarValue, VarQualifier};

lazy_static! {
    static ref REPLICATION_USER_RE: Regex = Regex::new(REPLICATION_USER_PATTERN).unwrap();
}

/// Variables reset to their defaults when an instance leaves the group
const LEAVE_RESET_SYSVARS: [&str; 4] = [
    SYSVAR_BOOTSTRAP_GROUP,
    SYSVAR_FORCE_MEMBERS,
    SYSVAR_GROUP_SEEDS,
    SYSVAR_LOCAL_ADDRESS,
];

#[derive(Debug, Clone)]
pub struct RemoveInstanceOptions {
    /// Remove an unreachable instance from the metadata only
    pub force: bool,
    /// Also drop, cluster-wide, the account the instance replicated with
    pub drop_recovery_user: bool,
    pub tolerate_connection_refused: Option<bool>,
}

impl Default for RemoveInstanceOptions {
    fn default() -> Self {
        Self {
            force: false,
            drop_recovery_user: true,
            tolerate_connection_refused: None,
        }
    }
}

impl Orchestrator {
    /// Remove `endpoint` from the replica-set metadata and from the group
    pub async fn remove_instance(
        &self,
        replicaset: &ReplicaSet,
        endpoint: &str,
        options: RemoveInstanceOptions,
    ) -> GrupoResult<Notices> {
        let cluster = replicaset.cluster()?;
        let metadata = cluster.metadata().clone();
        let rs_id = replicaset.id();
        let record = require_instance(metadata.as_ref(), replicaset.record(), endpoint).await?;

        let topology = replicaset.current_topology().await?;
        let count = metadata.get_replicaset_count(rs_id).await?;
        if count == 1 {
            return Err(GrupoError::precondition(format!(
                "The instance '{}' cannot be removed because it is the only member of the \
                 Cluster. Please use {} instead to remove the last instance and dissolve the \
                 Cluster.",
                endpoint,
                self.cluster_command("dissolve")
            )));
        }

        let mut notices = Notices::new();
        let session = match self.connect(endpoint).await {
            Ok(session) => Some(session),
            Err(e) if options.force => {
                warn!("Removing unreachable instance '{}': {}", endpoint, e);
                notices.warn(format!(
                    "The instance '{}' is not reachable and it will only be removed from the \
                     metadata. Please take any necessary actions to make sure that the instance \
                     will not rejoin the cluster if brought back online.",
                    endpoint
                ));
                None
            }
            Err(e) => {
                return Err(GrupoError::precondition(format!(
                    "The instance '{}' is not reachable and cannot be safely removed from the \
                     cluster ({}). To safely remove the instance from the Cluster, make sure \
                     the instance is back ONLINE and try again. If you are sure the instance is \
                     permanently unable to rejoin the Cluster and no longer connectable, use \
                     the 'force' option to remove it from the metadata.",
                    endpoint, e
                )))
            }
        };

        let local_address = match &session {
            Some(session) => session
                .get_sysvar(SYSVAR_LOCAL_ADDRESS, VarQualifier::Global)
                .await
                .unwrap_or_else(|e| {
                    warn!("Unable to read the local address of '{}': {}", endpoint, e);
                    None
                })
                .filter(|a| !a.is_empty())
                .or_else(|| record.grendpoint.clone()),
            None => record.grendpoint.clone(),
        };

        let result: GrupoResult<()> = async {
            metadata.remove_instance(endpoint).await?;
            info!("Instance '{}' removed from the metadata of '{}'", endpoint, replicaset.name());

            let mut progress = Progress::new();
            progress.done("instance removed from the metadata");

            if let Some(session) = &session {
                self.remove_replication_users(
                    session.as_ref(),
                    cluster.group_session().as_ref(),
                    options.drop_recovery_user,
                    &mut notices,
                )
                .await
                .map_err(|e| progress.fail("drop the replication accounts of the instance", e))?;
                progress.done("replication accounts dropped");

                self.leave_replicaset(session.as_ref(), &mut notices)
                    .await
                    .map_err(|e| progress.fail("stop Group Replication on the instance", e))?;
                progress.done("instance left the group");
            }

            match &local_address {
                Some(address) => {
                    let mut visitor =
                        SeedsUpdate::new(SeedsChange::Remove(address.clone()), self.settings().naming_style);
                    self.fleet(&cluster, rs_id, options.tolerate_connection_refused)
                        .active()
                        .skip(endpoint)
                        .run(&mut visitor, &mut notices)
                        .await
                        .map_err(|e| progress.fail("remove the instance from the group seeds of the members", e))?;
                    progress.done("group seeds of the members updated");
                }
                None => debug!("No local address known for '{}', group seeds left untouched", endpoint),
            }

            if crosses_threshold(topology, count) {
                self.update_auto_increment(&cluster, replicaset, &mut notices)
                    .await
                    .map_err(|e| progress.fail("update the auto-increment settings", e))?;
            }
            Ok(())
        }
        .await;

        if let Some(session) = &session {
            release(session).await;
        }
        result.map(|_| {
            info!("The instance '{}' was successfully removed from the cluster.", endpoint);
            notices
        })
    }

    /// Drop the managed replication accounts local to `session` without
    /// replicating the drop, then drop the instance's recovery account
    /// through the group
    pub(crate) async fn remove_replication_users(
        &self,
        session: &dyn InstanceSession,
        group: &dyn InstanceSession,
        drop_recovery_user: bool,
        notices: &mut Notices,
    ) -> GrupoResult<()> {
        let endpoint = session.endpoint();
        let recovery_user = if drop_recovery_user {
            match session.recovery_user().await {
                Ok(user) => user,
                Err(e) => {
                    debug!("Unable to read the recovery user of '{}': {}", endpoint, e);
                    None
                }
            }
        } else {
            None
        };

        let super_read_only = session
            .get_sysvar_bool("super_read_only", VarQualifier::Global)
            .await?
            .unwrap_or(false);
        if super_read_only {
            debug!("Disabling super_read_only on '{}'", endpoint);
            session
                .set_sysvar("super_read_only", &SysvarValue::Bool(false), VarQualifier::Global)
                .await?;
        }

        let dropped = drop_local_replication_users(session).await;

        if super_read_only {
            let restored = session
                .set_sysvar("super_read_only", &SysvarValue::Bool(true), VarQualifier::Global)
                .await;
            if let Err(e) = restored {
                if dropped.is_ok() {
                    return Err(e);
                }
                warn!("Unable to restore super_read_only on '{}': {}", endpoint, e);
            }
        }
        let dropped = dropped?;
        debug!("Dropped {} replication accounts on '{}'", dropped.len(), endpoint);

        if drop_recovery_user {
            match recovery_user {
                Some(user) if REPLICATION_USER_RE.is_match(&user) => {
                    info!("Dropping recovery account '{}' through '{}'", user, group.endpoint());
                    group.drop_user_accounts(&user).await?;
                }
                Some(user) => notices.warn(format!(
                    "The recovery user name '{}' of instance '{}' does not match the expected \
                     format for users created automatically by InnoDB Cluster. Skipping its \
                     removal.",
                    user, endpoint
                )),
                None => notices.warn(format!(
                    "Unable to determine the recovery user of instance '{}'. The replication \
                     account it used is left in place; remove it manually if it was created \
                     by InnoDB Cluster.",
                    endpoint
                )),
            }
        }
        Ok(())
    }

    /// Stop Group Replication and keep the instance from rejoining on restart
    pub(crate) async fn leave_replicaset(
        &self,
        session: &dyn InstanceSession,
        notices: &mut Notices,
    ) -> GrupoResult<()> {
        let endpoint = session.endpoint();
        let state = session.member_state().await?;
        if matches!(state, MemberState::Offline | MemberState::Missing) {
            notices.note(format!(
                "The instance '{}' is {}, Group Replication stop skipped.",
                endpoint, state
            ));
        } else {
            info!("Stopping Group Replication on '{}'", endpoint);
            session.stop_group_replication().await?;
        }

        let version = session.version().await?;
        if version < Version::SET_PERSIST {
            notices.warn(format!(
                "On instance '{}' configuration cannot be persisted since MySQL version {} does \
                 not support the SET PERSIST command (MySQL version >= 8.0.11 required). Please \
                 set the 'group_replication_start_on_boot' variable to 'OFF' in the server \
                 configuration file, otherwise it might rejoin the cluster upon restart.",
                endpoint, version
            ));
            return Ok(());
        }

        let persistence = persist_sysvars(session, &[(SYSVAR_START_ON_BOOT, SysvarValue::Bool(false))]).await?;
        for name in LEAVE_RESET_SYSVARS {
            session.set_sysvar_default(name, VarQualifier::Persist).await?;
        }
        if persistence == Persistence::NotLoadedOnBoot {
            notices.warn(format!(
                "On instance '{}' the persisted cluster configuration will not be loaded upon \
                 reboot since 'persisted-globals-load' is set to 'OFF'. Please set \
                 'persisted-globals-load' to 'ON' on the configuration file or set the \
                 'group_replication_start_on_boot' variable to 'OFF' in the server \
                 configuration file, otherwise it might rejoin the cluster upon restart.",
                endpoint
            ));
        }
        Ok(())
    }
}

/// Drop every managed replication account with binary logging disabled for the session
async fn drop_local_replication_users(session: &dyn InstanceSession) -> GrupoResult<Vec<String>> {
    session
        .set_sysvar("sql_log_bin", &SysvarValue::Bool(false), VarQualifier::Session)
        .await?;
    let dropped = session.drop_users_matching(REPLICATION_USER_PATTERN).await;
    let restored = session
        .set_sysvar("sql_log_bin", &SysvarValue::Bool(true), VarQualifier::Session)
        .await;
    let dropped = dropped?;
    restored?;
    Ok(dropped)
}
