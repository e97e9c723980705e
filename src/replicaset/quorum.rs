/// Quorum recovery: reform the group around a surviving partition
use tracing::{debug, info, warn};

use super::{release, validate_group_name, Orchestrator};
use crate::core::{MemberState, Notices, ReplicaSet};
use crate::error::{GrupoError, GrupoResult};
use crate::gr::{SYSVAR_FORCE_MEMBERS, SYSVAR_LOCAL_ADDRESS};
use crate::metadata::require_instance;
use crate::session::{InstanceSession, SysvarValue, VarQualifier};

impl Orchestrator {
    /// Force the group membership to the members reachable from `partition`.
    ///
    /// Refused while the group still has quorum. The forced value is cleared
    /// right after it is set; a failure in between is reported as a partial
    /// completion.
    pub async fn force_quorum_using_partition_of(
        &self,
        replicaset: &ReplicaSet,
        partition: &str,
    ) -> GrupoResult<Notices> {
        let cluster = replicaset.cluster()?;
        require_instance(cluster.metadata().as_ref(), replicaset.record(), partition).await?;

        let session = self.connect(partition).await?;
        let mut notices = Notices::new();
        let result = self
            .force_quorum_with_session(replicaset, session.as_ref(), &mut notices)
            .await;
        release(&session).await;
        result.map(|_| notices)
    }

    async fn force_quorum_with_session(
        &self,
        replicaset: &ReplicaSet,
        session: &dyn InstanceSession,
        notices: &mut Notices,
    ) -> GrupoResult<()> {
        let cluster = replicaset.cluster()?;
        let partition = session.endpoint();

        validate_group_name(replicaset, session).await?;

        let state = session.member_state().await?;
        if state != MemberState::Online {
            return Err(GrupoError::invalid_state(format!(
                "The instance '{}' cannot be used to restore the cluster as it is on a {} \
                 state, and should be ONLINE",
                partition, state
            )));
        }

        if session.has_quorum().await? {
            return Err(GrupoError::invalid_state(format!(
                "Cannot perform operation on an healthy cluster because it can only be used to \
                 restore a cluster from quorum loss. The cluster has quorum according to \
                 instance '{}'.",
                partition
            )));
        }

        let online = cluster
            .metadata()
            .get_replicaset_online_instances(replicaset.id())
            .await?;
        let mut addresses = Vec::new();
        for instance in &online {
            let member = match self.connect(&instance.endpoint).await {
                Ok(member) => member,
                Err(e) => {
                    warn!("Skipping '{}' while collecting the partition: {}", instance.endpoint, e);
                    continue;
                }
            };
            let address = member.get_sysvar(SYSVAR_LOCAL_ADDRESS, VarQualifier::Global).await;
            release(&member).await;
            match address {
                Ok(Some(address)) if !address.is_empty() => addresses.push(address),
                Ok(_) => debug!("'{}' has no Group Replication local address", instance.endpoint),
                Err(e) => warn!("Unable to read the local address of '{}': {}", instance.endpoint, e),
            }
        }
        if addresses.is_empty() {
            return Err(GrupoError::invalid_state(format!(
                "No reachable ONLINE member of the partition of '{}' reports a Group \
                 Replication local address",
                partition
            )));
        }

        let members = addresses.join(",");
        info!("Restoring the cluster using the partition of '{}': {}", partition, members);
        session
            .set_sysvar(SYSVAR_FORCE_MEMBERS, &SysvarValue::from(members.as_str()), VarQualifier::Global)
            .await?;

        if let Err(e) = session
            .set_sysvar(SYSVAR_FORCE_MEMBERS, &SysvarValue::from(""), VarQualifier::Global)
            .await
        {
            notices.warn(format!(
                "'{}' still holds {} = '{}'. Clear it before restarting or rejoining the instance.",
                partition, SYSVAR_FORCE_MEMBERS, members
            ));
            return Err(GrupoError::partial(
                format!("clear {}", SYSVAR_FORCE_MEMBERS),
                vec![format!("{} set to '{}'", SYSVAR_FORCE_MEMBERS, members)],
                e,
            ));
        }

        info!("The cluster was restored using the partition of '{}'", partition);
        Ok(())
    }
}
