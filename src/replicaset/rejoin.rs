/// Rejoin a recorded instance that dropped out of the group
use std::sync::Arc;
use tracing::{debug, info};

use super::seeds::get_cluster_group_seeds;
use super::{release, validate_group_name, Orchestrator};
use crate::core::{Notices, ReplicaSet};
use crate::error::{GrupoError, GrupoResult};
use crate::gr::{
    create_replication_user, enable_recovery_public_key, negotiate_protocol_version,
    resolve_instance_ssl_mode, GroupReplicationOptions, SslMode, GR_PLUGIN,
};
use crate::metadata::require_instance;
use crate::provision::ProvisionRequest;
use crate::session::InstanceSession;

impl Orchestrator {
    /// Bring `endpoint` back into the group it is recorded in. Options left
    /// unset keep the values currently configured on the instance; the group
    /// seeds always come from the current members.
    pub async fn rejoin_instance(
        &self,
        replicaset: &ReplicaSet,
        endpoint: &str,
        options: GroupReplicationOptions,
    ) -> GrupoResult<Notices> {
        let cluster = replicaset.cluster()?;
        require_instance(cluster.metadata().as_ref(), replicaset.record(), endpoint).await?;

        let session = self.connect(endpoint).await?;
        let mut notices = Notices::new();
        let result = self
            .rejoin_with_session(replicaset, &session, options, &mut notices)
            .await;
        release(&session).await;
        result.map(|_| notices)
    }

    async fn rejoin_with_session(
        &self,
        replicaset: &ReplicaSet,
        session: &Arc<dyn InstanceSession>,
        mut gr: GroupReplicationOptions,
        notices: &mut Notices,
    ) -> GrupoResult<()> {
        let cluster = replicaset.cluster()?;
        let metadata = cluster.metadata().clone();
        let peer = cluster.group_session().clone();
        let endpoint = session.endpoint().to_string();
        let version = session.version().await?;

        gr.check_option_values(version)?;
        gr.collect_warnings(notices);

        validate_group_name(replicaset, session.as_ref()).await?;

        let plugin = peer.plugin_status(GR_PLUGIN).await?;
        if plugin.as_deref() != Some("ACTIVE") {
            return Err(GrupoError::precondition(
                "Cannot rejoin instance. The seed instance doesn't have group-replication active.",
            ));
        }

        let recorded_active = metadata
            .get_replicaset_active_instances(replicaset.id())
            .await?
            .into_iter()
            .find(|i| i.endpoint == endpoint)
            .map(|i| i.state);
        let live = session.member_state().await?;
        if let Some(state) = recorded_active.or_else(|| live.is_active().then_some(live)) {
            return Err(GrupoError::invalid_state(format!(
                "Cannot rejoin instance '{}' to the ReplicaSet '{}' since it is an active ({}) \
                 member of the ReplicaSet.",
                endpoint,
                replicaset.name(),
                state
            )));
        }

        if session.is_running_auto_rejoin().await? {
            notices.note(format!(
                "The instance '{}' is running auto-rejoin process, however the rejoinInstance \
                 has precedence and will override that process.",
                endpoint
            ));
        }

        let seeds = get_cluster_group_seeds(
            metadata.as_ref(),
            self.connector().as_ref(),
            replicaset.id(),
            Some(&endpoint),
        )
        .await?;
        if let Some(given) = gr.group_seeds.as_deref().filter(|given| *given != seeds) {
            notices.warn(format!(
                "The group seeds '{}' given for '{}' are replaced by the addresses of the \
                 current members: '{}'.",
                given, endpoint, seeds
            ));
        }
        debug!("Group seeds for rejoining '{}': '{}'", endpoint, seeds);
        gr.group_seeds = Some(seeds);

        let ssl_mode = resolve_instance_ssl_mode(session.as_ref(), peer.as_ref(), gr.ssl_mode).await?;
        gr.ssl_mode = Some(ssl_mode);
        if ssl_mode == SslMode::Disabled {
            enable_recovery_public_key(session.as_ref()).await?;
        }

        info!("Stopping Group Replication on '{}' before rejoining", endpoint);
        session.stop_group_replication().await?;

        // a new allow-list means new account host patterns
        let credentials = match gr.ip_allowlist.as_deref() {
            Some(allowlist) => {
                self.remove_replication_users(session.as_ref(), peer.as_ref(), true, notices)
                    .await?;
                Some(create_replication_user(peer.as_ref(), Some(allowlist)).await?)
            }
            None => None,
        };

        negotiate_protocol_version(peer.as_ref(), version, notices).await?;
        gr.read_option_values(session.as_ref()).await?;
        gr.log_values();

        let request = ProvisionRequest::join(endpoint.clone(), peer.endpoint().to_string(), gr)
            .with_credentials(credentials)
            .skip_user_creation(true);
        self.provisioner.join_replicaset(&request).await?.into_result(notices)?;

        info!("The instance '{}' was successfully rejoined on the cluster.", endpoint);
        Ok(())
    }
}
