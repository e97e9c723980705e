/// Add instance: bootstrap the group on an empty replica-set or join the
/// target to the existing group
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::auto_increment::crosses_threshold;
use super::seeds::{get_cluster_group_seeds, update_group_seeds, SeedsChange, SeedsUpdate};
use super::{release, Orchestrator, Progress};
use crate::core::{validate_label, Cluster, HostRecord, InstanceRecord, Notices, ReplicaSet, TopologyMode, Version};
use crate::error::{GrupoError, GrupoResult};
use crate::fleet::{Flow, MemberVisitor};
use crate::gr::options::{CONSISTENCY, EXIT_STATE_ACTION, EXPEL_TIMEOUT, SYSVAR_CONSISTENCY, SYSVAR_EXPEL_TIMEOUT};
use crate::gr::{
    create_replication_user, enable_recovery_public_key, negotiate_protocol_version,
    resolve_cluster_ssl_mode, resolve_instance_ssl_mode, GroupReplicationOptions,
    ReplicationCredentials, SslMode, SYSVAR_GROUP_NAME, SYSVAR_LOCAL_ADDRESS,
};
use crate::metadata::{insert_instance_with_host, MetadataStore};
use crate::provision::ProvisionRequest;
use crate::session::{InstanceSession, VarQualifier};
use crate::utils::split_endpoint;

#[derive(Debug, Clone, Default)]
pub struct AddInstanceOptions {
    pub gr: GroupReplicationOptions,
    /// Defaults to the instance endpoint
    pub label: Option<String>,
    /// Existing replication account to use instead of creating one
    pub credentials: Option<ReplicationCredentials>,
    pub skip_user_creation: bool,
    /// Bootstrap the group on the target even when members are recorded
    pub force_seed: bool,
    /// Overrides the orchestrator default for the peer fan-out
    pub tolerate_connection_refused: Option<bool>,
}

/// What the target currently belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceType {
    Standalone,
    GroupReplication,
    InnoDBCluster,
}

/// Finds the first non-default consistency and expel timeout in the group
#[derive(Default)]
struct GroupSettingsProbe {
    want_consistency: bool,
    want_expel_timeout: bool,
    consistency: Option<String>,
    expel_timeout: Option<i64>,
}

#[async_trait]
impl MemberVisitor for GroupSettingsProbe {
    async fn visit(
        &mut self,
        _member: &InstanceRecord,
        session: &dyn InstanceSession,
        _notices: &mut Notices,
    ) -> GrupoResult<Flow> {
        let version = session.version().await?;
        if self.want_consistency && self.consistency.is_none() && CONSISTENCY.is_supported(version) {
            self.consistency = session
                .get_sysvar(SYSVAR_CONSISTENCY, VarQualifier::Global)
                .await?
                .filter(|v| !v.eq_ignore_ascii_case("EVENTUAL") && v != "0");
        }
        if self.want_expel_timeout && self.expel_timeout.is_none() && EXPEL_TIMEOUT.is_supported(version) {
            self.expel_timeout = session
                .get_sysvar_int(SYSVAR_EXPEL_TIMEOUT, VarQualifier::Global)
                .await?
                .filter(|v| *v != 0);
        }

        let consistency_done = !self.want_consistency || self.consistency.is_some();
        let expel_done = !self.want_expel_timeout || self.expel_timeout.is_some();
        if consistency_done && expel_done {
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue)
        }
    }
}

impl Orchestrator {
    /// Add `endpoint` to the replica-set. The first instance of an empty
    /// replica-set bootstraps the group.
    pub async fn add_instance(
        &self,
        replicaset: &ReplicaSet,
        endpoint: &str,
        options: AddInstanceOptions,
    ) -> GrupoResult<Notices> {
        let cluster = replicaset.cluster()?;
        split_endpoint(endpoint)?;

        let session = self.connect(endpoint).await?;
        let mut notices = Notices::new();
        let result = self
            .add_with_session(&cluster, replicaset, &session, options, &mut notices)
            .await;
        release(&session).await;
        result.map(|_| notices)
    }

    async fn add_with_session(
        &self,
        cluster: &Arc<Cluster>,
        replicaset: &ReplicaSet,
        session: &Arc<dyn InstanceSession>,
        options: AddInstanceOptions,
        notices: &mut Notices,
    ) -> GrupoResult<()> {
        let metadata = cluster.metadata().clone();
        let rs_id = replicaset.id();
        let endpoint = session.endpoint().to_string();
        let version = session.version().await?;

        let mut gr = options.gr.clone();
        gr.check_option_values(version)?;
        gr.collect_warnings(notices);

        let label = match &options.label {
            Some(label) => {
                validate_label(label)?;
                label.clone()
            }
            None => endpoint.clone(),
        };
        if !metadata.is_instance_label_unique(rs_id, &label).await? {
            return Err(GrupoError::precondition(format!(
                "An instance with label '{}' is already part of this InnoDB cluster",
                label
            )));
        }

        let topology = replicaset.current_topology().await?;
        let seed = options.force_seed || metadata.is_replicaset_empty(rs_id).await?;
        info!(
            "Adding instance '{}' to '{}' as {}",
            endpoint,
            replicaset.name(),
            if seed { "seed" } else { "joining member" }
        );

        let peer = if seed {
            None
        } else {
            Some(cluster.group_session().clone())
        };
        self.validate_server_uuid(metadata.as_ref(), rs_id, session.as_ref(), peer.as_deref())
            .await?;
        let kind = self.classify_target(metadata.as_ref(), replicaset, session.as_ref()).await?;
        debug!("Instance '{}' classified as {:?}", endpoint, kind);

        let ssl_mode = match &peer {
            None => resolve_cluster_ssl_mode(session.as_ref(), gr.ssl_mode).await?,
            Some(peer) => resolve_instance_ssl_mode(session.as_ref(), peer.as_ref(), gr.ssl_mode).await?,
        };
        gr.ssl_mode = Some(ssl_mode);

        if gr.exit_state_action.is_none() && EXIT_STATE_ACTION.is_supported(version) {
            gr.exit_state_action = Some("READ_ONLY".to_string());
        }
        if ssl_mode == SslMode::Disabled {
            enable_recovery_public_key(session.as_ref()).await?;
        }

        let count = metadata.get_replicaset_count(rs_id).await?;

        let (credentials, skip_user_creation) = match (&options.credentials, options.skip_user_creation) {
            (Some(credentials), skip) => (Some(credentials.clone()), skip),
            (None, true) => (None, true),
            (None, false) => {
                let owner: &dyn InstanceSession = match &peer {
                    Some(peer) => peer.as_ref(),
                    None => session.as_ref(),
                };
                let credentials = create_replication_user(owner, gr.ip_allowlist.as_deref()).await?;
                (Some(credentials), true)
            }
        };

        if let Some(peer) = &peer {
            if gr.group_seeds.is_none() {
                let seeds = get_cluster_group_seeds(
                    metadata.as_ref(),
                    self.connector().as_ref(),
                    rs_id,
                    Some(&endpoint),
                )
                .await?;
                if !seeds.is_empty() {
                    gr.group_seeds = Some(seeds);
                }
            }
            self.inherit_group_settings(cluster, rs_id, &endpoint, version, &mut gr, notices, options.tolerate_connection_refused)
                .await?;
            negotiate_protocol_version(peer.as_ref(), version, notices).await?;
        }

        gr.log_values();
        let outcome = match &peer {
            None => {
                if !options.force_seed && !metadata.is_replicaset_empty(rs_id).await? {
                    return Err(GrupoError::precondition(format!(
                        "The ReplicaSet '{}' was seeded by another instance while '{}' was being \
                         prepared as its seed. Retry the operation to join the existing group.",
                        replicaset.name(),
                        endpoint
                    )));
                }
                let request = ProvisionRequest::start(
                    endpoint.clone(),
                    topology == TopologyMode::MultiPrimary,
                    gr.clone(),
                )
                .with_credentials(credentials)
                .skip_user_creation(skip_user_creation)
                .known_member_count(Some(count));
                self.provisioner.start_replicaset(&request).await?
            }
            Some(peer) => {
                let request = ProvisionRequest::join(endpoint.clone(), peer.endpoint().to_string(), gr.clone())
                    .with_credentials(credentials)
                    .skip_user_creation(skip_user_creation)
                    .known_member_count(Some(count));
                self.provisioner.join_replicaset(&request).await?
            }
        };
        outcome.into_result(notices)?;

        let mut progress = Progress::new();
        progress.done(format!("'{}' joined the group", endpoint));

        if seed {
            self.record_group_name(metadata.as_ref(), rs_id, session.as_ref())
                .await
                .map_err(|e| progress.fail("record the group name", e))?;
        }
        self.record_instance(metadata.as_ref(), rs_id, session.as_ref(), &label)
            .await
            .map_err(|e| progress.fail("record the instance in the metadata", e))?;
        progress.done("instance recorded in the metadata");

        let own_seeds = gr.group_seeds.clone().unwrap_or_default();
        update_group_seeds(
            session.as_ref(),
            &SeedsChange::Override(own_seeds),
            self.settings().naming_style,
            notices,
        )
        .await
        .map_err(|e| progress.fail("set the group seeds of the instance", e))?;
        progress.done("group seeds of the instance set");

        let local_address = session
            .get_sysvar(SYSVAR_LOCAL_ADDRESS, VarQualifier::Global)
            .await
            .map_err(|e| progress.fail("read the local address", e))?
            .unwrap_or_default();
        if !local_address.is_empty() {
            let mut visitor = SeedsUpdate::new(SeedsChange::Add(local_address), self.settings().naming_style);
            self.fleet(cluster, rs_id, options.tolerate_connection_refused)
                .active()
                .skip(endpoint.clone())
                .run(&mut visitor, notices)
                .await
                .map_err(|e| progress.fail("add the instance to the group seeds of the members", e))?;
            progress.done("group seeds of the members updated");
        }

        if crosses_threshold(topology, count + 1) {
            self.update_auto_increment(cluster, replicaset, notices)
                .await
                .map_err(|e| progress.fail("update the auto-increment settings", e))?;
        }

        info!("The instance '{}' was successfully added to the cluster.", endpoint);
        Ok(())
    }

    /// No active member may share the target's server UUID
    async fn validate_server_uuid(
        &self,
        metadata: &dyn MetadataStore,
        rs_id: u64,
        session: &dyn InstanceSession,
        group: Option<&dyn InstanceSession>,
    ) -> GrupoResult<()> {
        let uuid = session.server_uuid().await?;
        let endpoint = session.endpoint();

        for member in metadata.get_replicaset_active_instances(rs_id).await? {
            if member.server_uuid == uuid && member.endpoint != endpoint {
                return Err(GrupoError::DuplicateServerUuid {
                    uuid,
                    member: member.endpoint,
                });
            }
        }
        if let Some(group) = group {
            for member in group.group_members().await? {
                if member.uuid == uuid && member.state.is_active() && member.endpoint() != endpoint {
                    return Err(GrupoError::DuplicateServerUuid {
                        uuid,
                        member: member.endpoint(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Reject targets that already belong to this or another cluster or group
    async fn classify_target(
        &self,
        metadata: &dyn MetadataStore,
        replicaset: &ReplicaSet,
        session: &dyn InstanceSession,
    ) -> GrupoResult<InstanceType> {
        let endpoint = session.endpoint();

        if let Some(record) = metadata.get_instance(endpoint).await? {
            return Err(GrupoError::precondition(if record.replicaset_id == replicaset.id() {
                format!("The instance '{}' is already part of this InnoDB cluster", endpoint)
            } else {
                format!("The instance '{}' is already part of another InnoDB cluster", endpoint)
            }));
        }

        if session.is_running_auto_rejoin().await? {
            return Err(GrupoError::invalid_state(format!(
                "The instance '{}' is currently attempting to rejoin a group through the \
                 auto-rejoin process. Wait for it to finish or stop Group Replication on the \
                 instance before adding it.",
                endpoint
            )));
        }

        let state = session.member_state().await?;
        if state.is_active() {
            let group_name = session
                .get_sysvar(SYSVAR_GROUP_NAME, VarQualifier::Global)
                .await?
                .unwrap_or_default();
            if Some(group_name) == replicaset.current_group_name().await? {
                return Err(GrupoError::inconsistent(format!(
                    "Metadata inconsistent: The instance '{}' is already part of the replicaset \
                     but is not registered in the metadata. Please use {} to update the metadata.",
                    endpoint,
                    self.cluster_command("rescan")
                )));
            }
            return Err(GrupoError::precondition(format!(
                "The instance '{}' is already part of another Replication Group",
                endpoint
            )));
        }

        Ok(InstanceType::Standalone)
    }

    /// Take the group's consistency and expel timeout when the operator did not set them
    #[allow(clippy::too_many_arguments)]
    async fn inherit_group_settings(
        &self,
        cluster: &Cluster,
        rs_id: u64,
        endpoint: &str,
        version: Version,
        gr: &mut GroupReplicationOptions,
        notices: &mut Notices,
        tolerate: Option<bool>,
    ) -> GrupoResult<()> {
        let mut probe = GroupSettingsProbe {
            want_consistency: gr.consistency.is_none(),
            want_expel_timeout: gr.expel_timeout.is_none(),
            ..Default::default()
        };
        if !probe.want_consistency && !probe.want_expel_timeout {
            return Ok(());
        }
        self.fleet(cluster, rs_id, tolerate)
            .active()
            .skip(endpoint)
            .run(&mut probe, notices)
            .await?;

        if let Some(consistency) = probe.consistency {
            if CONSISTENCY.is_supported(version) {
                info!("Using the group consistency level '{}' on '{}'", consistency, endpoint);
                gr.consistency = Some(consistency);
            } else {
                notices.warn(format!(
                    "The cluster uses the consistency level '{}' but the instance '{}' runs \
                     MySQL {} which does not support it (8.0.14 or newer required). The \
                     instance will use its default consistency level.",
                    consistency, endpoint, version
                ));
            }
        }
        if let Some(timeout) = probe.expel_timeout {
            if EXPEL_TIMEOUT.is_supported(version) {
                info!("Using the group member expel timeout {} on '{}'", timeout, endpoint);
                gr.expel_timeout = Some(timeout);
            } else {
                notices.warn(format!(
                    "The cluster uses a member expel timeout of {} seconds but the instance \
                     '{}' runs MySQL {} which does not support it (8.0.13 or newer required).",
                    timeout, endpoint, version
                ));
            }
        }
        Ok(())
    }

    async fn record_group_name(
        &self,
        metadata: &dyn MetadataStore,
        rs_id: u64,
        session: &dyn InstanceSession,
    ) -> GrupoResult<()> {
        let group_name = session
            .get_sysvar(SYSVAR_GROUP_NAME, VarQualifier::Global)
            .await?
            .unwrap_or_default();
        if group_name.is_empty() {
            return Err(GrupoError::internal(format!(
                "'{}' reports no group name after starting Group Replication",
                session.endpoint()
            )));
        }
        metadata.set_replicaset_group_name(rs_id, &group_name).await
    }

    async fn record_instance(
        &self,
        metadata: &dyn MetadataStore,
        rs_id: u64,
        session: &dyn InstanceSession,
        label: &str,
    ) -> GrupoResult<()> {
        let endpoint = session.endpoint();
        if metadata.is_instance_on_replicaset(rs_id, endpoint).await? {
            debug!("'{}' is already recorded in the metadata", endpoint);
            return Ok(());
        }

        let host = session.report_host().await?;
        let mut record = InstanceRecord::new(endpoint.to_string(), session.server_uuid().await?, rs_id);
        record.label = label.to_string();
        record.grendpoint = session
            .get_sysvar(SYSVAR_LOCAL_ADDRESS, VarQualifier::Global)
            .await?
            .filter(|a| !a.is_empty());
        record.xendpoint = session
            .get_sysvar("mysqlx_port", VarQualifier::Global)
            .await?
            .filter(|p| !p.is_empty() && p != "0")
            .map(|port| format!("{}:{}", host, port));

        let host = HostRecord {
            host_name: host,
            ip_address: None,
            location: None,
        };
        insert_instance_with_host(metadata, &host, &record).await?;
        Ok(())
    }
}
