/// Cluster and replica-set handles
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::core::TopologyMode;
use crate::error::{GrupoError, GrupoResult};
use crate::metadata::{MetadataStore, ReplicaSetRecord};
use crate::session::InstanceSession;

/// One managed deployment: the metadata store plus a session to the live group
pub struct Cluster {
    id: u64,
    name: String,
    metadata: Arc<dyn MetadataStore>,
    group_session: Arc<dyn InstanceSession>,
    valid: AtomicBool,
}

impl Cluster {
    pub fn new<S: Into<String>>(
        id: u64,
        name: S,
        metadata: Arc<dyn MetadataStore>,
        group_session: Arc<dyn InstanceSession>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            metadata,
            group_session,
            valid: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn group_session(&self) -> &Arc<dyn InstanceSession> {
        &self.group_session
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark the cluster unusable; every handle to it becomes stale
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Tear down the group session and invalidate the cluster
    pub async fn disconnect(&self) -> GrupoResult<()> {
        self.invalidate();
        self.group_session.close().await
    }

    pub fn handle(self: &Arc<Self>) -> ClusterHandle {
        ClusterHandle {
            id: self.id,
            cluster: Arc::downgrade(self),
        }
    }
}

/// Non-owning reference to a `Cluster`, checked on every use
#[derive(Clone)]
pub struct ClusterHandle {
    id: u64,
    cluster: Weak<Cluster>,
}

impl ClusterHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The cluster, or `StaleCluster` once it was dropped or invalidated
    pub fn get(&self) -> GrupoResult<Arc<Cluster>> {
        match self.cluster.upgrade() {
            Some(cluster) if cluster.is_valid() => Ok(cluster),
            _ => Err(GrupoError::StaleCluster),
        }
    }
}

/// The default replica-set of a cluster
#[derive(Clone)]
pub struct ReplicaSet {
    record: ReplicaSetRecord,
    cluster: ClusterHandle,
}

impl ReplicaSet {
    /// Load the replica-set from metadata and check it against the live group
    pub async fn load(cluster: &Arc<Cluster>, id: u64) -> GrupoResult<Self> {
        let record = cluster.metadata().replicaset(id).await?;
        if record.cluster_id != cluster.id() {
            return Err(GrupoError::metadata(format!(
                "ReplicaSet {} does not belong to cluster '{}'",
                id,
                cluster.name()
            )));
        }
        let replicaset = Self {
            record,
            cluster: cluster.handle(),
        };
        replicaset.sanity_check().await?;
        Ok(replicaset)
    }

    pub fn id(&self) -> u64 {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn topology(&self) -> TopologyMode {
        self.record.topology
    }

    pub fn group_name(&self) -> Option<&str> {
        self.record.group_name.as_deref()
    }

    pub fn record(&self) -> &ReplicaSetRecord {
        &self.record
    }

    pub fn cluster(&self) -> GrupoResult<Arc<Cluster>> {
        self.cluster.get()
    }

    /// Group name as recorded now; seeding the group records it after the
    /// replica-set was loaded
    pub async fn current_group_name(&self) -> GrupoResult<Option<String>> {
        let cluster = self.cluster()?;
        let group_name = cluster
            .metadata()
            .get_replicaset_group_name(self.record.id)
            .await?;
        Ok(group_name.filter(|name| !name.is_empty()))
    }

    pub async fn current_topology(&self) -> GrupoResult<TopologyMode> {
        let cluster = self.cluster()?;
        cluster
            .metadata()
            .get_replicaset_topology_mode(self.record.id)
            .await
    }

    /// Refresh the cached record from metadata
    pub async fn reload(&mut self) -> GrupoResult<()> {
        let cluster = self.cluster()?;
        self.record = cluster.metadata().replicaset(self.record.id).await?;
        Ok(())
    }

    /// Checks run before every operation; a replica-set without members has
    /// no group to compare against
    pub async fn sanity_check(&self) -> GrupoResult<()> {
        let cluster = self.cluster()?;
        if cluster.metadata().is_replicaset_empty(self.record.id).await? {
            return Ok(());
        }
        self.verify_topology_type().await
    }

    /// The recorded topology must match the group's primary election mode
    pub async fn verify_topology_type(&self) -> GrupoResult<()> {
        let cluster = self.cluster()?;
        let primary_uuid = cluster.group_session().primary_member_uuid().await?;
        let observed = TopologyMode::from_primary_uuid(&primary_uuid);
        debug!(
            "ReplicaSet '{}' recorded as {}, group reports {}",
            self.name(),
            self.topology(),
            observed
        );

        if observed != self.topology() {
            return Err(GrupoError::inconsistent(format!(
                "The InnoDB Cluster topology type ({}) does not match the current Group \
                 Replication configuration ({}). Please use <cluster>.rescan() or change the \
                 Group Replication configuration accordingly.",
                self.topology(),
                observed
            )));
        }
        Ok(())
    }
}
