/// Metadata store: the durable record of replica-sets and their instances
///
/// The orchestrator only relies on the operations of `MetadataStore`. Two
/// stores are provided: `MySqlMetadata` over the InnoDB cluster metadata
/// schema and `MemoryMetadata`, an in-process store.
pub mod memory;
pub mod mysql;

pub use memory::{MemoryMetadata, StateProbe};
pub use mysql::MySqlMetadata;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{HostRecord, InstanceRecord, MemberState, TopologyMode};
use crate::error::{GrupoError, GrupoResult};

/// A replica-set row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetRecord {
    pub id: u64,
    pub cluster_id: u64,
    pub name: String,
    pub topology: TopologyMode,
    /// `group_replication_group_name` all members must share
    pub group_name: Option<String>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn replicaset(&self, id: u64) -> GrupoResult<ReplicaSetRecord>;

    async fn is_replicaset_empty(&self, id: u64) -> GrupoResult<bool>;

    async fn is_instance_on_replicaset(&self, id: u64, address: &str) -> GrupoResult<bool>;

    async fn is_instance_label_unique(&self, id: u64, label: &str) -> GrupoResult<bool>;

    /// Insert a host row, reusing an existing row with the same name
    async fn insert_host(&self, host: &HostRecord) -> GrupoResult<u64>;

    async fn insert_instance(&self, record: &InstanceRecord) -> GrupoResult<u64>;

    async fn remove_instance(&self, address: &str) -> GrupoResult<()>;

    async fn get_instance(&self, address: &str) -> GrupoResult<Option<InstanceRecord>>;

    async fn get_instance_by_uuid(&self, uuid: &str) -> GrupoResult<Option<InstanceRecord>>;

    /// Instances of the replica-set in metadata order with their live state,
    /// optionally restricted to the given states
    async fn get_replicaset_instances(
        &self,
        id: u64,
        states: Option<&[MemberState]>,
    ) -> GrupoResult<Vec<InstanceRecord>>;

    async fn get_replicaset_count(&self, id: u64) -> GrupoResult<u64>;

    async fn set_replicaset_group_name(&self, id: u64, group_name: &str) -> GrupoResult<()>;

    async fn set_instance_label(&self, address: &str, label: &str) -> GrupoResult<()>;

    async fn begin(&self) -> GrupoResult<()>;

    async fn commit(&self) -> GrupoResult<()>;

    async fn rollback(&self) -> GrupoResult<()>;

    async fn get_replicaset_online_instances(&self, id: u64) -> GrupoResult<Vec<InstanceRecord>> {
        self.get_replicaset_instances(id, Some(&[MemberState::Online][..]))
            .await
    }

    async fn get_replicaset_active_instances(&self, id: u64) -> GrupoResult<Vec<InstanceRecord>> {
        self.get_replicaset_instances(id, Some(&MemberState::ACTIVE[..]))
            .await
    }

    async fn get_replicaset_topology_mode(&self, id: u64) -> GrupoResult<TopologyMode> {
        Ok(self.replicaset(id).await?.topology)
    }

    async fn get_replicaset_group_name(&self, id: u64) -> GrupoResult<Option<String>> {
        Ok(self.replicaset(id).await?.group_name)
    }
}

/// Insert the host row then the instance row in one metadata transaction
pub async fn insert_instance_with_host(
    store: &dyn MetadataStore,
    host: &HostRecord,
    record: &InstanceRecord,
) -> GrupoResult<u64> {
    store.begin().await?;
    let result = async {
        let host_id = store.insert_host(host).await?;
        let mut record = record.clone();
        record.host_id = host_id;
        store.insert_instance(&record).await
    }
    .await;

    match result {
        Ok(id) => {
            store.commit().await?;
            Ok(id)
        }
        Err(e) => {
            if let Err(rollback_err) = store.rollback().await {
                tracing::error!("Metadata rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

/// Lookup an instance that must be recorded in the replica-set
pub async fn require_instance(
    store: &dyn MetadataStore,
    replicaset: &ReplicaSetRecord,
    address: &str,
) -> GrupoResult<InstanceRecord> {
    match store.get_instance(address).await? {
        Some(record) if record.replicaset_id == replicaset.id => Ok(record),
        _ => Err(GrupoError::precondition(format!(
            "The instance '{}' does not belong to the ReplicaSet: '{}'.",
            address, replicaset.name
        ))),
    }
}
