/// In-process metadata store
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{MetadataStore, ReplicaSetRecord};
use crate::core::{HostRecord, InstanceRecord, MemberState, TopologyMode};
use crate::error::{GrupoError, GrupoResult};

/// Supplies the live member state of a recorded instance
pub trait StateProbe: Send + Sync {
    fn member_state(&self, instance: &InstanceRecord) -> MemberState;
}

/// Probe for a store with no live group attached
struct NoGroup;

impl StateProbe for NoGroup {
    fn member_state(&self, _instance: &InstanceRecord) -> MemberState {
        MemberState::Missing
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    replicasets: BTreeMap<u64, ReplicaSetRecord>,
    hosts: BTreeMap<u64, HostRecord>,
    instances: BTreeMap<u64, InstanceRecord>,
    next_host_id: u64,
    next_instance_id: u64,
}

pub struct MemoryMetadata {
    tables: RwLock<Tables>,
    /// Copy of the tables taken at `begin`, restored on `rollback`
    snapshot: Mutex<Option<Tables>>,
    probe: Arc<dyn StateProbe>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::with_probe(Arc::new(NoGroup))
    }

    pub fn with_probe(probe: Arc<dyn StateProbe>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            snapshot: Mutex::new(None),
            probe,
        }
    }

    pub async fn add_replicaset(&self, record: ReplicaSetRecord) {
        let mut tables = self.tables.write().await;
        tables.replicasets.insert(record.id, record);
    }

    pub async fn set_topology(&self, id: u64, topology: TopologyMode) -> GrupoResult<()> {
        let mut tables = self.tables.write().await;
        let rs = tables
            .replicasets
            .get_mut(&id)
            .ok_or_else(|| unknown_replicaset(id))?;
        rs.topology = topology;
        Ok(())
    }

    pub async fn hosts(&self) -> Vec<HostRecord> {
        self.tables.read().await.hosts.values().cloned().collect()
    }

    fn with_state(&self, record: &InstanceRecord) -> InstanceRecord {
        let mut record = record.clone();
        record.state = self.probe.member_state(&record);
        record
    }
}

impl Default for MemoryMetadata {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_replicaset(id: u64) -> GrupoError {
    GrupoError::metadata(format!("ReplicaSet with id {} not found", id))
}

#[async_trait]
impl MetadataStore for MemoryMetadata {
    async fn replicaset(&self, id: u64) -> GrupoResult<ReplicaSetRecord> {
        let tables = self.tables.read().await;
        tables
            .replicasets
            .get(&id)
            .cloned()
            .ok_or_else(|| unknown_replicaset(id))
    }

    async fn is_replicaset_empty(&self, id: u64) -> GrupoResult<bool> {
        Ok(self.get_replicaset_count(id).await? == 0)
    }

    async fn is_instance_on_replicaset(&self, id: u64, address: &str) -> GrupoResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .instances
            .values()
            .any(|i| i.replicaset_id == id && i.endpoint == address))
    }

    async fn is_instance_label_unique(&self, id: u64, label: &str) -> GrupoResult<bool> {
        let tables = self.tables.read().await;
        Ok(!tables
            .instances
            .values()
            .any(|i| i.replicaset_id == id && i.label == label))
    }

    async fn insert_host(&self, host: &HostRecord) -> GrupoResult<u64> {
        let mut tables = self.tables.write().await;
        if let Some((id, _)) = tables.hosts.iter().find(|(_, h)| h.host_name == host.host_name) {
            return Ok(*id);
        }
        tables.next_host_id += 1;
        let id = tables.next_host_id;
        tables.hosts.insert(id, host.clone());
        Ok(id)
    }

    async fn insert_instance(&self, record: &InstanceRecord) -> GrupoResult<u64> {
        let mut tables = self.tables.write().await;
        if !tables.replicasets.contains_key(&record.replicaset_id) {
            return Err(unknown_replicaset(record.replicaset_id));
        }
        if tables.instances.values().any(|i| i.endpoint == record.endpoint) {
            return Err(GrupoError::metadata(format!(
                "Instance '{}' is already recorded",
                record.endpoint
            )));
        }
        tables.next_instance_id += 1;
        let id = tables.next_instance_id;
        let mut stored = record.clone();
        stored.id = id;
        stored.state = MemberState::Missing;
        tables.instances.insert(id, stored);
        Ok(id)
    }

    async fn remove_instance(&self, address: &str) -> GrupoResult<()> {
        let mut tables = self.tables.write().await;
        tables.instances.retain(|_, i| i.endpoint != address);
        Ok(())
    }

    async fn get_instance(&self, address: &str) -> GrupoResult<Option<InstanceRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .instances
            .values()
            .find(|i| i.endpoint == address)
            .map(|i| self.with_state(i)))
    }

    async fn get_instance_by_uuid(&self, uuid: &str) -> GrupoResult<Option<InstanceRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .instances
            .values()
            .find(|i| i.server_uuid == uuid)
            .map(|i| self.with_state(i)))
    }

    async fn get_replicaset_instances(
        &self,
        id: u64,
        states: Option<&[MemberState]>,
    ) -> GrupoResult<Vec<InstanceRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .instances
            .values()
            .filter(|i| i.replicaset_id == id)
            .map(|i| self.with_state(i))
            .filter(|i| states.map_or(true, |s| s.contains(&i.state)))
            .collect())
    }

    async fn get_replicaset_count(&self, id: u64) -> GrupoResult<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .instances
            .values()
            .filter(|i| i.replicaset_id == id)
            .count() as u64)
    }

    async fn set_replicaset_group_name(&self, id: u64, group_name: &str) -> GrupoResult<()> {
        let mut tables = self.tables.write().await;
        let rs = tables
            .replicasets
            .get_mut(&id)
            .ok_or_else(|| unknown_replicaset(id))?;
        rs.group_name = Some(group_name.to_string());
        Ok(())
    }

    async fn set_instance_label(&self, address: &str, label: &str) -> GrupoResult<()> {
        let mut tables = self.tables.write().await;
        let instance = tables
            .instances
            .values_mut()
            .find(|i| i.endpoint == address)
            .ok_or_else(|| GrupoError::metadata(format!("Instance '{}' not found", address)))?;
        instance.label = label.to_string();
        Ok(())
    }

    async fn begin(&self) -> GrupoResult<()> {
        let mut snapshot = self.snapshot.lock().await;
        if snapshot.is_some() {
            return Err(GrupoError::metadata("A metadata transaction is already open"));
        }
        *snapshot = Some(self.tables.read().await.clone());
        Ok(())
    }

    async fn commit(&self) -> GrupoResult<()> {
        self.snapshot
            .lock()
            .await
            .take()
            .map(|_| ())
            .ok_or_else(|| GrupoError::metadata("No metadata transaction to commit"))
    }

    async fn rollback(&self) -> GrupoResult<()> {
        let saved = self.snapshot.lock().await.take();
        match saved {
            Some(tables) => {
                *self.tables.write().await = tables;
                Ok(())
            }
            None => Err(GrupoError::metadata("No metadata transaction to roll back")),
        }
    }
}
