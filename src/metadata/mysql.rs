/// Metadata store over the `mysql_innodb_cluster_metadata` schema
use async_trait::async_trait;
use std::sync::Arc;

use super::{MetadataStore, ReplicaSetRecord};
use crate::core::{HostRecord, InstanceRecord, MemberState, TopologyMode};
use crate::error::{GrupoError, GrupoResult};
use crate::session::{quote_string, InstanceSession, Row};

const SCHEMA: &str = "mysql_innodb_cluster_metadata";

/// Columns selected for every instance query, in `parse_instance` order
const INSTANCE_COLUMNS: &str = "i.instance_id, i.host_id, i.replicaset_id, i.mysql_server_uuid, \
     i.instance_name, i.role, \
     JSON_UNQUOTE(JSON_EXTRACT(i.addresses, '$.mysqlClassic')), \
     JSON_UNQUOTE(JSON_EXTRACT(i.addresses, '$.mysqlX')), \
     JSON_UNQUOTE(JSON_EXTRACT(i.addresses, '$.grLocal')), \
     g.member_state";

/// Metadata store reached through a session to the instance holding the schema
pub struct MySqlMetadata {
    session: Arc<dyn InstanceSession>,
}

impl MySqlMetadata {
    pub fn new(session: Arc<dyn InstanceSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<dyn InstanceSession> {
        &self.session
    }

    pub async fn cluster_name(&self, cluster_id: u64) -> GrupoResult<String> {
        let row = self
            .session
            .query_row(&format!(
                "SELECT cluster_name FROM {}.clusters WHERE cluster_id = {}",
                SCHEMA, cluster_id
            ))
            .await?;
        row.and_then(|r| r.into_iter().next().flatten())
            .ok_or_else(|| GrupoError::metadata(format!("Cluster with id {} not found", cluster_id)))
    }

    async fn query_instances(&self, filter: &str) -> GrupoResult<Vec<InstanceRecord>> {
        let sql = format!(
            "SELECT {} FROM {}.instances i \
             LEFT JOIN performance_schema.replication_group_members g \
             ON g.member_id = i.mysql_server_uuid \
             WHERE {} ORDER BY i.instance_id",
            INSTANCE_COLUMNS, SCHEMA, filter
        );
        self.session
            .query_rows(&sql)
            .await?
            .into_iter()
            .map(parse_instance)
            .collect()
    }

    async fn scalar_u64(&self, sql: &str) -> GrupoResult<u64> {
        let row = self.session.query_row(sql).await?;
        row.and_then(|r| r.into_iter().next().flatten())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| GrupoError::metadata(format!("Unexpected empty result for: {}", sql)))
    }
}

fn column(row: &mut std::vec::IntoIter<Option<String>>) -> Option<String> {
    row.next().flatten()
}

fn parse_id(value: Option<String>, what: &str) -> GrupoResult<u64> {
    value
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| GrupoError::metadata(format!("Invalid {} in metadata", what)))
}

fn parse_instance(row: Row) -> GrupoResult<InstanceRecord> {
    let mut cols = row.into_iter();
    let id = parse_id(column(&mut cols), "instance_id")?;
    let host_id = parse_id(column(&mut cols), "host_id")?;
    let replicaset_id = parse_id(column(&mut cols), "replicaset_id")?;
    let server_uuid = column(&mut cols).unwrap_or_default();
    let label = column(&mut cols).unwrap_or_default();
    let role = column(&mut cols).unwrap_or_else(|| "HA".to_string());
    let endpoint = column(&mut cols)
        .ok_or_else(|| GrupoError::metadata(format!("Instance {} has no classic address", id)))?;
    let xendpoint = column(&mut cols);
    let grendpoint = column(&mut cols);
    let state = match column(&mut cols) {
        Some(s) => s.parse()?,
        None => MemberState::Missing,
    };

    Ok(InstanceRecord {
        id,
        host_id,
        replicaset_id,
        endpoint,
        xendpoint,
        grendpoint,
        server_uuid,
        label,
        role,
        state,
    })
}

fn json_string_or_null(value: &Option<String>) -> String {
    value.as_deref().map(quote_string).unwrap_or_else(|| "NULL".to_string())
}

fn address_filter(address: &str) -> String {
    format!(
        "JSON_UNQUOTE(JSON_EXTRACT(i.addresses, '$.mysqlClassic')) = {}",
        quote_string(address)
    )
}

#[async_trait]
impl MetadataStore for MySqlMetadata {
    async fn replicaset(&self, id: u64) -> GrupoResult<ReplicaSetRecord> {
        let row = self
            .session
            .query_row(&format!(
                "SELECT replicaset_id, cluster_id, replicaset_name, topology_type, \
                 JSON_UNQUOTE(JSON_EXTRACT(attributes, '$.group_replication_group_name')) \
                 FROM {}.replicasets WHERE replicaset_id = {}",
                SCHEMA, id
            ))
            .await?
            .ok_or_else(|| GrupoError::metadata(format!("ReplicaSet with id {} not found", id)))?;

        let mut cols = row.into_iter();
        let id = parse_id(column(&mut cols), "replicaset_id")?;
        let cluster_id = parse_id(column(&mut cols), "cluster_id")?;
        let name = column(&mut cols).unwrap_or_default();
        let topology = TopologyMode::from_metadata_tag(&column(&mut cols).unwrap_or_default())?;
        let group_name = column(&mut cols).filter(|g| !g.is_empty() && g != "null");
        Ok(ReplicaSetRecord {
            id,
            cluster_id,
            name,
            topology,
            group_name,
        })
    }

    async fn is_replicaset_empty(&self, id: u64) -> GrupoResult<bool> {
        Ok(self.get_replicaset_count(id).await? == 0)
    }

    async fn is_instance_on_replicaset(&self, id: u64, address: &str) -> GrupoResult<bool> {
        let count = self
            .scalar_u64(&format!(
                "SELECT COUNT(*) FROM {}.instances i WHERE i.replicaset_id = {} AND {}",
                SCHEMA,
                id,
                address_filter(address)
            ))
            .await?;
        Ok(count > 0)
    }

    async fn is_instance_label_unique(&self, id: u64, label: &str) -> GrupoResult<bool> {
        let count = self
            .scalar_u64(&format!(
                "SELECT COUNT(*) FROM {}.instances WHERE replicaset_id = {} AND instance_name = {}",
                SCHEMA,
                id,
                quote_string(label)
            ))
            .await?;
        Ok(count == 0)
    }

    async fn insert_host(&self, host: &HostRecord) -> GrupoResult<u64> {
        let existing = self
            .session
            .query_row(&format!(
                "SELECT host_id FROM {}.hosts WHERE host_name = {}",
                SCHEMA,
                quote_string(&host.host_name)
            ))
            .await?;
        if let Some(row) = existing {
            return parse_id(row.into_iter().next().flatten(), "host_id");
        }

        self.session
            .execute(&format!(
                "INSERT INTO {}.hosts (host_name, ip_address, location) VALUES ({}, {}, {})",
                SCHEMA,
                quote_string(&host.host_name),
                json_string_or_null(&host.ip_address),
                quote_string(host.location.as_deref().unwrap_or(""))
            ))
            .await?;
        self.scalar_u64("SELECT LAST_INSERT_ID()").await
    }

    async fn insert_instance(&self, record: &InstanceRecord) -> GrupoResult<u64> {
        self.session
            .execute(&format!(
                "INSERT INTO {}.instances (host_id, replicaset_id, mysql_server_uuid, \
                 instance_name, role, addresses) VALUES ({}, {}, {}, {}, {}, \
                 JSON_OBJECT('mysqlClassic', {}, 'mysqlX', {}, 'grLocal', {}))",
                SCHEMA,
                record.host_id,
                record.replicaset_id,
                quote_string(&record.server_uuid),
                quote_string(&record.label),
                quote_string(&record.role),
                quote_string(&record.endpoint),
                json_string_or_null(&record.xendpoint),
                json_string_or_null(&record.grendpoint)
            ))
            .await?;
        self.scalar_u64("SELECT LAST_INSERT_ID()").await
    }

    async fn remove_instance(&self, address: &str) -> GrupoResult<()> {
        self.session
            .execute(&format!(
                "DELETE i FROM {}.instances i WHERE {}",
                SCHEMA,
                address_filter(address)
            ))
            .await
    }

    async fn get_instance(&self, address: &str) -> GrupoResult<Option<InstanceRecord>> {
        Ok(self
            .query_instances(&address_filter(address))
            .await?
            .into_iter()
            .next())
    }

    async fn get_instance_by_uuid(&self, uuid: &str) -> GrupoResult<Option<InstanceRecord>> {
        Ok(self
            .query_instances(&format!("i.mysql_server_uuid = {}", quote_string(uuid)))
            .await?
            .into_iter()
            .next())
    }

    async fn get_replicaset_instances(
        &self,
        id: u64,
        states: Option<&[MemberState]>,
    ) -> GrupoResult<Vec<InstanceRecord>> {
        let instances = self
            .query_instances(&format!("i.replicaset_id = {}", id))
            .await?;
        Ok(instances
            .into_iter()
            .filter(|i| states.map_or(true, |s| s.contains(&i.state)))
            .collect())
    }

    async fn get_replicaset_count(&self, id: u64) -> GrupoResult<u64> {
        self.scalar_u64(&format!(
            "SELECT COUNT(*) FROM {}.instances WHERE replicaset_id = {}",
            SCHEMA, id
        ))
        .await
    }

    async fn set_replicaset_group_name(&self, id: u64, group_name: &str) -> GrupoResult<()> {
        self.session
            .execute(&format!(
                "UPDATE {}.replicasets SET attributes = \
                 JSON_SET(COALESCE(attributes, JSON_OBJECT()), '$.group_replication_group_name', {}) \
                 WHERE replicaset_id = {}",
                SCHEMA,
                quote_string(group_name),
                id
            ))
            .await
    }

    async fn set_instance_label(&self, address: &str, label: &str) -> GrupoResult<()> {
        self.session
            .execute(&format!(
                "UPDATE {}.instances i SET i.instance_name = {} WHERE {}",
                SCHEMA,
                quote_string(label),
                address_filter(address)
            ))
            .await
    }

    async fn begin(&self) -> GrupoResult<()> {
        self.session.execute("START TRANSACTION").await
    }

    async fn commit(&self) -> GrupoResult<()> {
        self.session.execute("COMMIT").await
    }

    async fn rollback(&self) -> GrupoResult<()> {
        self.session.execute("ROLLBACK").await
    }
}
