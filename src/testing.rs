/// In-process fake fleet used by the unit tests
///
/// Every fake server keeps its system variables, accounts and group view in
/// one shared state, so a session opened through the fake connector sees
/// the writes made by the orchestrator through any other session.
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::{Cluster, InstanceRecord, MemberState, ReplicaSet, TopologyMode, Version};
use crate::error::{GrupoError, GrupoResult, CR_CONN_HOST_ERROR, CR_UNKNOWN_HOST};
use crate::gr::{self, auto_increment_values};
use crate::metadata::{insert_instance_with_host, MemoryMetadata, MetadataStore, ReplicaSetRecord, StateProbe};
use crate::provision::{ProvisionMessage, ProvisionOutcome, ProvisionRequest, Provisioner};
use crate::replicaset::{Orchestrator, OrchestratorSettings};
use crate::session::{Connector, GroupMember, InstanceSession, Row, SysvarValue, VarQualifier};
use crate::utils::split_endpoint;

pub const GROUP_NAME: &str = "d0a5a5a0-6b9c-11e9-a923-1681be663d3e";
pub const DEFAULT_VERSION: Version = Version::new(8, 0, 16);

pub struct FakeServer {
    endpoint: String,
    version: Version,
    sysvars: HashMap<String, String>,
    persisted: HashMap<String, String>,
    sources: HashMap<String, String>,
    writes: Vec<(String, String, VarQualifier)>,
    statements: Vec<String>,
    accounts: Vec<(String, String)>,
    in_group: bool,
    state: MemberState,
    plugin_active: bool,
    auto_rejoin: bool,
    recovery_user: Option<String>,
    refused: bool,
    quorum: Option<bool>,
    fail_drop_users: bool,
    failing_writes: Vec<String>,
    failing_reads: Vec<String>,
}

impl FakeServer {
    fn new(endpoint: &str, server_id: u64) -> Self {
        let (host, port) = split_endpoint(endpoint).unwrap();
        let mut sysvars = HashMap::new();
        let mut set = |k: &str, v: String| {
            sysvars.insert(k.to_string(), v);
        };
        set("server_id", server_id.to_string());
        set("server_uuid", uuid_for(server_id));
        set("report_host", host.clone());
        set("port", port.to_string());
        set("mysqlx_port", format!("{}0", port));
        set("have_ssl", "YES".into());
        set("require_secure_transport", "OFF".into());
        set("persisted_globals_load", "ON".into());
        set("super_read_only", "OFF".into());
        set("sql_log_bin", "ON".into());
        set("log_bin", "ON".into());
        set("binlog_format", "ROW".into());
        set("binlog_checksum", "NONE".into());
        set("enforce_gtid_consistency", "ON".into());
        set("gtid_mode", "ON".into());
        set("log_slave_updates", "ON".into());
        set("master_info_repository", "TABLE".into());
        set("relay_log_info_repository", "TABLE".into());
        set("transaction_write_set_extraction", "XXHASH64".into());
        set("auto_increment_increment", "1".into());
        set("auto_increment_offset", "1".into());
        set(gr::SYSVAR_GROUP_NAME, String::new());
        set(gr::SYSVAR_GROUP_SEEDS, String::new());
        set(gr::SYSVAR_LOCAL_ADDRESS, String::new());
        set(gr::SYSVAR_FORCE_MEMBERS, String::new());
        set(gr::SYSVAR_START_ON_BOOT, "OFF".into());
        set(gr::SYSVAR_BOOTSTRAP_GROUP, "OFF".into());
        set(gr::SYSVAR_SSL_MODE, "DISABLED".into());
        set(gr::SYSVAR_RECOVERY_PUBLIC_KEY, "OFF".into());
        set("group_replication_consistency", "EVENTUAL".into());
        set("group_replication_member_expel_timeout", "0".into());
        set("group_replication_exit_state_action", "READ_ONLY".into());
        set("group_replication_member_weight", "50".into());
        set("group_replication_autorejoin_tries", "0".into());

        Self {
            endpoint: endpoint.to_string(),
            version: DEFAULT_VERSION,
            sysvars,
            persisted: HashMap::new(),
            sources: HashMap::new(),
            writes: Vec::new(),
            statements: Vec::new(),
            accounts: Vec::new(),
            in_group: false,
            state: MemberState::Offline,
            plugin_active: true,
            auto_rejoin: false,
            recovery_user: None,
            refused: false,
            quorum: None,
            fail_drop_users: false,
            failing_writes: Vec::new(),
            failing_reads: Vec::new(),
        }
    }

    fn local_address(&self) -> String {
        let (host, port) = split_endpoint(&self.endpoint).unwrap();
        format!("{}:{}1", host, port)
    }

    fn uuid(&self) -> String {
        self.sysvars.get("server_uuid").cloned().unwrap_or_default()
    }

    fn server_id(&self) -> u64 {
        self.sysvars
            .get("server_id")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Start Group Replication as a member of `group_name`
    fn join_group(&mut self, group_name: &str) {
        let local = self.local_address();
        self.sysvars.insert(gr::SYSVAR_GROUP_NAME.into(), group_name.into());
        self.sysvars.insert(gr::SYSVAR_LOCAL_ADDRESS.into(), local);
        self.in_group = true;
        self.state = MemberState::Online;
        self.plugin_active = true;
    }
}

pub fn uuid_for(server_id: u64) -> String {
    format!("00000000-0000-0000-0000-{:012}", server_id)
}

#[derive(Default)]
struct FleetState {
    servers: Vec<FakeServer>,
    primary: Option<String>,
    protocol: Option<Version>,
    protocol_error: Option<u16>,
    open_sessions: usize,
    replicaset_registered: bool,
    provision_calls: Vec<(String, ProvisionRequest)>,
    provision_outcome: Option<ProvisionOutcome>,
    /// Member recorded by someone else once the next replication account is created
    record_on_account: Option<String>,
}

impl FleetState {
    fn server(&self, endpoint: &str) -> &FakeServer {
        self.servers
            .iter()
            .find(|s| s.endpoint == endpoint)
            .unwrap_or_else(|| panic!("no fake server '{}'", endpoint))
    }

    fn server_mut(&mut self, endpoint: &str) -> &mut FakeServer {
        self.servers
            .iter_mut()
            .find(|s| s.endpoint == endpoint)
            .unwrap_or_else(|| panic!("no fake server '{}'", endpoint))
    }

    fn group_size(&self) -> usize {
        self.servers.iter().filter(|s| s.in_group).count()
    }
}

type Shared = Arc<Mutex<FleetState>>;

async fn record_member(metadata: &MemoryMetadata, endpoint: &str, uuid: String, local: String) {
    let (host, _) = split_endpoint(endpoint).unwrap();
    let mut record = InstanceRecord::new(endpoint.to_string(), uuid, 1);
    record.grendpoint = Some(local);
    insert_instance_with_host(
        metadata,
        &crate::core::HostRecord {
            host_name: host,
            ip_address: None,
            location: None,
        },
        &record,
    )
    .await
    .unwrap();
}

fn lock(state: &Shared) -> MutexGuard<'_, FleetState> {
    state.lock().unwrap()
}

struct FleetProbe(Shared);

impl StateProbe for FleetProbe {
    fn member_state(&self, instance: &InstanceRecord) -> MemberState {
        let state = lock(&self.0);
        match state.servers.iter().find(|s| s.endpoint == instance.endpoint) {
            Some(server) if server.in_group => server.state,
            _ => MemberState::Missing,
        }
    }
}

#[derive(Clone)]
pub struct FakeFleet {
    state: Shared,
    topology: TopologyMode,
    metadata: Arc<MemoryMetadata>,
}

impl FakeFleet {
    pub fn new(topology: TopologyMode) -> Self {
        let state: Shared = Arc::new(Mutex::new(FleetState::default()));
        let metadata = Arc::new(MemoryMetadata::with_probe(Arc::new(FleetProbe(state.clone()))));
        Self {
            state,
            topology,
            metadata,
        }
    }

    pub fn metadata(&self) -> Arc<MemoryMetadata> {
        self.metadata.clone()
    }

    pub fn connector(&self) -> Arc<FakeConnector> {
        Arc::new(FakeConnector {
            state: self.state.clone(),
            metadata: self.metadata.clone(),
        })
    }

    pub fn provisioner(&self) -> Arc<FakeProvisioner> {
        Arc::new(FakeProvisioner {
            state: self.state.clone(),
            topology: self.topology,
        })
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(OrchestratorSettings::default())
    }

    pub fn orchestrator_with(&self, settings: OrchestratorSettings) -> Orchestrator {
        Orchestrator::new(self.connector(), self.provisioner(), settings)
    }

    /// Session that does not count as opened through the connector
    pub fn session(&self, endpoint: &str) -> Arc<dyn InstanceSession> {
        lock(&self.state).server(endpoint);
        Arc::new(FakeSession {
            endpoint: endpoint.to_string(),
            state: self.state.clone(),
            metadata: self.metadata.clone(),
            counted: false,
        })
    }

    async fn register_replicaset(&self) {
        let register = {
            let mut state = lock(&self.state);
            !std::mem::replace(&mut state.replicaset_registered, true)
        };
        if register {
            self.metadata
                .add_replicaset(ReplicaSetRecord {
                    id: 1,
                    cluster_id: 1,
                    name: "default".to_string(),
                    topology: self.topology,
                    group_name: Some(GROUP_NAME.to_string()),
                })
                .await;
        }
    }

    /// Replica-set recorded before any group was started
    pub async fn clear_group_name(&self) {
        self.register_replicaset().await;
        self.metadata.set_replicaset_group_name(1, "").await.unwrap();
    }

    /// ONLINE member of the group, recorded in the metadata
    pub async fn add_member(&self, endpoint: &str, server_id: u64) {
        self.register_replicaset().await;
        let (uuid, local) = {
            let mut state = lock(&self.state);
            let mut server = FakeServer::new(endpoint, server_id);
            server.join_group(GROUP_NAME);
            server.sysvars.insert(gr::SYSVAR_SSL_MODE.into(), "REQUIRED".into());
            let size = state.group_size() as u64 + 1;
            let values = auto_increment_values(self.topology, size, server_id);
            server
                .sysvars
                .insert("auto_increment_increment".into(), values.increment.to_string());
            server
                .sysvars
                .insert("auto_increment_offset".into(), values.offset.to_string());
            if self.topology == TopologyMode::SinglePrimary && state.primary.is_none() {
                state.primary = Some(endpoint.to_string());
            }
            let ids = (server.uuid(), server.local_address());
            state.servers.push(server);
            ids
        };
        record_member(&self.metadata, endpoint, uuid, local).await;
    }

    /// Server outside any group and not recorded anywhere
    pub fn add_standalone(&self, endpoint: &str, server_id: u64) {
        lock(&self.state).servers.push(FakeServer::new(endpoint, server_id));
    }

    pub async fn cluster(&self, endpoint: &str) -> Arc<Cluster> {
        self.register_replicaset().await;
        let metadata: Arc<dyn MetadataStore> = self.metadata.clone();
        Cluster::new(1, "testCluster", metadata, self.session(endpoint))
    }

    /// Cluster through `endpoint` and its loaded default replica-set
    pub async fn replicaset(&self, endpoint: &str) -> (Arc<Cluster>, ReplicaSet) {
        let cluster = self.cluster(endpoint).await;
        let replicaset = ReplicaSet::load(&cluster, 1).await.unwrap();
        (cluster, replicaset)
    }

    pub fn set_primary(&self, endpoint: Option<&str>) {
        lock(&self.state).primary = endpoint.map(str::to_string);
    }

    /// Change a member's state; MISSING takes it out of the group
    pub fn set_state(&self, endpoint: &str, member_state: MemberState) {
        let mut state = lock(&self.state);
        let server = state.server_mut(endpoint);
        server.state = member_state;
        server.in_group = member_state != MemberState::Missing && member_state != MemberState::Offline;
        if !server.in_group {
            server.state = MemberState::Offline;
        }
    }

    pub fn set_version(&self, endpoint: &str, version: Version) {
        lock(&self.state).server_mut(endpoint).version = version;
    }

    pub fn set_sysvar(&self, endpoint: &str, name: &str, value: &str) {
        lock(&self.state)
            .server_mut(endpoint)
            .sysvars
            .insert(name.to_string(), value.to_string());
    }

    pub fn remove_sysvar(&self, endpoint: &str, name: &str) {
        lock(&self.state).server_mut(endpoint).sysvars.remove(name);
    }

    pub fn sysvar(&self, endpoint: &str, name: &str) -> Option<String> {
        lock(&self.state).server(endpoint).sysvars.get(name).cloned()
    }

    pub fn persisted(&self, endpoint: &str, name: &str) -> Option<String> {
        lock(&self.state).server(endpoint).persisted.get(name).cloned()
    }

    pub fn set_source(&self, endpoint: &str, name: &str, source: &str) {
        lock(&self.state)
            .server_mut(endpoint)
            .sources
            .insert(name.to_string(), source.to_string());
    }

    /// Every write to `name` on `endpoint`, in order
    pub fn writes(&self, endpoint: &str, name: &str) -> Vec<(String, VarQualifier)> {
        lock(&self.state)
            .server(endpoint)
            .writes
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, v, q)| (v.clone(), *q))
            .collect()
    }

    pub fn statements(&self, endpoint: &str) -> Vec<String> {
        lock(&self.state).server(endpoint).statements.clone()
    }

    pub fn accounts(&self, endpoint: &str) -> Vec<(String, String)> {
        lock(&self.state).server(endpoint).accounts.clone()
    }

    pub fn add_account(&self, endpoint: &str, user: &str, host: &str) {
        lock(&self.state)
            .server_mut(endpoint)
            .accounts
            .push((user.to_string(), host.to_string()));
    }

    pub fn set_recovery_user(&self, endpoint: &str, user: Option<&str>) {
        lock(&self.state).server_mut(endpoint).recovery_user = user.map(str::to_string);
    }

    pub fn set_auto_rejoin(&self, endpoint: &str, running: bool) {
        lock(&self.state).server_mut(endpoint).auto_rejoin = running;
    }

    pub fn set_plugin_active(&self, endpoint: &str, active: bool) {
        lock(&self.state).server_mut(endpoint).plugin_active = active;
    }

    pub fn set_refused(&self, endpoint: &str, refused: bool) {
        lock(&self.state).server_mut(endpoint).refused = refused;
    }

    pub fn set_quorum(&self, endpoint: &str, quorum: Option<bool>) {
        lock(&self.state).server_mut(endpoint).quorum = quorum;
    }

    /// Make dropping accounts on `endpoint` fail
    pub fn fail_drop_users(&self, endpoint: &str, fail: bool) {
        lock(&self.state).server_mut(endpoint).fail_drop_users = fail;
    }

    /// Make every write of `name` on `endpoint` fail without changing it
    pub fn fail_writes(&self, endpoint: &str, name: &str) {
        lock(&self.state)
            .server_mut(endpoint)
            .failing_writes
            .push(name.to_string());
    }

    /// Make every read of `name` on `endpoint` fail
    pub fn fail_reads(&self, endpoint: &str, name: &str) {
        lock(&self.state)
            .server_mut(endpoint)
            .failing_reads
            .push(name.to_string());
    }

    /// Join `endpoint` to the group and record it in the metadata as soon as
    /// the orchestrator creates its next replication account
    pub fn record_on_next_account(&self, endpoint: &str) {
        lock(&self.state).record_on_account = Some(endpoint.to_string());
    }

    pub fn set_protocol(&self, version: Version) {
        lock(&self.state).protocol = Some(version);
    }

    pub fn protocol(&self) -> Version {
        lock(&self.state).protocol.unwrap_or(DEFAULT_VERSION)
    }

    pub fn set_protocol_error(&self, code: Option<u16>) {
        lock(&self.state).protocol_error = code;
    }

    pub fn open_sessions(&self) -> usize {
        lock(&self.state).open_sessions
    }

    pub fn provision_calls(&self) -> Vec<(String, ProvisionRequest)> {
        lock(&self.state).provision_calls.clone()
    }

    /// Make every following provisioning call return `outcome`
    pub fn fail_provisioning(&self, outcome: ProvisionOutcome) {
        lock(&self.state).provision_outcome = Some(outcome);
    }

    /// Restart the server: persisted values take effect
    pub fn restart(&self, endpoint: &str) {
        let mut state = lock(&self.state);
        let server = state.server_mut(endpoint);
        let persisted: Vec<(String, String)> = server
            .persisted
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in persisted {
            server.sysvars.insert(name, value);
        }
    }
}

pub struct FakeConnector {
    state: Shared,
    metadata: Arc<MemoryMetadata>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, endpoint: &str) -> GrupoResult<Arc<dyn InstanceSession>> {
        let mut state = lock(&self.state);
        match state.servers.iter().find(|s| s.endpoint == endpoint) {
            None => {
                return Err(GrupoError::connection(
                    endpoint,
                    Some(CR_UNKNOWN_HOST),
                    "Unknown MySQL server host",
                ))
            }
            Some(server) if server.refused => {
                return Err(GrupoError::connection(
                    endpoint,
                    Some(CR_CONN_HOST_ERROR),
                    format!("Can't connect to MySQL server on '{}' (111)", endpoint),
                ))
            }
            Some(_) => {}
        }
        state.open_sessions += 1;
        Ok(Arc::new(FakeSession {
            endpoint: endpoint.to_string(),
            state: self.state.clone(),
            metadata: self.metadata.clone(),
            counted: true,
        }))
    }
}

pub struct FakeSession {
    endpoint: String,
    state: Shared,
    metadata: Arc<MemoryMetadata>,
    counted: bool,
}

impl FakeSession {
    fn with<R>(&self, f: impl FnOnce(&mut FakeServer) -> R) -> R {
        let mut state = lock(&self.state);
        f(state.server_mut(&self.endpoint))
    }
}

fn default_value(name: &str) -> String {
    match name {
        gr::SYSVAR_START_ON_BOOT => "ON".to_string(),
        gr::SYSVAR_BOOTSTRAP_GROUP => "OFF".to_string(),
        _ => String::new(),
    }
}

#[async_trait]
impl InstanceSession for FakeSession {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn version(&self) -> GrupoResult<Version> {
        Ok(self.with(|s| s.version))
    }

    async fn execute(&self, sql: &str) -> GrupoResult<()> {
        self.with(|s| s.statements.push(sql.to_string()));
        Ok(())
    }

    async fn query_rows(&self, sql: &str) -> GrupoResult<Vec<Row>> {
        self.with(|s| s.statements.push(sql.to_string()));
        Ok(Vec::new())
    }

    async fn close(&self) -> GrupoResult<()> {
        if self.counted {
            let mut state = lock(&self.state);
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
        Ok(())
    }

    async fn get_sysvar(&self, name: &str, _qualifier: VarQualifier) -> GrupoResult<Option<String>> {
        if self.with(|s| s.failing_reads.iter().any(|n| n == name)) {
            return Err(GrupoError::database(
                self.endpoint.clone(),
                1193,
                format!("Unknown system variable '{}'", name),
            ));
        }
        Ok(self.with(|s| s.sysvars.get(name).cloned()))
    }

    async fn set_sysvar(&self, name: &str, value: &SysvarValue, qualifier: VarQualifier) -> GrupoResult<()> {
        let value = value.to_string();
        if self.with(|s| s.failing_writes.iter().any(|n| n == name)) {
            return Err(GrupoError::database(
                self.endpoint.clone(),
                1229,
                format!("Variable '{}' could not be set", name),
            ));
        }
        self.with(|s| {
            s.writes.push((name.to_string(), value.clone(), qualifier));
            match qualifier {
                VarQualifier::Session | VarQualifier::Global => {
                    s.sysvars.insert(name.to_string(), value);
                }
                VarQualifier::Persist => {
                    s.sysvars.insert(name.to_string(), value.clone());
                    s.persisted.insert(name.to_string(), value);
                }
                VarQualifier::PersistOnly => {
                    s.persisted.insert(name.to_string(), value);
                }
            }
        });
        Ok(())
    }

    async fn set_sysvar_default(&self, name: &str, qualifier: VarQualifier) -> GrupoResult<()> {
        let value = default_value(name);
        self.with(|s| {
            s.writes.push((name.to_string(), value.clone(), qualifier));
            if qualifier != VarQualifier::PersistOnly {
                s.sysvars.insert(name.to_string(), value.clone());
            }
            if matches!(qualifier, VarQualifier::Persist | VarQualifier::PersistOnly) {
                s.persisted.insert(name.to_string(), value);
            }
        });
        Ok(())
    }

    async fn report_host(&self) -> GrupoResult<String> {
        Ok(self.with(|s| s.sysvars.get("report_host").cloned().unwrap_or_default()))
    }

    async fn sysvar_source(&self, name: &str) -> GrupoResult<Option<String>> {
        Ok(self.with(|s| s.sources.get(name).cloned()))
    }

    async fn member_state(&self) -> GrupoResult<MemberState> {
        Ok(self.with(|s| if s.in_group { s.state } else { MemberState::Offline }))
    }

    async fn group_members(&self) -> GrupoResult<Vec<GroupMember>> {
        let state = lock(&self.state);
        let me = state.server(&self.endpoint);
        let members: Vec<&FakeServer> = if me.in_group {
            state.servers.iter().filter(|s| s.in_group).collect()
        } else {
            vec![me]
        };
        Ok(members
            .into_iter()
            .map(|s| {
                let (host, port) = split_endpoint(&s.endpoint).unwrap();
                GroupMember {
                    uuid: s.uuid(),
                    host,
                    port,
                    state: if s.in_group { s.state } else { MemberState::Offline },
                }
            })
            .collect())
    }

    async fn primary_member_uuid(&self) -> GrupoResult<String> {
        let state = lock(&self.state);
        if !state.server(&self.endpoint).in_group {
            return Ok(String::new());
        }
        Ok(state
            .primary
            .as_deref()
            .map(|p| state.server(p).uuid())
            .unwrap_or_default())
    }

    async fn has_quorum(&self) -> GrupoResult<bool> {
        let state = lock(&self.state);
        let me = state.server(&self.endpoint);
        if let Some(quorum) = me.quorum {
            return Ok(quorum);
        }
        let members: Vec<&FakeServer> = state.servers.iter().filter(|s| s.in_group).collect();
        let reachable = members
            .iter()
            .filter(|s| s.state != MemberState::Unreachable)
            .count();
        Ok(!members.is_empty() && 2 * reachable > members.len())
    }

    async fn plugin_status(&self, plugin: &str) -> GrupoResult<Option<String>> {
        Ok(self.with(|s| {
            (plugin == gr::GR_PLUGIN && s.plugin_active).then(|| "ACTIVE".to_string())
        }))
    }

    async fn stop_group_replication(&self) -> GrupoResult<()> {
        self.with(|s| {
            s.statements.push("STOP GROUP_REPLICATION".to_string());
            s.in_group = false;
            s.state = MemberState::Offline;
        });
        Ok(())
    }

    async fn group_protocol_version(&self) -> GrupoResult<Version> {
        let state = lock(&self.state);
        if let Some(code) = state.protocol_error {
            return Err(GrupoError::database(
                self.endpoint.clone(),
                code,
                "Can't initialize function 'group_replication_get_communication_protocol'",
            ));
        }
        Ok(state.protocol.unwrap_or(DEFAULT_VERSION))
    }

    async fn set_group_protocol_version(&self, version: Version) -> GrupoResult<()> {
        lock(&self.state).protocol = Some(version);
        Ok(())
    }

    async fn recovery_user(&self) -> GrupoResult<Option<String>> {
        Ok(self.with(|s| s.recovery_user.clone()))
    }

    async fn is_running_auto_rejoin(&self) -> GrupoResult<bool> {
        Ok(self.with(|s| s.auto_rejoin))
    }

    async fn drop_users_matching(&self, pattern: &str) -> GrupoResult<Vec<String>> {
        let re = Regex::new(pattern).map_err(|e| GrupoError::internal(e.to_string()))?;
        if self.with(|s| s.fail_drop_users) {
            return Err(GrupoError::database(
                self.endpoint.clone(),
                1396,
                "Operation DROP USER failed",
            ));
        }
        Ok(self.with(|s| {
            let (dropped, kept): (Vec<_>, Vec<_>) =
                s.accounts.drain(..).partition(|(user, _)| re.is_match(user));
            s.accounts = kept;
            let dropped: Vec<String> = dropped
                .into_iter()
                .map(|(user, host)| format!("'{}'@'{}'", user, host))
                .collect();
            for account in &dropped {
                s.statements.push(format!("DROP USER IF EXISTS {}", account));
            }
            dropped
        }))
    }

    async fn drop_user_accounts(&self, user: &str) -> GrupoResult<()> {
        self.with(|s| {
            s.accounts.retain(|(u, _)| u != user);
            s.statements.push(format!("DROP USER '{}'", user));
        });
        Ok(())
    }

    async fn create_replication_account(&self, user: &str, hosts: &[String], _password: &str) -> GrupoResult<()> {
        self.with(|s| {
            for host in hosts {
                s.accounts.push((user.to_string(), host.clone()));
            }
        });

        let racing = {
            let mut state = lock(&self.state);
            match state.record_on_account.take() {
                Some(endpoint) => {
                    let server = state.server_mut(&endpoint);
                    server.join_group(GROUP_NAME);
                    Some((endpoint, server.uuid(), server.local_address()))
                }
                None => None,
            }
        };
        if let Some((endpoint, uuid, local)) = racing {
            record_member(&self.metadata, &endpoint, uuid, local).await;
        }
        Ok(())
    }
}

/// Records requests and simulates the plugin start on the fake servers
pub struct FakeProvisioner {
    state: Shared,
    topology: TopologyMode,
}

impl FakeProvisioner {
    fn provision(&self, command: &str, request: &ProvisionRequest) -> ProvisionOutcome {
        let mut state = lock(&self.state);
        state
            .provision_calls
            .push((command.to_string(), request.clone()));
        if let Some(outcome) = state.provision_outcome.clone() {
            return outcome;
        }

        let group_name = match &request.peer {
            Some(peer) => state
                .server(peer)
                .sysvars
                .get(gr::SYSVAR_GROUP_NAME)
                .cloned()
                .unwrap_or_default(),
            None => request
                .options
                .group_name
                .clone()
                .unwrap_or_else(|| GROUP_NAME.to_string()),
        };
        let size = request.known_member_count.unwrap_or(0) + 1;
        let topology = if request.peer.is_none() {
            if request.multi_primary {
                TopologyMode::MultiPrimary
            } else {
                TopologyMode::SinglePrimary
            }
        } else {
            self.topology
        };
        let starting = request.peer.is_none();

        let server = state.server_mut(&request.instance);
        server.join_group(&group_name);
        let options = &request.options;
        let mut set = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                server.sysvars.insert(name.to_string(), value);
            }
        };
        set(gr::SYSVAR_SSL_MODE, options.ssl_mode.map(|m| m.as_str().to_string()));
        set(gr::SYSVAR_GROUP_SEEDS, options.group_seeds.clone());
        set("group_replication_exit_state_action", options.exit_state_action.clone());
        set("group_replication_consistency", options.consistency.clone());
        set(
            "group_replication_member_expel_timeout",
            options.expel_timeout.map(|v| v.to_string()),
        );
        set(
            "group_replication_member_weight",
            options.member_weight.map(|v| v.to_string()),
        );
        set(
            "group_replication_autorejoin_tries",
            options.auto_rejoin_tries.map(|v| v.to_string()),
        );
        let values = auto_increment_values(topology, size, server.server_id());
        server
            .sysvars
            .insert("auto_increment_increment".into(), values.increment.to_string());
        server
            .sysvars
            .insert("auto_increment_offset".into(), values.offset.to_string());
        server.recovery_user = request.credentials.as_ref().map(|c| c.user.clone());

        if starting && topology == TopologyMode::SinglePrimary {
            state.primary = Some(request.instance.clone());
        }
        ProvisionOutcome {
            exit_code: 0,
            messages: Vec::<ProvisionMessage>::new(),
        }
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn start_replicaset(&self, request: &ProvisionRequest) -> GrupoResult<ProvisionOutcome> {
        Ok(self.provision("start-replicaset", request))
    }

    async fn join_replicaset(&self, request: &ProvisionRequest) -> GrupoResult<ProvisionOutcome> {
        Ok(self.provision("join-replicaset", request))
    }
}
