/// Group seeds propagation
///
/// `group_replication_group_seeds` lists the local addresses a member uses
/// to find the group again. Membership changes edit it on every affected
/// member and persist the result when the server can.
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, warn};

use crate::core::{InstanceRecord, NamingStyle, Notices};
use crate::error::GrupoResult;
use crate::fleet::{Flow, MemberVisitor};
use crate::gr::{persist_sysvars, Persistence, SYSVAR_GROUP_SEEDS, SYSVAR_LOCAL_ADDRESS};
use crate::metadata::MetadataStore;
use crate::session::{Connector, InstanceSession, SysvarValue, VarQualifier};
use crate::utils::split_list;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedsChange {
    /// Append an address unless already listed
    Add(String),
    /// Drop every occurrence of an address
    Remove(String),
    /// Replace the whole list
    Override(String),
}

impl fmt::Display for SeedsChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedsChange::Add(a) => write!(f, "ADD {}", a),
            SeedsChange::Remove(a) => write!(f, "REMOVE {}", a),
            SeedsChange::Override(v) => write!(f, "OVERRIDE '{}'", v),
        }
    }
}

/// New seeds value after applying `change` to `current`
pub fn apply_seeds_change(current: &str, change: &SeedsChange) -> String {
    match change {
        SeedsChange::Add(address) => {
            let mut seeds = split_list(current);
            if !seeds.iter().any(|s| s == address) {
                seeds.push(address.clone());
            }
            seeds.join(",")
        }
        SeedsChange::Remove(address) => split_list(current)
            .into_iter()
            .filter(|s| s != address)
            .collect::<Vec<_>>()
            .join(","),
        SeedsChange::Override(value) => value.clone(),
    }
}

/// Apply `change` to the seeds of the member behind `session` and persist it
pub async fn update_group_seeds(
    session: &dyn InstanceSession,
    change: &SeedsChange,
    naming: NamingStyle,
    notices: &mut Notices,
) -> GrupoResult<()> {
    let current = session
        .get_sysvar(SYSVAR_GROUP_SEEDS, VarQualifier::Global)
        .await?
        .unwrap_or_default();
    let seeds = apply_seeds_change(&current, change);
    debug!(
        "Group seeds of '{}': {} ('{}' -> '{}')",
        session.endpoint(),
        change,
        current,
        seeds
    );

    let persistence = persist_sysvars(session, &[(SYSVAR_GROUP_SEEDS, SysvarValue::from(seeds))]).await?;
    let configure = naming.member_name("configureLocalInstance");
    match persistence {
        Persistence::Durable => {}
        Persistence::NotLoadedOnBoot => notices.warn(format!(
            "On instance '{}' the persisted cluster configuration will not be loaded upon \
             reboot since 'persisted-globals-load' is set to 'OFF'. Please use the \
             <Dba>.{}() command locally to persist the changes or set \
             'persisted-globals-load' to 'ON' on the configuration file.",
            session.endpoint(),
            configure
        )),
        Persistence::RuntimeOnly => notices.warn(format!(
            "On instance '{}' membership change cannot be persisted since MySQL version {} \
             does not support the SET PERSIST command (MySQL version >= 8.0.11 required). \
             Please use the <Dba>.{}() command locally to persist the changes.",
            session.endpoint(),
            session.version().await?,
            configure
        )),
    }
    Ok(())
}

/// Visitor applying one seeds change to every visited member
pub struct SeedsUpdate {
    change: SeedsChange,
    naming: NamingStyle,
}

impl SeedsUpdate {
    pub fn new(change: SeedsChange, naming: NamingStyle) -> Self {
        Self { change, naming }
    }
}

#[async_trait]
impl MemberVisitor for SeedsUpdate {
    async fn visit(
        &mut self,
        _member: &InstanceRecord,
        session: &dyn InstanceSession,
        notices: &mut Notices,
    ) -> GrupoResult<Flow> {
        update_group_seeds(session, &self.change, self.naming, notices).await?;
        Ok(Flow::Continue)
    }
}

/// Local addresses of the active members, read live from each of them.
///
/// Collection stops at the first member that cannot be reached; the
/// addresses gathered so far are returned.
pub async fn get_cluster_group_seeds(
    metadata: &dyn MetadataStore,
    connector: &dyn Connector,
    replicaset_id: u64,
    skip: Option<&str>,
) -> GrupoResult<String> {
    let members = metadata.get_replicaset_active_instances(replicaset_id).await?;
    let mut seeds: Vec<String> = Vec::new();

    for member in members.iter().filter(|m| Some(m.endpoint.as_str()) != skip) {
        let session = match connector.connect(&member.endpoint).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    "Stopped collecting group seeds at '{}': {}",
                    member.endpoint, e
                );
                break;
            }
        };
        let address = session
            .get_sysvar(SYSVAR_LOCAL_ADDRESS, VarQualifier::Global)
            .await;
        if let Err(e) = session.close().await {
            debug!("Error closing session to '{}': {}", member.endpoint, e);
        }
        match address? {
            Some(address) if !address.is_empty() => {
                if !seeds.contains(&address) {
                    seeds.push(address);
                }
            }
            _ => debug!("'{}' has no Group Replication local address", member.endpoint),
        }
    }

    Ok(seeds.join(","))
}
