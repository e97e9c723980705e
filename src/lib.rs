//! Grupo - membership and configuration orchestration for MySQL Group Replication clusters
//!
//! Grupo keeps a set of MySQL servers running the Group Replication plugin
//! consistent with the cluster metadata describing them:
//! 1. Membership: add, rejoin and remove instances, and restore quorum after a partition
//! 2. Configuration: check an instance against the Group Replication requirements and fix it
//!
//! Every operation goes through an [`Orchestrator`] bound to a [`Connector`]
//! (sessions to the members) and a [`Provisioner`] (the step that actually
//! starts or joins the plugin).
pub mod config;
pub mod core;
pub mod error;
pub mod fleet;
pub mod gr;
pub mod metadata;
pub mod provision;
pub mod reconcile;
pub mod replicaset;
pub mod session;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::core::{Cluster, ClusterHandle, MemberState, NamingStyle, Notices, ReplicaSet, TopologyMode, Version};
pub use crate::error::{ConfigError, GrupoError, GrupoResult};
pub use crate::fleet::{Flow, FleetIterator, MemberVisitor};
pub use crate::gr::options::{GroupReplicationOptions, SslMode};
pub use crate::metadata::{MemoryMetadata, MetadataStore, MySqlMetadata};
pub use crate::provision::{ProcessProvisioner, Provisioner};
pub use crate::reconcile::{ConfigureOutcome, InvalidConfig, OptionFile};
pub use crate::replicaset::{
    AddInstanceOptions, InstanceOptionValue, Orchestrator, OrchestratorSettings, RemoveInstanceOptions,
};
pub use crate::session::{Connector, InstanceSession, MySqlConnector};
