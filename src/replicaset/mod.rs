/// Membership orchestration for the default replica-set of a cluster
///
/// The `Orchestrator` owns the collaborators every operation needs (the
/// connector opening member sessions and the provisioning step) together
/// with the per-deployment settings. Each operation re-validates the
/// cluster handle and the live state it depends on before mutating anything.
pub mod add;
pub mod auto_increment;
pub mod quorum;
pub mod rejoin;
pub mod remove;
pub mod seeds;
pub mod set_option;

pub use add::AddInstanceOptions;
pub use remove::RemoveInstanceOptions;
pub use seeds::{apply_seeds_change, get_cluster_group_seeds, update_group_seeds, SeedsChange, SeedsUpdate};
pub use set_option::InstanceOptionValue;

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::{Cluster, NamingStyle, ReplicaSet};
use crate::error::{GrupoError, GrupoResult};
use crate::fleet::FleetIterator;
use crate::gr::SYSVAR_GROUP_NAME;
use crate::provision::Provisioner;
use crate::session::{Connector, InstanceSession, VarQualifier};

/// Settings bound to one orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub naming_style: NamingStyle,
    /// Default for skipping members that refuse the connection during fan-out
    pub tolerate_connection_refused: bool,
    /// Pause after persisting variables other writes depend on
    pub persist_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            naming_style: NamingStyle::Camel,
            tolerate_connection_refused: false,
            persist_delay: Duration::from_millis(1),
        }
    }
}

pub struct Orchestrator {
    connector: Arc<dyn Connector>,
    provisioner: Arc<dyn Provisioner>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        connector: Arc<dyn Connector>,
        provisioner: Arc<dyn Provisioner>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            connector,
            provisioner,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// `<Dba>.configureLocalInstance()` rendered in the configured style
    pub(crate) fn dba_command(&self, camel: &str) -> String {
        format!("<Dba>.{}()", self.settings.naming_style.member_name(camel))
    }

    pub(crate) fn cluster_command(&self, camel: &str) -> String {
        format!("<Cluster>.{}()", self.settings.naming_style.member_name(camel))
    }

    pub(crate) async fn connect(&self, endpoint: &str) -> GrupoResult<Arc<dyn InstanceSession>> {
        debug!("Connecting to '{}'", endpoint);
        self.connector.connect(endpoint).await
    }

    /// Iterator over the members of `replicaset_id`, tolerating refused
    /// connections when `tolerate` (or the configured default) says so
    pub(crate) fn fleet<'a>(
        &'a self,
        cluster: &'a Cluster,
        replicaset_id: u64,
        tolerate: Option<bool>,
    ) -> FleetIterator<'a> {
        FleetIterator::new(cluster.metadata().as_ref(), self.connector.as_ref(), replicaset_id)
            .tolerate_connection_refused(tolerate.unwrap_or(self.settings.tolerate_connection_refused))
    }
}

/// The live group name of `session` must be the one recorded for the replica-set
pub(crate) async fn validate_group_name(
    replicaset: &ReplicaSet,
    session: &dyn InstanceSession,
) -> GrupoResult<()> {
    let live = session
        .get_sysvar(SYSVAR_GROUP_NAME, VarQualifier::Global)
        .await?
        .unwrap_or_default();
    let recorded = replicaset.current_group_name().await?.unwrap_or_default();
    if live != recorded {
        return Err(GrupoError::group_name_mismatch(format!(
            "The instance '{}' may belong to a different ReplicaSet as the one registered in \
             the Metadata since the value of 'group_replication_group_name' does not match the \
             one registered in the ReplicaSet's Metadata: possible split-brain scenario. \
             Please remove the instance from the cluster.",
            session.endpoint()
        )));
    }
    Ok(())
}

/// Steps of an operation already applied to the live group. Nothing is
/// rolled back: a later failure is reported together with this list.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    applied: Vec<String>,
}

impl Progress {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn done<S: Into<String>>(&mut self, step: S) {
        self.applied.push(step.into());
    }

    /// `PartialCompletion` for `step` once anything was applied, `error` otherwise
    pub(crate) fn fail<S: Into<String>>(&self, step: S, error: GrupoError) -> GrupoError {
        if self.applied.is_empty() {
            error
        } else {
            GrupoError::partial(step, self.applied.clone(), error)
        }
    }
}

/// Close a session opened for one operation, logging failures
pub(crate) async fn release(session: &Arc<dyn InstanceSession>) {
    if let Err(e) = session.close().await {
        debug!("Error closing session to '{}': {}", session.endpoint(), e);
    }
}
