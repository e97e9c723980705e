/// Bulk update of the auto-increment settings of a multi-primary replica-set
use tracing::info;

use super::{release, Orchestrator};
use crate::core::{Cluster, Notices, ReplicaSet, TopologyMode};
use crate::error::{GrupoError, GrupoResult};
use crate::gr::{
    auto_increment_values, persist_sysvars, Persistence, AUTO_INCREMENT_THRESHOLD,
    SYSVAR_AUTO_INCREMENT_INCREMENT, SYSVAR_AUTO_INCREMENT_OFFSET,
};
use crate::session::{InstanceSession, SysvarValue};

/// True when a membership change across `count` members must recompute the
/// settings of every member
pub fn crosses_threshold(topology: TopologyMode, count: u64) -> bool {
    topology == TopologyMode::MultiPrimary && count > AUTO_INCREMENT_THRESHOLD
}

impl Orchestrator {
    /// Recompute and push `auto_increment_increment`/`auto_increment_offset`
    /// to every member recorded in the metadata. Every member must be active.
    pub(crate) async fn update_auto_increment(
        &self,
        cluster: &Cluster,
        replicaset: &ReplicaSet,
        notices: &mut Notices,
    ) -> GrupoResult<()> {
        let instances = cluster
            .metadata()
            .get_replicaset_instances(replicaset.id(), None)
            .await?;
        let size = instances.len() as u64;
        let topology = replicaset.current_topology().await?;
        info!(
            "Updating auto-increment settings of {} members of '{}'",
            size,
            replicaset.name()
        );

        for instance in &instances {
            if !instance.state.is_active() {
                notices.warn(format!(
                    "Please bring the instance '{}' back ONLINE and use {} on it to update \
                     its auto-increment settings.",
                    instance.endpoint,
                    self.dba_command("configureLocalInstance")
                ));
                return Err(GrupoError::invalid_state(format!(
                    "The instance '{}' is '{}'",
                    instance.endpoint, instance.state
                )));
            }

            let session = self.connect(&instance.endpoint).await?;
            let result = self
                .apply_auto_increment(session.as_ref(), topology, size, notices)
                .await;
            release(&session).await;
            result?;
        }
        Ok(())
    }

    async fn apply_auto_increment(
        &self,
        session: &dyn InstanceSession,
        topology: TopologyMode,
        size: u64,
        notices: &mut Notices,
    ) -> GrupoResult<()> {
        let server_id = session.server_id().await?;
        let values = auto_increment_values(topology, size, server_id);
        let persistence = persist_sysvars(
            session,
            &[
                (SYSVAR_AUTO_INCREMENT_INCREMENT, SysvarValue::Int(values.increment as i64)),
                (SYSVAR_AUTO_INCREMENT_OFFSET, SysvarValue::Int(values.offset as i64)),
            ],
        )
        .await?;

        let configure = self.dba_command("configureLocalInstance");
        match persistence {
            Persistence::Durable => {}
            Persistence::NotLoadedOnBoot => notices.warn(format!(
                "The settings cannot be persisted remotely on instance '{}' because \
                 'persisted-globals-load' is set to 'OFF' and persisted configurations will \
                 not be loaded upon reboot. Please execute the {} command locally to persist \
                 these changes.",
                session.endpoint(),
                configure
            )),
            Persistence::RuntimeOnly => notices.warn(format!(
                "The settings cannot be persisted remotely on instance '{}' because MySQL \
                 version {} does not support the SET PERSIST command (MySQL version >= 8.0.11 \
                 required). Please execute the {} command locally to persist these changes.",
                session.endpoint(),
                session.version().await?,
                configure
            )),
        }
        Ok(())
    }
}
