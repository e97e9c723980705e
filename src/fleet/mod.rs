/// Fleet iterator: visit replica-set members one at a time
///
/// Members come from the metadata in instance order, filtered by live
/// state. Each visited member gets its own session which is closed before
/// the next member is visited, whatever the visitor returned.
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::{InstanceRecord, MemberState, Notices};
use crate::error::GrupoResult;
use crate::metadata::MetadataStore;
use crate::session::{Connector, InstanceSession};

/// What the iterator does after a visit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Operation applied to every visited member
#[async_trait]
pub trait MemberVisitor: Send {
    async fn visit(
        &mut self,
        member: &InstanceRecord,
        session: &dyn InstanceSession,
        notices: &mut Notices,
    ) -> GrupoResult<Flow>;
}

/// Counters returned by `FleetIterator::run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetSummary {
    pub visited: usize,
    /// Members skipped because the connection was refused
    pub unreachable: Vec<String>,
    pub stopped_early: bool,
}

pub struct FleetIterator<'a> {
    metadata: &'a dyn MetadataStore,
    connector: &'a dyn Connector,
    replicaset_id: u64,
    states: Option<Vec<MemberState>>,
    skip: Vec<String>,
    tolerate_connection_refused: bool,
}

impl<'a> FleetIterator<'a> {
    pub fn new(metadata: &'a dyn MetadataStore, connector: &'a dyn Connector, replicaset_id: u64) -> Self {
        Self {
            metadata,
            connector,
            replicaset_id,
            states: None,
            skip: Vec::new(),
            tolerate_connection_refused: false,
        }
    }

    /// Only visit members in one of `states`
    pub fn states(mut self, states: &[MemberState]) -> Self {
        self.states = Some(states.to_vec());
        self
    }

    /// ONLINE and RECOVERING members
    pub fn active(self) -> Self {
        self.states(&MemberState::ACTIVE)
    }

    pub fn skip<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.skip.push(endpoint.into());
        self
    }

    /// Skip members refusing the connection instead of failing
    pub fn tolerate_connection_refused(mut self, tolerate: bool) -> Self {
        self.tolerate_connection_refused = tolerate;
        self
    }

    pub async fn run<V>(&self, visitor: &mut V, notices: &mut Notices) -> GrupoResult<FleetSummary>
    where
        V: MemberVisitor + ?Sized,
    {
        let members = self
            .metadata
            .get_replicaset_instances(self.replicaset_id, self.states.as_deref())
            .await?;
        let mut summary = FleetSummary::default();

        for member in members
            .iter()
            .filter(|m| !self.skip.iter().any(|s| *s == m.endpoint))
        {
            let session = match self.connector.connect(&member.endpoint).await {
                Ok(session) => session,
                Err(e) if self.tolerate_connection_refused && e.is_connection_refused() => {
                    warn!("Skipping unreachable member '{}': {}", member.endpoint, e);
                    notices.warn(format!(
                        "Could not reach instance '{}' ({}), skipping it.",
                        member.endpoint, e
                    ));
                    summary.unreachable.push(member.endpoint.clone());
                    continue;
                }
                Err(e) => return Err(e),
            };

            debug!("Visiting member '{}' ({})", member.endpoint, member.state);
            let result = visitor.visit(member, session.as_ref(), notices).await;
            if let Err(e) = session.close().await {
                debug!("Error closing session to '{}': {}", member.endpoint, e);
            }
            summary.visited += 1;

            if result? == Flow::Stop {
                summary.stopped_early = true;
                break;
            }
        }

        Ok(summary)
    }
}
