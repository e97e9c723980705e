/// Provisioning collaborator: starts or joins Group Replication on an instance
///
/// The orchestrator never starts the plugin itself. It resolves every
/// option, then hands a `ProvisionRequest` to a `Provisioner` and
/// translates the outcome.
pub mod process;

pub use process::ProcessProvisioner;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::Notices;
use crate::error::{GrupoError, GrupoResult};
use crate::gr::{GroupReplicationOptions, ReplicationCredentials};

/// Everything needed to start or join Group Replication on `instance`
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub instance: String,
    /// Member of the group to join through; `None` when starting a group
    pub peer: Option<String>,
    pub credentials: Option<ReplicationCredentials>,
    pub multi_primary: bool,
    pub options: GroupReplicationOptions,
    pub skip_user_creation: bool,
    /// Members recorded before this one, when known
    pub known_member_count: Option<u64>,
}

impl ProvisionRequest {
    pub fn start<S: Into<String>>(instance: S, multi_primary: bool, options: GroupReplicationOptions) -> Self {
        Self {
            instance: instance.into(),
            peer: None,
            credentials: None,
            multi_primary,
            options,
            skip_user_creation: false,
            known_member_count: None,
        }
    }

    pub fn join<S: Into<String>>(instance: S, peer: S, options: GroupReplicationOptions) -> Self {
        Self {
            instance: instance.into(),
            peer: Some(peer.into()),
            credentials: None,
            multi_primary: false,
            options,
            skip_user_creation: false,
            known_member_count: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<ReplicationCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn skip_user_creation(mut self, skip: bool) -> Self {
        self.skip_user_creation = skip;
        self
    }

    pub fn known_member_count(mut self, count: Option<u64>) -> Self {
        self.known_member_count = count;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Error,
    Warning,
    Info,
    Debug,
}

/// One structured message reported by the provisioning step
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProvisionMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "msg")]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub exit_code: i32,
    pub messages: Vec<ProvisionMessage>,
}

impl ProvisionOutcome {
    pub fn success() -> Self {
        Self::default()
    }

    /// Surface warnings; a non-zero exit code becomes a `Provisioning` error
    /// carrying the reported diagnostics
    pub fn into_result(self, notices: &mut Notices) -> GrupoResult<()> {
        let mut errors = Vec::new();
        for message in &self.messages {
            match message.kind {
                MessageKind::Warning => notices.warn(message.text.clone()),
                MessageKind::Error => errors.push(format!("ERROR: {}", message.text)),
                MessageKind::Info => tracing::info!("{}", message.text),
                MessageKind::Debug => tracing::debug!("{}", message.text),
            }
        }

        if self.exit_code == 0 {
            return Ok(());
        }
        if errors.is_empty() {
            errors = self
                .messages
                .iter()
                .filter(|m| m.kind == MessageKind::Warning)
                .map(|m| format!("WARNING: {}", m.text))
                .collect();
        }
        Err(GrupoError::Provisioning {
            exit_code: self.exit_code,
            details: errors,
        })
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn start_replicaset(&self, request: &ProvisionRequest) -> GrupoResult<ProvisionOutcome>;

    async fn join_replicaset(&self, request: &ProvisionRequest) -> GrupoResult<ProvisionOutcome>;
}
