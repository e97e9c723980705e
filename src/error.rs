/// Unified error handling for grupo
///
/// Every orchestration step returns a `GrupoResult`. The variants follow the
/// failure classes an operator has to tell apart: broken preconditions,
/// version or SSL incompatibilities, network and server errors, provisioning
/// failures and partially applied operations.

use std::fmt;
use std::io;
use thiserror::Error;

/// MySQL client error: can't connect to server (connection refused).
pub const CR_CONN_HOST_ERROR: u16 = 2003;
/// MySQL client error: unknown host.
pub const CR_UNKNOWN_HOST: u16 = 2005;
/// MySQL server error: can't initialize a user defined function.
pub const ER_CANT_INITIALIZE_UDF: u16 = 1123;
/// MySQL server error: access denied for user.
pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;

/// Main error type for grupo operations
#[derive(Debug, Error)]
pub enum GrupoError {
    /// A condition that must hold before mutating the cluster does not hold
    #[error("{message}")]
    Precondition { message: String },

    /// The cluster handle outlived the cluster it was obtained from
    #[error("Cluster object is no longer valid")]
    StaleCluster,

    #[error("Cannot add an instance with the same server UUID ({uuid}) of an active member of the cluster '{member}'. Please change the server UUID of the instance to add, all members must have a unique server UUID.")]
    DuplicateServerUuid { uuid: String, member: String },

    /// The live group name differs from the one recorded in metadata
    #[error("{message}")]
    GroupNameMismatch { message: String },

    /// Instance is not in the member state the operation requires
    #[error("{message}")]
    InvalidState { message: String },

    /// Metadata and the live group disagree about the replica-set
    #[error("{message}")]
    Inconsistent { message: String },

    /// SSL or protocol incompatibility between the target and the group
    #[error("{message}")]
    Compatibility { message: String },

    #[error("Option '{option}' not supported on target server version: '{version}'")]
    UnsupportedOption { option: String, version: String },

    #[error("{message}")]
    InvalidOption { message: String },

    /// Could not open a session to an instance
    #[error("Could not open connection to '{endpoint}': {message}")]
    Connection {
        endpoint: String,
        code: Option<u16>,
        message: String,
    },

    /// Error reported by a server while running a statement
    #[error("MySQL Error {code} ({endpoint}): {message}")]
    Database {
        endpoint: String,
        code: u16,
        message: String,
    },

    /// The provisioning collaborator returned a non-zero exit code
    #[error("{}", provisioning_message(.details))]
    Provisioning { exit_code: i32, details: Vec<String> },

    /// A later step failed after earlier steps were applied; nothing is rolled back
    #[error("{step} failed after the following changes were already applied ({}): {source}", .applied.join(", "))]
    PartialCompletion {
        step: String,
        applied: Vec<String>,
        #[source]
        source: Box<GrupoError>,
    },

    #[error("Metadata error: {message}")]
    Metadata { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn provisioning_message(details: &[String]) -> String {
    if details.is_empty() {
        "Error joining instance to cluster".to_string()
    } else {
        details.join("\n")
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for grupo operations
pub type GrupoResult<T> = Result<T, GrupoError>;

/// Convenience methods for creating specific error types
impl GrupoError {
    pub fn precondition<S: Into<String>>(message: S) -> Self {
        GrupoError::Precondition {
            message: message.into(),
        }
    }

    pub fn group_name_mismatch<S: Into<String>>(message: S) -> Self {
        GrupoError::GroupNameMismatch {
            message: message.into(),
        }
    }

    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        GrupoError::InvalidState {
            message: message.into(),
        }
    }

    pub fn inconsistent<S: Into<String>>(message: S) -> Self {
        GrupoError::Inconsistent {
            message: message.into(),
        }
    }

    pub fn compatibility<S: Into<String>>(message: S) -> Self {
        GrupoError::Compatibility {
            message: message.into(),
        }
    }

    pub fn unsupported_option<S: Into<String>, V: fmt::Display>(option: S, version: V) -> Self {
        GrupoError::UnsupportedOption {
            option: option.into(),
            version: version.to_string(),
        }
    }

    pub fn invalid_option<S: Into<String>>(message: S) -> Self {
        GrupoError::InvalidOption {
            message: message.into(),
        }
    }

    pub fn connection<E: Into<String>, M: Into<String>>(
        endpoint: E,
        code: Option<u16>,
        message: M,
    ) -> Self {
        GrupoError::Connection {
            endpoint: endpoint.into(),
            code,
            message: message.into(),
        }
    }

    pub fn database<E: Into<String>, M: Into<String>>(endpoint: E, code: u16, message: M) -> Self {
        GrupoError::Database {
            endpoint: endpoint.into(),
            code,
            message: message.into(),
        }
    }

    pub fn metadata<S: Into<String>>(message: S) -> Self {
        GrupoError::Metadata {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        GrupoError::Internal {
            message: message.into(),
        }
    }

    /// Wrap an error raised after `applied` steps already took effect
    pub fn partial<S: Into<String>>(step: S, applied: Vec<String>, source: GrupoError) -> Self {
        GrupoError::PartialCompletion {
            step: step.into(),
            applied,
            source: Box::new(source),
        }
    }

    /// Client or server error code carried by this error, if any
    pub fn code(&self) -> Option<u16> {
        match self {
            GrupoError::Connection { code, .. } => *code,
            GrupoError::Database { code, .. } => Some(*code),
            GrupoError::PartialCompletion { source, .. } => source.code(),
            _ => None,
        }
    }

    /// True for the "connection refused" condition the fleet iterator may tolerate
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, GrupoError::Connection { code: Some(CR_CONN_HOST_ERROR), .. })
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        match self {
            GrupoError::Connection { code, .. } => *code != Some(ER_ACCESS_DENIED_ERROR),
            GrupoError::Io(_) => true,
            GrupoError::PartialCompletion { .. } => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GrupoError::Config(_) => ErrorSeverity::Critical,
            GrupoError::Internal { .. } => ErrorSeverity::Critical,
            GrupoError::Inconsistent { .. } => ErrorSeverity::Critical,
            GrupoError::GroupNameMismatch { .. } => ErrorSeverity::Critical,
            GrupoError::PartialCompletion { .. } => ErrorSeverity::Critical,
            GrupoError::Connection { .. } => ErrorSeverity::Warning,
            GrupoError::Io(_) => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Cluster may be left in a state that needs operator attention
    Critical,
    /// The operation was refused or failed without side effects
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
