/// Resolution of `memberSslMode` for seeding and joining instances
use tracing::debug;

use super::options::SslMode;
use super::SYSVAR_SSL_MODE;
use crate::error::{GrupoError, GrupoResult};
use crate::session::{InstanceSession, VarQualifier};

async fn have_ssl(session: &dyn InstanceSession) -> GrupoResult<bool> {
    let value = session.get_sysvar("have_ssl", VarQualifier::Global).await?;
    Ok(value.map_or(false, |v| v.eq_ignore_ascii_case("YES")))
}

async fn requires_secure_transport(session: &dyn InstanceSession) -> GrupoResult<bool> {
    Ok(session
        .get_sysvar_bool("require_secure_transport", VarQualifier::Global)
        .await?
        .unwrap_or(false))
}

/// SSL mode for the seed of a new replica-set
pub async fn resolve_cluster_ssl_mode(
    session: &dyn InstanceSession,
    requested: Option<SslMode>,
) -> GrupoResult<SslMode> {
    let endpoint = session.endpoint();
    let resolved = if have_ssl(session).await? {
        match requested {
            None | Some(SslMode::Auto) | Some(SslMode::Required) => SslMode::Required,
            Some(SslMode::Disabled) => {
                if requires_secure_transport(session).await? {
                    return Err(GrupoError::compatibility(format!(
                        "The instance '{}' requires secure connections, to create the cluster \
                         either turn off require_secure_transport or use the memberSslMode \
                         option with 'REQUIRED' value.",
                        endpoint
                    )));
                }
                SslMode::Disabled
            }
        }
    } else {
        match requested {
            None | Some(SslMode::Auto) | Some(SslMode::Disabled) => SslMode::Disabled,
            Some(SslMode::Required) => {
                return Err(GrupoError::compatibility(format!(
                    "The instance '{}' does not have SSL enabled, to create the cluster either \
                     use an instance with SSL enabled, remove the memberSslMode option or use \
                     it with any of 'AUTO' or 'DISABLED'.",
                    endpoint
                )));
            }
        }
    };

    debug!("SSL mode used to configure the cluster: {}", resolved);
    Ok(resolved)
}

/// SSL mode for an instance joining a group, checked against the peer's mode
pub async fn resolve_instance_ssl_mode(
    instance: &dyn InstanceSession,
    peer: &dyn InstanceSession,
    requested: Option<SslMode>,
) -> GrupoResult<SslMode> {
    let endpoint = instance.endpoint();
    let peer_mode = peer
        .get_sysvar(SYSVAR_SSL_MODE, VarQualifier::Global)
        .await?
        .unwrap_or_default()
        .to_ascii_uppercase();

    let resolved = match peer_mode.as_str() {
        "REQUIRED" => {
            if requested == Some(SslMode::Disabled) {
                return Err(GrupoError::compatibility(format!(
                    "The cluster has SSL (encryption) enabled. To add the instance '{}' to the \
                     cluster either disable SSL on the cluster, remove the memberSslMode option \
                     or use it with any of 'AUTO' or 'REQUIRED'.",
                    endpoint
                )));
            }
            if !have_ssl(instance).await? {
                return Err(GrupoError::compatibility(format!(
                    "Instance '{}' does not support SSL and cannot join a cluster with SSL \
                     (encryption) enabled. Enable SSL support on the instance and try again, \
                     otherwise it can only be added to a cluster with SSL disabled.",
                    endpoint
                )));
            }
            SslMode::Required
        }
        "DISABLED" => {
            if requested == Some(SslMode::Required) {
                return Err(GrupoError::compatibility(format!(
                    "The cluster has SSL (encryption) disabled. To add the instance '{}' to the \
                     cluster either enable SSL on the cluster, remove the memberSslMode option \
                     or use it with any of 'AUTO' or 'DISABLED'.",
                    endpoint
                )));
            }
            if requires_secure_transport(instance).await? {
                return Err(GrupoError::compatibility(format!(
                    "The instance '{}' is configured to require a secure transport but the \
                     cluster has SSL disabled. To add the instance to the cluster, either turn \
                     OFF the require_secure_transport option on the instance or enable SSL on \
                     the cluster.",
                    endpoint
                )));
            }
            SslMode::Disabled
        }
        other => {
            return Err(GrupoError::compatibility(format!(
                "Unsupported Group Replication SSL Mode for the cluster: '{}'. Make sure the \
                 group_replication_ssl_mode variable is set with the same value for all members.",
                other
            )));
        }
    };

    debug!(
        "SSL mode used to join '{}' (cluster uses {}): {}",
        endpoint, peer_mode, resolved
    );
    Ok(resolved)
}
