/// Group Replication helpers shared by the membership operations
///
/// System variable names, the auto-increment law, allow-list handling,
/// managed replication accounts, persistence of settings and the
/// communication protocol negotiation.
pub mod options;
pub mod ssl;

pub use options::{GroupReplicationOptions, OptionSupport, SslMode};
pub use ssl::{resolve_cluster_ssl_mode, resolve_instance_ssl_mode};

use std::net::Ipv4Addr;
use tracing::{debug, info};

use crate::core::{Notices, TopologyMode, Version};
use crate::error::{GrupoError, GrupoResult, ER_CANT_INITIALIZE_UDF};
use crate::session::{quote_string, InstanceSession, SysvarValue, VarQualifier};
use crate::utils::{generate_password, random_digits, split_list};

pub const GR_PLUGIN: &str = "group_replication";

pub const SYSVAR_GROUP_NAME: &str = "group_replication_group_name";
pub const SYSVAR_GROUP_SEEDS: &str = "group_replication_group_seeds";
pub const SYSVAR_LOCAL_ADDRESS: &str = "group_replication_local_address";
pub const SYSVAR_FORCE_MEMBERS: &str = "group_replication_force_members";
pub const SYSVAR_START_ON_BOOT: &str = "group_replication_start_on_boot";
pub const SYSVAR_BOOTSTRAP_GROUP: &str = "group_replication_bootstrap_group";
pub const SYSVAR_SSL_MODE: &str = "group_replication_ssl_mode";
pub const SYSVAR_RECOVERY_PUBLIC_KEY: &str = "group_replication_recovery_get_public_key";
pub const SYSVAR_AUTO_INCREMENT_INCREMENT: &str = "auto_increment_increment";
pub const SYSVAR_AUTO_INCREMENT_OFFSET: &str = "auto_increment_offset";

/// Prefix of replication accounts created by the orchestrator
pub const REPLICATION_USER_PREFIX: &str = "mysql_innodb_cluster_r";
/// Matches every account created with `REPLICATION_USER_PREFIX`
pub const REPLICATION_USER_PATTERN: &str = "^mysql_innodb_cluster_r[0-9]{10}";
pub const REPLICATION_PASSWORD_LENGTH: usize = 32;

/// Group size from which multi-primary auto-increment settings follow the size
pub const AUTO_INCREMENT_THRESHOLD: u64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoIncrement {
    pub increment: u64,
    pub offset: u64,
}

/// `auto_increment_increment` / `auto_increment_offset` for one member
pub fn auto_increment_values(topology: TopologyMode, group_size: u64, server_id: u64) -> AutoIncrement {
    match topology {
        TopologyMode::SinglePrimary => AutoIncrement {
            increment: 1,
            offset: 2,
        },
        TopologyMode::MultiPrimary => {
            let n = group_size.max(AUTO_INCREMENT_THRESHOLD);
            AutoIncrement {
                increment: n,
                offset: 1 + server_id % n,
            }
        }
    }
}

fn prefix_to_netmask(prefix: u8) -> Ipv4Addr {
    let bits: u32 = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    Ipv4Addr::from(bits)
}

/// Rewrite IPv4 CIDR entries (`a.b.c.d/n`) to the netmask form accepted by
/// account host patterns; `AUTOMATIC` becomes `%`
pub fn convert_ipwhitelist_to_netmask(allowlist: &str) -> GrupoResult<Vec<String>> {
    if allowlist.trim().eq_ignore_ascii_case("AUTOMATIC") {
        return Ok(vec!["%".to_string()]);
    }

    let mut hosts = Vec::new();
    for entry in split_list(allowlist) {
        let converted = match entry.split_once('/') {
            Some((address, prefix)) => match address.parse::<Ipv4Addr>() {
                Ok(ip) => {
                    let prefix: u8 = prefix
                        .parse()
                        .ok()
                        .filter(|p| *p <= 32)
                        .ok_or_else(|| {
                            GrupoError::invalid_option(format!(
                                "Invalid value for ipWhitelist '{}': subnet value in CIDR \
                                 notation is not valid",
                                entry
                            ))
                        })?;
                    format!("{}/{}", ip, prefix_to_netmask(prefix))
                }
                Err(_) => entry.clone(),
            },
            None => entry.clone(),
        };
        hosts.push(converted);
    }
    Ok(hosts)
}

/// Host patterns for a managed replication account
pub fn replication_user_hosts(allowlist: Option<&str>) -> GrupoResult<Vec<String>> {
    match allowlist {
        None => Ok(vec!["%".to_string()]),
        Some(value) => {
            let hosts = convert_ipwhitelist_to_netmask(value)?;
            if hosts.is_empty() {
                Ok(vec!["%".to_string()])
            } else {
                Ok(hosts)
            }
        }
    }
}

/// Replication account handed to the provisioning step
#[derive(Clone, PartialEq, Eq)]
pub struct ReplicationCredentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for ReplicationCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationCredentials")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

pub fn generate_replication_user_name() -> String {
    format!("{}{}", REPLICATION_USER_PREFIX, random_digits(10))
}

async fn user_exists(session: &dyn InstanceSession, user: &str) -> GrupoResult<bool> {
    let row = session
        .query_row(&format!(
            "SELECT COUNT(*) FROM mysql.user WHERE user = {}",
            quote_string(user)
        ))
        .await?;
    let count: u64 = row
        .and_then(|r| r.into_iter().next().flatten())
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    Ok(count > 0)
}

/// Create a fresh managed replication account on `session`, one entry per
/// allow-list host
pub async fn create_replication_user(
    session: &dyn InstanceSession,
    allowlist: Option<&str>,
) -> GrupoResult<ReplicationCredentials> {
    let hosts = replication_user_hosts(allowlist)?;

    let mut user = generate_replication_user_name();
    while user_exists(session, &user).await? {
        user = generate_replication_user_name();
    }
    let password = generate_password(REPLICATION_PASSWORD_LENGTH);

    info!(
        "Creating replication user '{}' on '{}' for hosts {:?}",
        user,
        session.endpoint(),
        hosts
    );
    session
        .create_replication_account(&user, &hosts, &password)
        .await?;
    Ok(ReplicationCredentials { user, password })
}

/// Outcome of writing settings with the strongest available mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// `SET PERSIST` and the server loads persisted settings on boot
    Durable,
    /// `SET PERSIST`, but `persisted_globals_load` is OFF
    NotLoadedOnBoot,
    /// `SET GLOBAL` only; the server has no `SET PERSIST`
    RuntimeOnly,
}

/// Write every `(name, value)` with `SET PERSIST` when supported, `SET GLOBAL` otherwise
pub async fn persist_sysvars(
    session: &dyn InstanceSession,
    values: &[(&str, SysvarValue)],
) -> GrupoResult<Persistence> {
    let (qualifier, persistence) = match session.is_set_persist_supported().await? {
        Some(true) => (VarQualifier::Persist, Persistence::Durable),
        Some(false) => (VarQualifier::Persist, Persistence::NotLoadedOnBoot),
        None => (VarQualifier::Global, Persistence::RuntimeOnly),
    };
    for (name, value) in values {
        debug!(
            "Setting {} {} = {} on '{}'",
            qualifier.keyword(),
            name,
            value,
            session.endpoint()
        );
        session.set_sysvar(name, value, qualifier).await?;
    }
    Ok(persistence)
}

/// Let recovery fetch the donor's public key when SSL is disabled
pub async fn enable_recovery_public_key(session: &dyn InstanceSession) -> GrupoResult<()> {
    if session.version().await? < Version::RECOVERY_PUBLIC_KEY {
        return Ok(());
    }
    persist_sysvars(session, &[(SYSVAR_RECOVERY_PUBLIC_KEY, SysvarValue::Bool(true))]).await?;
    Ok(())
}

/// The protocol version the group must be downgraded to before `target` can join
pub async fn is_protocol_downgrade_required(
    group: &dyn InstanceSession,
    target: Version,
) -> GrupoResult<Option<Version>> {
    if group.version().await? < Version::PROTOCOL_UDFS {
        return Ok(None);
    }
    let protocol = group.group_protocol_version().await?;
    debug!(
        "Group protocol version reported by '{}': {}",
        group.endpoint(),
        protocol
    );
    if target < protocol {
        Ok(Some(target))
    } else {
        Ok(None)
    }
}

/// Downgrade the group protocol when `target` is older than the group
pub async fn negotiate_protocol_version(
    group: &dyn InstanceSession,
    target: Version,
    notices: &mut Notices,
) -> GrupoResult<()> {
    match is_protocol_downgrade_required(group, target).await {
        Ok(Some(version)) => {
            info!(
                "Downgrading Group Replication protocol version to {} through '{}'",
                version,
                group.endpoint()
            );
            group.set_group_protocol_version(version).await
        }
        Ok(None) => Ok(()),
        // the UDF fails while another member is RECOVERING
        Err(e) if e.code() == Some(ER_CANT_INITIALIZE_UDF) => {
            notices.note(format!(
                "Unable to determine the Group Replication protocol version, while verifying \
                 if a protocol downgrade is required: {}.",
                e
            ));
            Ok(())
        }
        Err(e) => Err(e),
    }
}
