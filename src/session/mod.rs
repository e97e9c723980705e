/// Sessions to individual MySQL instances
///
/// `InstanceSession` is the only way the orchestrator talks to a server. The
/// required methods are the raw primitives (statements, system variables);
/// the Group Replication verbs have SQL default implementations built on top
/// of them so alternative sessions only need to override what they model.
pub mod mysql;

pub use mysql::{MySqlConnector, MySqlSession};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::core::{MemberState, Version};
use crate::error::{GrupoError, GrupoResult};

/// A result row in text form, `None` for SQL NULL
pub type Row = Vec<Option<String>>;

/// Scope a system variable is read from or written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarQualifier {
    Session,
    Global,
    /// Global and persisted to `mysqld-auto.cnf`
    Persist,
    /// Persisted only, takes effect on the next restart
    PersistOnly,
}

impl VarQualifier {
    pub fn keyword(&self) -> &'static str {
        match self {
            VarQualifier::Session => "SESSION",
            VarQualifier::Global => "GLOBAL",
            VarQualifier::Persist => "PERSIST",
            VarQualifier::PersistOnly => "PERSIST_ONLY",
        }
    }
}

/// Value written to a system variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysvarValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl SysvarValue {
    /// SQL literal for a `SET` statement
    pub fn to_sql(&self) -> String {
        match self {
            SysvarValue::Str(s) => quote_string(s),
            SysvarValue::Int(i) => i.to_string(),
            SysvarValue::Bool(true) => "ON".to_string(),
            SysvarValue::Bool(false) => "OFF".to_string(),
        }
    }
}

impl fmt::Display for SysvarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysvarValue::Str(s) => f.write_str(s),
            SysvarValue::Int(i) => write!(f, "{}", i),
            SysvarValue::Bool(true) => f.write_str("ON"),
            SysvarValue::Bool(false) => f.write_str("OFF"),
        }
    }
}

impl From<&str> for SysvarValue {
    fn from(s: &str) -> Self {
        SysvarValue::Str(s.to_string())
    }
}

impl From<String> for SysvarValue {
    fn from(s: String) -> Self {
        SysvarValue::Str(s)
    }
}

impl From<i64> for SysvarValue {
    fn from(i: i64) -> Self {
        SysvarValue::Int(i)
    }
}

impl From<bool> for SysvarValue {
    fn from(b: bool) -> Self {
        SysvarValue::Bool(b)
    }
}

/// One row of `performance_schema.replication_group_members`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub uuid: String,
    pub host: String,
    pub port: u16,
    pub state: MemberState,
}

impl GroupMember {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Quote a string literal for MySQL
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Reject anything that is not a plain system variable name
pub fn check_sysvar_name(name: &str) -> GrupoResult<()> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(GrupoError::internal(format!("Invalid system variable name '{}'", name)))
    }
}

/// Parse a MySQL boolean rendering (`ON`, `1`, `TRUE`, `YES`)
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_uppercase().as_str(),
        "ON" | "1" | "TRUE" | "YES"
    )
}

fn first_column(row: Option<Row>) -> Option<String> {
    row.and_then(|r| r.into_iter().next()).flatten()
}

#[async_trait]
pub trait InstanceSession: Send + Sync {
    /// `host:port` the session was opened against
    fn endpoint(&self) -> &str;

    async fn version(&self) -> GrupoResult<Version>;

    async fn execute(&self, sql: &str) -> GrupoResult<()>;

    async fn query_rows(&self, sql: &str) -> GrupoResult<Vec<Row>>;

    async fn close(&self) -> GrupoResult<()>;

    async fn query_row(&self, sql: &str) -> GrupoResult<Option<Row>> {
        Ok(self.query_rows(sql).await?.into_iter().next())
    }

    async fn get_sysvar(&self, name: &str, qualifier: VarQualifier) -> GrupoResult<Option<String>> {
        check_sysvar_name(name)?;
        let scope = match qualifier {
            VarQualifier::Session => "SESSION",
            _ => "GLOBAL",
        };
        let row = self.query_row(&format!("SELECT @@{}.{}", scope, name)).await?;
        Ok(first_column(row))
    }

    async fn set_sysvar(
        &self,
        name: &str,
        value: &SysvarValue,
        qualifier: VarQualifier,
    ) -> GrupoResult<()> {
        check_sysvar_name(name)?;
        self.execute(&format!("SET {} {} = {}", qualifier.keyword(), name, value.to_sql()))
            .await
    }

    async fn set_sysvar_default(&self, name: &str, qualifier: VarQualifier) -> GrupoResult<()> {
        check_sysvar_name(name)?;
        self.execute(&format!("SET {} {} = DEFAULT", qualifier.keyword(), name))
            .await
    }

    async fn get_sysvar_bool(&self, name: &str, qualifier: VarQualifier) -> GrupoResult<Option<bool>> {
        Ok(self.get_sysvar(name, qualifier).await?.map(|v| parse_bool(&v)))
    }

    async fn get_sysvar_int(&self, name: &str, qualifier: VarQualifier) -> GrupoResult<Option<i64>> {
        match self.get_sysvar(name, qualifier).await? {
            Some(v) => v.trim().parse::<i64>().map(Some).map_err(|_| {
                GrupoError::internal(format!(
                    "Unexpected non-integer value '{}' for '{}' on '{}'",
                    v,
                    name,
                    self.endpoint()
                ))
            }),
            None => Ok(None),
        }
    }

    /// `report_host` if set, otherwise `hostname`
    async fn report_host(&self) -> GrupoResult<String> {
        let row = self.query_row("SELECT COALESCE(@@report_host, @@hostname)").await?;
        first_column(row).ok_or_else(|| {
            GrupoError::internal(format!("Unable to determine report host of '{}'", self.endpoint()))
        })
    }

    async fn server_uuid(&self) -> GrupoResult<String> {
        self.get_sysvar("server_uuid", VarQualifier::Global)
            .await?
            .ok_or_else(|| GrupoError::internal(format!("No server_uuid on '{}'", self.endpoint())))
    }

    async fn server_id(&self) -> GrupoResult<u64> {
        let id = self.get_sysvar_int("server_id", VarQualifier::Global).await?.unwrap_or(0);
        Ok(id.max(0) as u64)
    }

    /// Where a variable's current value came from (`COMPILED`, `PERSISTED`, ...)
    async fn sysvar_source(&self, name: &str) -> GrupoResult<Option<String>> {
        check_sysvar_name(name)?;
        let row = self
            .query_row(&format!(
                "SELECT variable_source FROM performance_schema.variables_info \
                 WHERE variable_name = {}",
                quote_string(name)
            ))
            .await?;
        Ok(first_column(row))
    }

    async fn member_state(&self) -> GrupoResult<MemberState> {
        let row = self
            .query_row(
                "SELECT member_state FROM performance_schema.replication_group_members \
                 WHERE member_id = @@server_uuid",
            )
            .await?;
        match first_column(row) {
            Some(state) => state.parse(),
            None => Ok(MemberState::Missing),
        }
    }

    async fn group_members(&self) -> GrupoResult<Vec<GroupMember>> {
        let rows = self
            .query_rows(
                "SELECT member_id, member_host, member_port, member_state \
                 FROM performance_schema.replication_group_members",
            )
            .await?;
        let mut members = Vec::new();
        for row in rows {
            let mut cols = row.into_iter();
            let uuid = cols.next().flatten().unwrap_or_default();
            if uuid.is_empty() {
                continue;
            }
            let host = cols.next().flatten().unwrap_or_default();
            let port = cols.next().flatten().and_then(|p| p.parse().ok()).unwrap_or(0);
            let state = cols.next().flatten().unwrap_or_default().parse()?;
            members.push(GroupMember { uuid, host, port, state });
        }
        Ok(members)
    }

    /// UUID of the primary, empty when the group runs multi-primary
    async fn primary_member_uuid(&self) -> GrupoResult<String> {
        let row = self
            .query_row(
                "SELECT variable_value FROM performance_schema.global_status \
                 WHERE variable_name = 'group_replication_primary_member'",
            )
            .await?;
        Ok(first_column(row).unwrap_or_default())
    }

    async fn has_quorum(&self) -> GrupoResult<bool> {
        let row = self
            .query_row(
                "SELECT CAST(SUM(IF(member_state = 'UNREACHABLE', 1, 0)) AS SIGNED), COUNT(*) \
                 FROM performance_schema.replication_group_members",
            )
            .await?
            .unwrap_or_default();
        let mut cols = row.into_iter();
        let unreachable: u64 = cols.next().flatten().and_then(|v| v.parse().ok()).unwrap_or(0);
        let total: u64 = cols.next().flatten().and_then(|v| v.parse().ok()).unwrap_or(0);
        Ok(total > 0 && 2 * (total - unreachable.min(total)) > total)
    }

    async fn plugin_status(&self, plugin: &str) -> GrupoResult<Option<String>> {
        let row = self
            .query_row(&format!(
                "SELECT plugin_status FROM information_schema.plugins WHERE plugin_name = {}",
                quote_string(plugin)
            ))
            .await?;
        Ok(first_column(row))
    }

    async fn stop_group_replication(&self) -> GrupoResult<()> {
        self.execute("STOP GROUP_REPLICATION").await
    }

    async fn group_protocol_version(&self) -> GrupoResult<Version> {
        let row = self
            .query_row("SELECT group_replication_get_communication_protocol()")
            .await?;
        let raw = first_column(row).unwrap_or_default();
        raw.parse().map_err(GrupoError::internal)
    }

    async fn set_group_protocol_version(&self, version: Version) -> GrupoResult<()> {
        self.execute(&format!(
            "SELECT group_replication_set_communication_protocol('{}')",
            version
        ))
        .await
    }

    /// Account used by the recovery channel to replicate from a donor
    async fn recovery_user(&self) -> GrupoResult<Option<String>> {
        let row = self
            .query_row(
                "SELECT user_name FROM mysql.slave_master_info \
                 WHERE channel_name = 'group_replication_recovery'",
            )
            .await?;
        Ok(first_column(row).filter(|u| !u.is_empty()))
    }

    async fn is_running_auto_rejoin(&self) -> GrupoResult<bool> {
        let row = self
            .query_row(
                "SELECT COUNT(*) FROM performance_schema.events_stages_current \
                 WHERE event_name LIKE '%auto-rejoin%'",
            )
            .await?;
        let count: u64 = first_column(row).and_then(|c| c.parse().ok()).unwrap_or(0);
        Ok(count > 0)
    }

    /// Drop every account whose user name matches `pattern` (a MySQL REGEXP).
    /// Returns the dropped `'user'@'host'` accounts.
    async fn drop_users_matching(&self, pattern: &str) -> GrupoResult<Vec<String>> {
        let rows = self
            .query_rows(&format!(
                "SELECT user, host FROM mysql.user WHERE user REGEXP {}",
                quote_string(pattern)
            ))
            .await?;
        let mut dropped = Vec::new();
        for row in rows {
            let mut cols = row.into_iter();
            let user = cols.next().flatten().unwrap_or_default();
            let host = cols.next().flatten().unwrap_or_default();
            let account = format!("{}@{}", quote_string(&user), quote_string(&host));
            self.execute(&format!("DROP USER IF EXISTS {}", account)).await?;
            dropped.push(account);
        }
        Ok(dropped)
    }

    /// Drop the account `user` for every host it is defined on
    async fn drop_user_accounts(&self, user: &str) -> GrupoResult<()> {
        let rows = self
            .query_rows(&format!(
                "SELECT host FROM mysql.user WHERE user = {}",
                quote_string(user)
            ))
            .await?;
        for row in rows {
            let host = first_column(Some(row)).unwrap_or_default();
            self.execute(&format!(
                "DROP USER IF EXISTS {}@{}",
                quote_string(user),
                quote_string(&host)
            ))
            .await?;
        }
        Ok(())
    }

    /// Create `user` on each host pattern with `REPLICATION SLAVE`
    async fn create_replication_account(
        &self,
        user: &str,
        hosts: &[String],
        password: &str,
    ) -> GrupoResult<()> {
        for host in hosts {
            let account = format!("{}@{}", quote_string(user), quote_string(host));
            self.execute(&format!(
                "CREATE USER IF NOT EXISTS {} IDENTIFIED BY {}",
                account,
                quote_string(password)
            ))
            .await?;
            self.execute(&format!("GRANT REPLICATION SLAVE ON *.* TO {}", account))
                .await?;
        }
        Ok(())
    }

    /// `None` below 8.0.11, otherwise whether persisted settings load on boot
    async fn is_set_persist_supported(&self) -> GrupoResult<Option<bool>> {
        if self.version().await? < Version::SET_PERSIST {
            return Ok(None);
        }
        Ok(Some(
            self.get_sysvar_bool("persisted_globals_load", VarQualifier::Global)
                .await?
                .unwrap_or(false),
        ))
    }
}

/// Opens sessions to cluster members with one set of credentials
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> GrupoResult<Arc<dyn InstanceSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_string() {
        assert_eq!(quote_string("abc"), "'abc'");
        assert_eq!(quote_string("it's"), "'it\\'s'");
        assert_eq!(quote_string("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_sysvar_value_sql() {
        assert_eq!(SysvarValue::from("ROW").to_sql(), "'ROW'");
        assert_eq!(SysvarValue::from(7i64).to_sql(), "7");
        assert_eq!(SysvarValue::from(false).to_sql(), "OFF");
        assert_eq!(SysvarValue::from(true).to_string(), "ON");
    }

    #[test]
    fn test_check_sysvar_name() {
        assert!(check_sysvar_name("group_replication_group_seeds").is_ok());
        assert!(check_sysvar_name("x; DROP TABLE t").is_err());
        assert!(check_sysvar_name("").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("ON"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("OFF"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn test_qualifier_keyword() {
        assert_eq!(VarQualifier::PersistOnly.keyword(), "PERSIST_ONLY");
        assert_eq!(VarQualifier::Global.keyword(), "GLOBAL");
    }
}
