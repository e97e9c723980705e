/// `mysql_async` backed instance sessions
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use super::{Connector, InstanceSession, Row};
use crate::core::Version;
use crate::error::{GrupoError, GrupoResult, CR_CONN_HOST_ERROR, CR_UNKNOWN_HOST};
use crate::utils::split_endpoint;

/// Login options shared by every session the connector opens
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

/// Opens `MySqlSession`s
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    credentials: Credentials,
    connect_timeout: Duration,
}

impl MySqlConnector {
    pub fn new(credentials: Credentials, connect_timeout: Duration) -> Self {
        Self {
            credentials,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(&self, endpoint: &str) -> GrupoResult<Arc<dyn InstanceSession>> {
        let session = MySqlSession::connect(endpoint, &self.credentials, self.connect_timeout).await?;
        Ok(Arc::new(session))
    }
}

/// Classic protocol session to one server. Statements are serialised.
pub struct MySqlSession {
    endpoint: String,
    conn: Mutex<Option<Conn>>,
    version: OnceCell<Version>,
}

impl MySqlSession {
    pub async fn connect(
        endpoint: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> GrupoResult<Self> {
        let (host, port) = split_endpoint(endpoint)?;
        let opts = OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(port)
            .prefer_socket(false)
            .user(Some(credentials.user.clone()))
            .pass(Some(credentials.password.clone()));

        debug!("Opening session to '{}'", endpoint);
        let conn = match tokio::time::timeout(timeout, Conn::new(opts)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(connect_error(endpoint, e)),
            Err(_) => {
                return Err(GrupoError::connection(
                    endpoint,
                    Some(CR_CONN_HOST_ERROR),
                    format!("connection timed out after {}s", timeout.as_secs()),
                ))
            }
        };

        Ok(Self {
            endpoint: endpoint.to_string(),
            conn: Mutex::new(Some(conn)),
            version: OnceCell::new(),
        })
    }

    fn closed(&self) -> GrupoError {
        GrupoError::connection(&self.endpoint, None, "session is closed")
    }
}

fn io_error_code(err: &io::Error) -> Option<u16> {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionReset => Some(CR_CONN_HOST_ERROR),
        io::ErrorKind::NotFound => Some(CR_UNKNOWN_HOST),
        _ => None,
    }
}

fn connect_error(endpoint: &str, err: mysql_async::Error) -> GrupoError {
    match err {
        mysql_async::Error::Server(e) => GrupoError::connection(endpoint, Some(e.code), e.message),
        mysql_async::Error::Io(e) => {
            let code = match &e {
                mysql_async::IoError::Io(io) => io_error_code(io),
                #[allow(unreachable_patterns)]
                _ => None,
            };
            GrupoError::connection(endpoint, code, e.to_string())
        }
        other => GrupoError::connection(endpoint, None, other.to_string()),
    }
}

fn statement_error(endpoint: &str, err: mysql_async::Error) -> GrupoError {
    match err {
        mysql_async::Error::Server(e) => GrupoError::database(endpoint, e.code, e.message),
        other => connect_error(endpoint, other),
    }
}

#[async_trait]
impl InstanceSession for MySqlSession {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn version(&self) -> GrupoResult<Version> {
        let version = self
            .version
            .get_or_try_init(|| async {
                let row = self.query_row("SELECT @@version").await?;
                let raw = row
                    .and_then(|r| r.into_iter().next().flatten())
                    .unwrap_or_default();
                raw.parse::<Version>().map_err(GrupoError::internal)
            })
            .await?;
        Ok(*version)
    }

    async fn execute(&self, sql: &str) -> GrupoResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| self.closed())?;
        debug!("{}: {}", self.endpoint, sql);
        conn.query_drop(sql)
            .await
            .map_err(|e| statement_error(&self.endpoint, e))
    }

    async fn query_rows(&self, sql: &str) -> GrupoResult<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| self.closed())?;
        debug!("{}: {}", self.endpoint, sql);
        let rows: Vec<mysql_async::Row> = conn
            .query(sql)
            .await
            .map_err(|e| statement_error(&self.endpoint, e))?;

        Ok(rows
            .into_iter()
            .map(|mut row| {
                (0..row.len())
                    .map(|i| match row.take_opt::<Option<String>, usize>(i) {
                        Some(Ok(value)) => value,
                        _ => None,
                    })
                    .collect()
            })
            .collect())
    }

    async fn close(&self) -> GrupoResult<()> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            debug!("Closing session to '{}'", self.endpoint);
            conn.disconnect()
                .await
                .map_err(|e| statement_error(&self.endpoint, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_codes() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(io_error_code(&refused), Some(CR_CONN_HOST_ERROR));
        let other = io::Error::new(io::ErrorKind::Other, "other");
        assert_eq!(io_error_code(&other), None);
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let creds = Credentials {
            user: "admin".to_string(),
            password: "secret".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("secret"));
    }

    #[tokio::test]
    async fn test_connect_refused_maps_to_conn_host_error() {
        let creds = Credentials {
            user: "root".to_string(),
            password: String::new(),
        };
        // Port 1 on localhost is not expected to accept connections.
        let result = MySqlSession::connect("127.0.0.1:1", &creds, Duration::from_secs(2)).await;
        match result {
            Err(e) => assert!(matches!(e, GrupoError::Connection { .. })),
            Ok(_) => panic!("connection to a closed port must fail"),
        }
    }
}
