/// Provisioning through the external helper process
///
/// Arguments are written to the helper's stdin as one JSON array followed
/// by a `.` terminator line. The helper reports progress on stdout as JSON
/// objects, one per line, with a `type` and a `msg`.
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::{ProvisionMessage, ProvisionOutcome, ProvisionRequest, Provisioner};
use crate::error::{GrupoError, GrupoResult};
use crate::session::mysql::Credentials;
use crate::utils::split_endpoint;

const EXIT_NOT_FOUND: i32 = 128;
const EXIT_BAD_ARGUMENTS: i32 = 2;
const MASK: &str = "****";

pub struct ProcessProvisioner {
    helper: PathBuf,
    /// Runs the helper when set (`<interpreter> --py -f <helper> <command>`)
    interpreter: Option<PathBuf>,
    verbose: u8,
    credentials: Credentials,
}

impl ProcessProvisioner {
    pub fn new<P: Into<PathBuf>>(helper: P, credentials: Credentials) -> Self {
        Self {
            helper: helper.into(),
            interpreter: None,
            verbose: 0,
            credentials,
        }
    }

    pub fn with_interpreter<P: Into<PathBuf>>(mut self, interpreter: P) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    fn server_arg(&self, endpoint: &str) -> GrupoResult<Value> {
        let (host, port) = split_endpoint(endpoint)?;
        Ok(json!({
            "host": host,
            "port": port,
            "user": self.credentials.user,
            "passwd": self.credentials.password,
        }))
    }

    fn command(&self, name: &str) -> Command {
        let mut command = match &self.interpreter {
            Some(interpreter) => {
                let mut c = Command::new(interpreter);
                c.arg("--py").arg("-f").arg(&self.helper);
                c
            }
            None => Command::new(&self.helper),
        };
        command
            .arg(name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run(&self, name: &str, args: Vec<Value>) -> GrupoResult<ProvisionOutcome> {
        debug!("Calling provisioning helper '{}' with {}", name, masked(&args));

        let mut child = match self.command(name).spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(GrupoError::Provisioning {
                    exit_code: EXIT_NOT_FOUND,
                    details: vec![
                        "mysqlprovision not found. Please verify that mysqlsh is installed correctly."
                            .to_string(),
                    ],
                });
            }
            Err(e) => return Err(e.into()),
        };

        let payload = serde_json::to_string(&args)
            .map_err(|e| GrupoError::internal(format!("Cannot encode provisioning arguments: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.as_bytes()).await?;
            stdin.write_all(b"\n.\n").await?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GrupoError::internal("Provisioning helper has no stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| GrupoError::internal("Provisioning helper has no stderr"))?;

        let read_messages = async {
            let mut messages = Vec::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                match parse_message(&line) {
                    Some(message) => messages.push(message),
                    None => debug!("provisioning: {}", line),
                }
            }
            Ok::<_, io::Error>(messages)
        };
        let read_stderr = async {
            let mut buffer = String::new();
            stderr.read_to_string(&mut buffer).await?;
            Ok::<_, io::Error>(buffer)
        };
        let (messages, errors) = tokio::try_join!(read_messages, read_stderr)?;
        if !errors.trim().is_empty() {
            debug!("provisioning stderr: {}", errors.trim());
        }

        let status = child.wait().await?;
        let exit_code = status.code().unwrap_or(-1);
        info!("Provisioning helper '{}' exited with {}", name, exit_code);

        if exit_code == EXIT_BAD_ARGUMENTS {
            return Err(GrupoError::Provisioning {
                exit_code,
                details: vec!["Error calling mysqlprovision. For more details look at the log.".to_string()],
            });
        }
        Ok(ProvisionOutcome { exit_code, messages })
    }
}

fn parse_message(line: &str) -> Option<ProvisionMessage> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Copy of `args` with every password replaced
fn masked(args: &[Value]) -> String {
    let masked: Vec<Value> = args
        .iter()
        .map(|arg| match arg {
            Value::Object(map) => {
                let mut map = map.clone();
                for key in ["passwd", "rep_user_passwd"] {
                    if map.contains_key(key) {
                        map.insert(key.to_string(), Value::String(MASK.to_string()));
                    }
                }
                Value::Object(map)
            }
            other => other.clone(),
        })
        .collect();
    Value::Array(masked).to_string()
}

/// Keyword arguments understood by the helper
fn kwargs(request: &ProvisionRequest, verbose: u8, start: bool) -> Map<String, Value> {
    let mut map = Map::new();
    let options = &request.options;

    map.insert("verbose".into(), json!(verbose));
    if let Some(credentials) = &request.credentials {
        map.insert("replication_user".into(), json!(credentials.user));
        map.insert("rep_user_passwd".into(), json!(credentials.password));
    }
    if request.skip_user_creation {
        map.insert("skip_rpl_user".into(), json!(true));
    }
    if start {
        let single_primary = if request.multi_primary { "OFF" } else { "ON" };
        map.insert("single_primary".into(), json!(single_primary));
    }
    if let Some(v) = &options.ssl_mode {
        map.insert("ssl_mode".into(), json!(v.as_str()));
    }
    if let Some(v) = &options.ip_allowlist {
        map.insert("ip_whitelist".into(), json!(v));
    }
    if let Some(v) = &options.group_name {
        map.insert("group_name".into(), json!(v));
    }
    if let Some(v) = &options.local_address {
        map.insert("gr_address".into(), json!(v));
    }
    if let Some(v) = &options.group_seeds {
        map.insert("group_seeds".into(), json!(v));
    }
    if let Some(v) = &options.exit_state_action {
        map.insert("exit_state_action".into(), json!(v));
    }
    if let Some(v) = options.member_weight {
        map.insert("member_weight".into(), json!(v));
    }
    if let Some(v) = &options.consistency {
        map.insert("consistency".into(), json!(v));
    }
    if let Some(v) = options.expel_timeout {
        map.insert("expel_timeout".into(), json!(v));
    }
    if let Some(v) = options.auto_rejoin_tries {
        map.insert("auto_rejoin_tries".into(), json!(v));
    }
    if let Some(count) = request.known_member_count {
        map.insert("replicaset_count".into(), json!(count));
    }
    map
}

#[async_trait]
impl Provisioner for ProcessProvisioner {
    async fn start_replicaset(&self, request: &ProvisionRequest) -> GrupoResult<ProvisionOutcome> {
        let args = vec![
            Value::Object(kwargs(request, self.verbose, true)),
            self.server_arg(&request.instance)?,
        ];
        self.run("start-replicaset", args).await
    }

    async fn join_replicaset(&self, request: &ProvisionRequest) -> GrupoResult<ProvisionOutcome> {
        let peer = request
            .peer
            .as_deref()
            .ok_or_else(|| GrupoError::internal("Join request without a peer instance"))?;
        let args = vec![
            Value::Object(kwargs(request, self.verbose, false)),
            self.server_arg(&request.instance)?,
            self.server_arg(peer)?,
        ];
        self.run("join-replicaset", args).await
    }
}
