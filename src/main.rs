use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use grupo::config::{Config, ConfigError, LoggingConfig};
use grupo::core::Notices;
use grupo::metadata::{MetadataStore, MySqlMetadata};
use grupo::provision::ProcessProvisioner;
use grupo::session::mysql::Credentials;
use grupo::session::MySqlConnector;
use grupo::{
    AddInstanceOptions, Cluster, GroupReplicationOptions, InstanceOptionValue, InvalidConfig,
    Orchestrator, RemoveInstanceOptions, ReplicaSet, SslMode,
};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

#[derive(Parser)]
#[command(name = "grupo")]
#[command(about = "Membership and configuration orchestration for MySQL Group Replication clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Grupo Team")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/grupo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Group Replication settings shared by the membership commands
#[derive(Args, Debug, Default)]
struct GrArgs {
    /// memberSslMode (AUTO, DISABLED, REQUIRED)
    #[arg(long)]
    ssl_mode: Option<String>,
    /// Hosts allowed to connect to the group communication port
    #[arg(long)]
    ip_allowlist: Option<String>,
    /// Group communication address of the instance (host:port)
    #[arg(long)]
    local_address: Option<String>,
    /// Comma separated group seeds
    #[arg(long)]
    group_seeds: Option<String>,
    /// Group name when bootstrapping a new group
    #[arg(long)]
    group_name: Option<String>,
    #[arg(long)]
    exit_state_action: Option<String>,
    #[arg(long)]
    member_weight: Option<i64>,
    #[arg(long)]
    consistency: Option<String>,
    #[arg(long)]
    expel_timeout: Option<i64>,
    #[arg(long)]
    auto_rejoin_tries: Option<i64>,
}

impl GrArgs {
    fn into_options(self) -> Result<GroupReplicationOptions> {
        let ssl_mode = match self.ssl_mode {
            Some(mode) => Some(mode.parse::<SslMode>()?),
            None => None,
        };
        Ok(GroupReplicationOptions {
            ssl_mode,
            ip_allowlist: self.ip_allowlist,
            local_address: self.local_address,
            group_seeds: self.group_seeds,
            group_name: self.group_name,
            exit_state_action: self.exit_state_action,
            member_weight: self.member_weight,
            consistency: self.consistency,
            expel_timeout: self.expel_timeout,
            auto_rejoin_tries: self.auto_rejoin_tries,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Add an instance to the replica-set, bootstrapping the group if it is empty
    AddInstance {
        /// Instance to add (host:port)
        endpoint: String,
        #[command(flatten)]
        gr: GrArgs,
        /// Label recorded in the metadata
        #[arg(long)]
        label: Option<String>,
        /// Bootstrap the group on this instance
        #[arg(long)]
        force_seed: bool,
        /// Skip peers refusing the connection while updating their seeds
        #[arg(long)]
        tolerate_connection_refused: bool,
    },
    /// Rejoin an instance that left the group
    RejoinInstance {
        endpoint: String,
        #[command(flatten)]
        gr: GrArgs,
    },
    /// Remove an instance from the replica-set
    RemoveInstance {
        endpoint: String,
        /// Remove from the metadata even if the instance cannot be reached
        #[arg(long)]
        force: bool,
        /// Keep the account the instance used for recovery
        #[arg(long)]
        keep_recovery_user: bool,
        #[arg(long)]
        tolerate_connection_refused: bool,
    },
    /// Restore quorum using the partition the given instance belongs to
    ForceQuorum {
        /// ONLINE instance of the surviving partition
        partition: String,
    },
    /// Report the settings of an instance Group Replication rejects
    CheckInstance {
        endpoint: String,
        /// Option file of the instance
        #[arg(long)]
        option_file: Option<PathBuf>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fix the settings of an instance for Group Replication
    ConfigureInstance {
        endpoint: String,
        #[arg(long)]
        option_file: Option<PathBuf>,
    },
    /// Change one option of a replica-set member
    SetInstanceOption {
        endpoint: String,
        /// label, exitStateAction, memberWeight or autoRejoinTries
        option: String,
        value: String,
    },
    /// Generate example configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { output } => generate_config(output),
        Commands::Validate => validate_config(cli.config),
        Commands::Version => {
            show_version();
            Ok(())
        }
        command => run(cli.config, command).await,
    }
}

async fn run(config_path: PathBuf, command: Commands) -> Result<()> {
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_logging(&config.logging)?;
    info!("grupo v{} using {:?}", env!("CARGO_PKG_VERSION"), config_path);

    let orchestrator = build_orchestrator(&config)?;

    match command {
        Commands::CheckInstance {
            endpoint,
            option_file,
            json,
        } => {
            let invalid = orchestrator
                .check_instance(&endpoint, option_file.as_deref())
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&invalid)?);
            } else {
                print_invalid(&endpoint, &invalid);
            }
            return Ok(());
        }
        Commands::ConfigureInstance {
            endpoint,
            option_file,
        } => {
            let (invalid, outcome) = orchestrator
                .configure_instance(&endpoint, option_file.as_deref())
                .await?;
            print_invalid(&endpoint, &invalid);
            for followup in &outcome.manual_followups {
                println!(
                    "Set '{}' to '{}' in the option file of '{}'",
                    followup.var_name, followup.required_val, endpoint
                );
            }
            if outcome.restart_required {
                println!("Restart '{}' for the changes to take effect.", endpoint);
            }
            return Ok(());
        }
        _ => {}
    }

    let (cluster, replicaset) = load_replicaset(&config, &orchestrator).await?;
    let result = run_membership(&orchestrator, &replicaset, command).await;
    if let Err(e) = cluster.disconnect().await {
        warn!("Error closing the cluster session: {}", e);
    }
    let notices = result?;
    for notice in notices.iter() {
        println!("{}", notice);
    }
    Ok(())
}

async fn run_membership(
    orchestrator: &Orchestrator,
    replicaset: &ReplicaSet,
    command: Commands,
) -> Result<Notices> {
    let notices = match command {
        Commands::AddInstance {
            endpoint,
            gr,
            label,
            force_seed,
            tolerate_connection_refused,
        } => {
            let options = AddInstanceOptions {
                gr: gr.into_options()?,
                label,
                force_seed,
                tolerate_connection_refused: tolerate_connection_refused.then_some(true),
                ..Default::default()
            };
            orchestrator.add_instance(replicaset, &endpoint, options).await?
        }
        Commands::RejoinInstance { endpoint, gr } => {
            orchestrator
                .rejoin_instance(replicaset, &endpoint, gr.into_options()?)
                .await?
        }
        Commands::RemoveInstance {
            endpoint,
            force,
            keep_recovery_user,
            tolerate_connection_refused,
        } => {
            let options = RemoveInstanceOptions {
                force,
                drop_recovery_user: !keep_recovery_user,
                tolerate_connection_refused: tolerate_connection_refused.then_some(true),
            };
            orchestrator
                .remove_instance(replicaset, &endpoint, options)
                .await?
        }
        Commands::ForceQuorum { partition } => {
            orchestrator
                .force_quorum_using_partition_of(replicaset, &partition)
                .await?
        }
        Commands::SetInstanceOption {
            endpoint,
            option,
            value,
        } => {
            let value = match value.parse::<i64>() {
                Ok(number) => InstanceOptionValue::Int(number),
                Err(_) => InstanceOptionValue::from(value.as_str()),
            };
            orchestrator
                .set_instance_option(replicaset, &endpoint, &option, value)
                .await?
        }
        _ => bail!("not a membership command"),
    };
    Ok(notices)
}

fn credentials(config: &Config) -> Result<Credentials> {
    Ok(Credentials {
        user: config.connection.user.clone(),
        password: config.password()?,
    })
}

fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let credentials = credentials(config)?;
    let connector = MySqlConnector::new(credentials.clone(), config.connect_timeout());

    let mut provisioner = ProcessProvisioner::new(&config.provisioning.helper_path, credentials)
        .with_verbose(config.provisioning.verbose);
    if let Some(interpreter) = &config.provisioning.interpreter {
        provisioner = provisioner.with_interpreter(interpreter);
    }

    Ok(Orchestrator::new(
        Arc::new(connector),
        Arc::new(provisioner),
        config.orchestrator_settings()?,
    ))
}

async fn load_replicaset(
    config: &Config,
    orchestrator: &Orchestrator,
) -> Result<(Arc<Cluster>, ReplicaSet)> {
    let session = orchestrator
        .connector()
        .connect(&config.metadata.endpoint)
        .await
        .with_context(|| format!("Failed to connect to metadata instance {}", config.metadata.endpoint))?;
    let metadata = MySqlMetadata::new(session.clone());

    let record = metadata.replicaset(config.metadata.replicaset_id).await?;
    let name = metadata.cluster_name(record.cluster_id).await?;
    let metadata: Arc<dyn MetadataStore> = Arc::new(metadata);
    let cluster = Cluster::new(record.cluster_id, name, metadata, session);
    let replicaset = ReplicaSet::load(&cluster, record.id).await?;

    info!(
        "Cluster '{}', ReplicaSet '{}' ({})",
        cluster.name(),
        replicaset.name(),
        replicaset.topology()
    );
    Ok((cluster, replicaset))
}

fn print_invalid(endpoint: &str, invalid: &[InvalidConfig]) {
    if invalid.is_empty() {
        println!("The instance '{}' is valid for Group Replication.", endpoint);
        return;
    }

    println!("The instance '{}' needs the following changes:", endpoint);
    println!(
        "  {:<34} {:<14} {:<14} {:<12} {:<14} {}",
        "Variable", "Current", "Config", "Required", "Where", "Restart"
    );
    for row in invalid {
        println!(
            "  {:<34} {:<14} {:<14} {:<12} {:<14} {}",
            row.var_name,
            row.current_val.as_deref().unwrap_or("-"),
            row.config_val.as_deref().unwrap_or("-"),
            row.required_val,
            row.types.to_string(),
            if row.restart { "yes" } else { "no" }
        );
    }
}

fn generate_config(output: PathBuf) -> Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(&output).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  grupo --config {:?} check-instance <host:port>", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  User: {}", config.connection.user);
            println!("  Metadata instance: {}", config.metadata.endpoint);
            println!("  ReplicaSet id: {}", config.metadata.replicaset_id);
            println!("  Provisioning helper: {}", config.provisioning.helper_path);
            println!("  Naming style: {}", config.orchestrator.naming_style);
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("grupo v{}", env!("CARGO_PKG_VERSION"));
    println!("Membership and configuration orchestration for MySQL Group Replication clusters");
    println!();
    println!(
        "Built with Rust {}",
        option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown")
    );
    println!("Target: {}", std::env::consts::ARCH);
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let json = config.format == "json";

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if config.stdout {
        layers.push(if json {
            fmt::layer().json().boxed()
        } else {
            fmt::layer().boxed()
        });
    }
    if let Some(path) = &config.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path))?;
        let writer = Mutex::new(file);
        layers.push(if json {
            fmt::layer().json().with_ansi(false).with_writer(writer).boxed()
        } else {
            fmt::layer().with_ansi(false).with_writer(writer).boxed()
        });
    }

    tracing_subscriber::registry().with(layers).with(filter).try_init()?;
    info!("Logging initialized at level: {}", config.level);
    Ok(())
}
