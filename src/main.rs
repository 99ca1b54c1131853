mod arm;
mod config;
mod error;
mod resource;
mod stages;

/// Version injected at compile time via AZPROV_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("AZPROV_VERSION") {
    Some(v) => v,
    None => "dev",
};

use arm::auth::AzureCredentials;
use arm::client::ArmClient;
use clap::{Parser, Subcommand, ValueEnum};
use config::Settings;
use error::{ProvisionError, Result};
use stages::StageContext;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Idempotent Azure provisioning pipeline
#[derive(Parser, Debug)]
#[command(name = "azprov", version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    stage: Stage,

    /// Resource group to reconcile into
    #[arg(short = 'g', long, global = true)]
    resource_group: Option<String>,

    /// Azure region (defaults to the resource group's location)
    #[arg(short, long, global = true)]
    location: Option<String>,

    /// YAML file with default option values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Append export lines to this file for the next stage
    #[arg(long, global = true)]
    output_env: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Pipeline stages, in the order the former numbered scripts ran them.
#[derive(Subcommand, Debug)]
enum Stage {
    /// Create the API Management instance and poll it to completion
    Apim {
        /// Instance name (generated with a random suffix if absent)
        #[arg(long)]
        name: Option<String>,
        /// SKU tier (Consumption, Developer, Basic, Standard, Premium, BasicV2, StandardV2)
        #[arg(long)]
        sku: Option<String>,
        /// Publisher contact email
        #[arg(long)]
        publisher_email: Option<String>,
        /// Publisher organization name
        #[arg(long)]
        publisher_name: Option<String>,
        /// Virtual network integration mode (None, External, Internal)
        #[arg(long)]
        vnet_mode: Option<String>,
        /// Subnet resource ID for VNet integration
        #[arg(long)]
        subnet_id: Option<String>,
        /// Request a system-assigned managed identity
        #[arg(long)]
        system_identity: bool,
        /// Seconds between provisioning status polls
        #[arg(long)]
        poll_interval_secs: Option<u64>,
        /// Give up polling after this many minutes
        #[arg(long)]
        poll_timeout_mins: Option<u64>,
    },
    /// Create the virtual network and APIM subnet
    Network {
        /// Virtual network name
        #[arg(long)]
        vnet_name: Option<String>,
        /// VNet integration mode (None skips creation)
        #[arg(long)]
        mode: Option<String>,
        /// VNet address prefix
        #[arg(long)]
        vnet_prefix: Option<String>,
        /// Subnet name
        #[arg(long)]
        subnet_name: Option<String>,
        /// Subnet address prefix
        #[arg(long)]
        subnet_prefix: Option<String>,
    },
    /// Peer two virtual networks in both directions
    Peering {
        /// Local virtual network name
        #[arg(long)]
        vnet_name: Option<String>,
        /// Remote virtual network name
        #[arg(long)]
        peer_vnet_name: Option<String>,
        /// Resource group of the remote network (defaults to the local one)
        #[arg(long)]
        peer_resource_group: Option<String>,
    },
    /// Select or create the Key Vault
    Keyvault {
        /// Vault name (required when several vaults exist in the group)
        #[arg(long)]
        name: Option<String>,
    },
    /// Create the user-assigned managed identity
    Identity {
        /// Identity name
        #[arg(long)]
        name: Option<String>,
        /// Probe only, never create
        #[arg(long)]
        no_create: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

/// Logs go to stderr so stdout stays machine-consumable (export lines only).
fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .expect("Failed to open log file");

            let (non_blocking, guard) = tracing_appender::non_blocking(file);

            tracing_subscriber::fmt()
                .with_max_level(tracing_level)
                .with_writer(
                    std::io::stderr
                        .with_max_level(tracing_level)
                        .and(non_blocking),
                )
                .with_ansi(false)
                .with_target(false)
                .init();

            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(tracing_level)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();

            None
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level, args.log_file.as_ref());

    tracing::debug!("azprov {} starting", VERSION);

    if let Err(err) = run(args).await {
        match &err {
            ProvisionError::Api(inner) => {
                eprintln!("[ERROR] {}", arm::client::format_arm_error(inner))
            }
            _ => eprintln!("[ERROR] {err}"),
        }
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = build_settings(&args)?;

    let resource_group = settings.resource_group()?.to_string();

    // Fail on missing keys and disallowed values before touching the network
    match &args.stage {
        Stage::Apim { .. } => stages::apim::preflight(&settings)?,
        Stage::Network { .. } => stages::network::preflight(&settings)?,
        Stage::Peering { .. } => stages::peering::preflight(&settings)?,
        Stage::Keyvault { .. } => stages::keyvault::preflight(&settings)?,
        Stage::Identity { .. } => {}
    }

    let credentials = AzureCredentials::from_env()?;
    let subscription_id = arm::auth::default_subscription()?;
    let client = ArmClient::new(credentials, &subscription_id)?;

    let location = resolve_location(&client, &settings, &resource_group).await?;
    tracing::info!(
        "Using resource group: {}, location: {}",
        resource_group,
        location
    );

    let ctx = StageContext {
        client,
        settings,
        resource_group,
        location,
    };

    let outputs = match &args.stage {
        Stage::Apim { .. } => stages::apim::run(&ctx).await?,
        Stage::Network { .. } => stages::network::run(&ctx).await?,
        Stage::Peering { .. } => stages::peering::run(&ctx).await?,
        Stage::Keyvault { .. } => stages::keyvault::run(&ctx).await?,
        Stage::Identity { .. } => stages::identity::run(&ctx).await?,
    };

    outputs.emit();

    if let Some(path) = ctx.settings.output_env.as_ref() {
        outputs.append_env_file(path)?;
        tracing::info!("Exports appended to {}", path.display());
    }

    Ok(())
}

/// Merge option sources: CLI flags > environment > defaults file > built-ins.
fn build_settings(args: &Args) -> Result<Settings> {
    let file = Settings::load_file(args.config.as_deref())?;
    let env = Settings::from_env();

    let mut cli = Settings {
        resource_group: args.resource_group.clone(),
        location: args.location.clone(),
        output_env: args.output_env.clone(),
        ..Settings::default()
    };

    match &args.stage {
        Stage::Apim {
            name,
            sku,
            publisher_email,
            publisher_name,
            vnet_mode,
            subnet_id,
            system_identity,
            poll_interval_secs,
            poll_timeout_mins,
        } => {
            cli.apim_name = name.clone();
            cli.apim_sku = sku.clone();
            cli.publisher_email = publisher_email.clone();
            cli.publisher_name = publisher_name.clone();
            cli.vnet_mode = vnet_mode.clone();
            cli.apim_subnet_id = subnet_id.clone();
            cli.apim_system_identity = if *system_identity { Some(true) } else { None };
            cli.poll_interval_secs = *poll_interval_secs;
            cli.poll_timeout_mins = *poll_timeout_mins;
        }
        Stage::Network {
            vnet_name,
            mode,
            vnet_prefix,
            subnet_name,
            subnet_prefix,
        } => {
            cli.vnet_name = vnet_name.clone();
            cli.vnet_mode = mode.clone();
            cli.vnet_prefix = vnet_prefix.clone();
            cli.subnet_name = subnet_name.clone();
            cli.subnet_prefix = subnet_prefix.clone();
        }
        Stage::Peering {
            vnet_name,
            peer_vnet_name,
            peer_resource_group,
        } => {
            cli.vnet_name = vnet_name.clone();
            cli.peer_vnet_name = peer_vnet_name.clone();
            cli.peer_resource_group = peer_resource_group.clone();
        }
        Stage::Keyvault { name } => {
            cli.keyvault_name = name.clone();
        }
        Stage::Identity { name, no_create } => {
            cli.identity_name = name.clone();
            cli.create_identity = if *no_create { Some(false) } else { None };
        }
    }

    Ok(file.overlay(env).overlay(cli))
}

/// Region comes from settings when given, otherwise from the resource group.
/// The group itself is a hard dependency and is never auto-created.
async fn resolve_location(
    client: &ArmClient,
    settings: &Settings,
    resource_group: &str,
) -> Result<String> {
    if let Some(location) = settings.location.as_deref() {
        return Ok(location.to_string());
    }

    match arm::groups::get_resource_group(client, resource_group).await? {
        Some(group) => {
            tracing::debug!(
                "Detected location '{}' from resource group '{}'",
                group.location,
                group.name
            );
            Ok(group.location)
        }
        None => Err(ProvisionError::missing_dependency(
            "resource group",
            resource_group,
            resource_group,
        )),
    }
}
