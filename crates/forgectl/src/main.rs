use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "forgectl", about = "ForgeHPC cluster lifecycle orchestrator", version)]
struct Cli {
    /// Path to forge.toml.
    #[arg(long, global = true, default_value = "forge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a scaffold forge.toml.
    Init {
        /// Root directory for cluster workspaces.
        #[arg(long)]
        base_dir: PathBuf,
        /// Object storage bucket for bootstrap scripts.
        #[arg(long)]
        bucket: String,
        /// Cloud project the orchestrator runs in.
        #[arg(long)]
        project_id: String,
    },
    /// Manage stored cloud credentials.
    Credential {
        #[command(subcommand)]
        command: CredentialCommands,
    },
    /// Manage the machine type catalog.
    InstanceType {
        #[command(subcommand)]
        command: InstanceTypeCommands,
    },
    /// Define and inspect clusters.
    Cluster {
        #[command(subcommand)]
        command: ClusterCommands,
    },
    /// Create the cluster workspace, install credentials and render assets.
    Prepare {
        id: String,
        /// Service-account JSON to install instead of the stored credential.
        #[arg(long)]
        credentials: Option<PathBuf>,
    },
    /// Re-render the blueprint and bootstrap scripts of a prepared cluster.
    Update { id: String },
    /// Provision the cluster's cloud resources.
    Start {
        id: String,
        /// Seconds between status polls.
        #[arg(long, default_value = "2")]
        poll_interval: u64,
    },
    /// Destroy the cluster's cloud resources.
    Stop {
        id: String,
        /// Seconds between status polls.
        #[arg(long, default_value = "2")]
        poll_interval: u64,
    },
    /// Retry the command-and-control subscription grant.
    RepairPermissions { id: String },
    /// Resolve (or create) the install location for a path on the cluster.
    InstallLocation { id: String, path: String },
    /// Publish a ping to a ready cluster's controller.
    Ping { id: String },
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Store a service-account JSON document.
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum InstanceTypeCommands {
    /// Register a machine type.
    Add {
        name: String,
        #[arg(long)]
        cpus: Option<u32>,
        #[arg(long)]
        memory_mb: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ClusterCommands {
    /// Create a cluster, or replace the layout of an unprovisioned one.
    Import {
        /// Cluster definition in TOML.
        #[arg(long)]
        file: PathBuf,
    },
    /// Show the stored cluster record.
    Status {
        id: String,
        /// Output format (text or json).
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the blueprint the cluster would be compiled from.
    Render { id: String },
    /// List stored clusters.
    List,
    /// Forget a new or destroyed cluster and delete its workspace.
    Remove { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,forgectl=debug,forge=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            base_dir,
            bucket,
            project_id,
        } => commands::init::run(&cli.config, &base_dir, &bucket, &project_id),
        Commands::Credential { command } => match command {
            CredentialCommands::Add { id, file } => commands::catalog::add_credential(&cli.config, &id, &file),
        },
        Commands::InstanceType { command } => match command {
            InstanceTypeCommands::Add {
                name,
                cpus,
                memory_mb,
            } => commands::catalog::add_instance_type(&cli.config, &name, cpus, memory_mb),
        },
        Commands::Cluster { command } => match command {
            ClusterCommands::Import { file } => commands::cluster::import(&cli.config, &file),
            ClusterCommands::Status { id, format } => commands::cluster::status(&cli.config, &id, &format),
            ClusterCommands::Render { id } => commands::cluster::render(&cli.config, &id),
            ClusterCommands::List => commands::cluster::list(&cli.config),
            ClusterCommands::Remove { id } => commands::cluster::remove(&cli.config, &id),
        },
        Commands::Prepare { id, credentials } => {
            commands::lifecycle::prepare(&cli.config, &id, credentials.as_deref()).await
        }
        Commands::Update { id } => commands::lifecycle::update(&cli.config, &id).await,
        Commands::Start { id, poll_interval } => {
            commands::lifecycle::start(&cli.config, &id, poll_interval).await
        }
        Commands::Stop { id, poll_interval } => {
            commands::lifecycle::stop(&cli.config, &id, poll_interval).await
        }
        Commands::RepairPermissions { id } => commands::lifecycle::repair_permissions(&cli.config, &id).await,
        Commands::InstallLocation { id, path } => {
            commands::lifecycle::install_location(&cli.config, &id, &path)
        }
        Commands::Ping { id } => commands::lifecycle::ping(&cli.config, &id).await,
    }
}
