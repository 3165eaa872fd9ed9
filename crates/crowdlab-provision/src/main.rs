//! Crowdlab provisioning binary.
//!
//! Runs stack setup or teardown against the configured cloud account.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crowdlab_provision::{
    AwsDatabaseProvider, AwsNetworkProvider, AwsRoleProvider, DatabaseDecommissioner,
    DatabaseProvider, DatabaseProvisioner, DeployChannel, DeployTarget, DeploymentManifest,
    DeploymentPublisher, NetworkProvider, PostgresInspector, RoleProvider, SchemaInspector,
    SecurityGroupManager, Ssh2Channel, StackConfig, StackOrchestrator,
    SECURITY_GROUP_DESCRIPTION, SECURITY_GROUP_NAME,
};

#[derive(Parser)]
#[command(name = "crowdlab-provision", about = "Provision the crowdlab experiment stack")]
struct Cli {
    /// Path to a configuration file; defaults to crowdlab.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring the stack up and deploy the application.
    Setup {
        /// Hostname of the compute target.
        #[arg(long)]
        host: String,

        /// Private key used to authenticate the deploy channel.
        #[arg(long)]
        key_path: PathBuf,

        /// Task files to copy to the compute target.
        #[arg(long = "task-file")]
        task_files: Vec<PathBuf>,

        /// Keep generated artifacts on disk after upload.
        #[arg(long)]
        keep_artifacts: bool,
    },
    /// Tear the stack down.
    Teardown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("crowdlab_provision=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StackConfig::from_file(path)?,
        None => StackConfig::load()?,
    };

    info!(
        namespace = %config.namespace,
        region = %config.aws.region,
        "configuration loaded"
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let orchestrator = build_orchestrator(config, cancel).await;

    match cli.command {
        Command::Setup {
            host,
            key_path,
            task_files,
            keep_artifacts,
        } => {
            let target = DeployTarget::new(host, key_path);
            let manifest = DeploymentManifest::new(task_files);
            let outcome = orchestrator
                .setup(&target, &manifest, !keep_artifacts)
                .await?;
            println!("database host: {}", outcome.database_host);
            println!("html endpoint: {}", outcome.endpoints.html_url);
            println!("json endpoint: {}", outcome.endpoints.json_url);
        }
        Command::Teardown => {
            orchestrator.teardown().await?;
            println!("stack removed");
        }
    }

    Ok(())
}

async fn build_orchestrator(config: StackConfig, cancel: CancellationToken) -> StackOrchestrator {
    let database: Arc<dyn DatabaseProvider> =
        Arc::new(AwsDatabaseProvider::connect(&config.aws).await);
    let network: Arc<dyn NetworkProvider> =
        Arc::new(AwsNetworkProvider::connect(&config.aws).await);
    let roles: Arc<dyn RoleProvider> = Arc::new(AwsRoleProvider::connect(&config.aws).await);
    let inspector: Arc<dyn SchemaInspector> = Arc::new(PostgresInspector::default());
    let channel: Arc<dyn DeployChannel> = Arc::new(Ssh2Channel::new());

    let decommissioner = Arc::new(DatabaseDecommissioner::new(
        Arc::clone(&database),
        roles,
        config.clone(),
        cancel.clone(),
    ));

    StackOrchestrator::new(
        SecurityGroupManager::new(
            network,
            SECURITY_GROUP_NAME,
            SECURITY_GROUP_DESCRIPTION,
            config.database.port,
        ),
        DatabaseProvisioner::new(
            database,
            inspector,
            Arc::clone(&decommissioner),
            config.clone(),
            cancel,
        ),
        DeploymentPublisher::new(channel, config.deploy.clone()),
        decommissioner,
        config,
    )
}
