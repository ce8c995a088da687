//! Registry Operator - reconciles Registry custom resources

use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};

use registry_common::crd::Registry;
use registry_common::telemetry::{init_telemetry, TelemetryConfig};
use registry_common::{OPERATOR_NAME, OPERATOR_VERSION};
use registry_operator::{build_registry_controller, OperatorConfig};

/// Registry operator - keeps registry deployments converged on their Registry spec
#[derive(Parser, Debug)]
#[command(name = "registry-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Registry::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let _telemetry = init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!(
        operator = OPERATOR_NAME,
        version = OPERATOR_VERSION,
        ?config,
        "Starting registry operator"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    tracing::info!("Starting controllers:");
    build_registry_controller(client, config).await;

    tracing::info!("Shutting down");
    Ok(())
}
