//! readygate - keeps nodes tainted until their required DaemonSet pods are ready

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use readygate_common::kube_utils::create_client;
use readygate_common::leader_election::{LeaderElector, DEFAULT_LEASE_NAME};
use readygate_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use readygate_common::{ValidatedConfig, DEFAULT_CONFIG_PATH};
use readygate_operator::controller_runner::build_node_controller;

/// readygate - gate node scheduling on DaemonSet readiness
#[derive(Parser, Debug)]
#[command(name = "readygate", version, about, long_about = None)]
struct Cli {
    /// Path to the handler configuration (YAML or JSON)
    #[arg(long, env = "READYGATE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Kubeconfig to use instead of in-cluster discovery
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Only run the controller while holding the leader lease
    #[arg(long, env = "READYGATE_LEADER_ELECT")]
    leader_elect: bool,

    /// Namespace of the leader lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "kube-system")]
    lease_namespace: String,

    /// Name of the leader lease
    #[arg(long, default_value = DEFAULT_LEASE_NAME)]
    lease_name: String,

    /// Maximum number of nodes reconciled concurrently (0 = unbounded)
    #[arg(long, env = "READYGATE_CONCURRENCY", default_value_t = 4)]
    concurrency: u16,

    /// Log human-readable lines instead of JSON
    #[arg(long)]
    text_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_format: if cli.text_logs {
            LogFormat::Text
        } else {
            LogFormat::Json
        },
        ..Default::default()
    })
    .context("failed to initialize telemetry")?;
    tracing::info!(
        otlp = telemetry.is_exporting(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting readygate"
    );

    let config = ValidatedConfig::load(&cli.config)
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;
    tracing::info!(
        path = %cli.config.display(),
        watches = config.watches.len(),
        "Loaded configuration"
    );
    let config = Arc::new(config);

    let client = create_client(cli.kubeconfig.as_deref())
        .await
        .context("failed to create kubernetes client")?;

    if !cli.leader_elect {
        build_node_controller(client, config, cli.concurrency).await;
        tracing::info!("Controller stopped");
        return Ok(());
    }

    let identity = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .context("leader election needs POD_NAME or HOSTNAME for its identity")?;
    let elector = Arc::new(LeaderElector::new(
        client.clone(),
        &cli.lease_name,
        &cli.lease_namespace,
        &identity,
    ));
    let mut guard = elector.acquire().await;

    tokio::select! {
        _ = build_node_controller(client, config, cli.concurrency) => {
            tracing::info!("Controller stopped, releasing leadership");
            if let Err(e) = guard.release_leadership().await {
                tracing::warn!(error = %e, "Failed to release lease");
            }
            Ok(())
        }
        _ = guard.lost() => {
            anyhow::bail!("leadership lost, exiting so a standby can take over")
        }
    }
}
