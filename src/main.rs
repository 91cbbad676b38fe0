use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use zeno::api::ApiServer;
use zeno::config::Config;
use zeno::controller::Controller;
use zeno::github::QueueClient;
use zeno::leader::LeaderElector;
use zeno::observability::ControllerMetrics;
use zeno::provider::{DockerProvider, Provider};
use zeno::store::EventStore;

/// Zeno — autoscaling controller for self-hosted GitHub Actions runners
#[derive(Parser)]
#[command(name = "zeno", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration (file + env overlay), validated fail-fast.
    let config = Arc::new(Config::load(cli.config.as_deref().map(Path::new)).await?);

    // Initialize tracing; CLI flag wins over config.
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = config.provider.kind,
        dry_run = config.dry_run,
        "starting Zeno"
    );

    // Metrics registry, constructed once and passed by handle.
    let metrics = Arc::new(ControllerMetrics::new());
    let mode = if config.dry_run { "dry-run" } else { "production" };
    metrics.set_controller_info(env!("CARGO_PKG_VERSION"), &config.provider.kind, mode);

    // GitHub queue client.
    let queue = Arc::new(QueueClient::new(config.github.clone())?.with_metrics(metrics.clone()));

    // Infrastructure provider.
    let provider = create_provider(&config)?;

    // Event store.
    let store = Arc::new(EventStore::new(config.store.clone())?);

    // Controller.
    let controller = Arc::new(Controller::new(
        config.clone(),
        queue.clone(),
        provider.clone(),
        store.clone(),
        metrics.clone(),
    ));

    // Root cancellation token, fired on shutdown signals.
    let shutdown = CancellationToken::new();

    // Status API server.
    let api = Arc::new(
        ApiServer::new(config.clone(), provider.clone(), store, metrics.clone())
            .with_queue_client(queue.clone()),
    );
    let api_task = tokio::spawn(api.serve(shutdown.clone()));

    // Leader election gates the controller.
    let elector = LeaderElector::new(config.leader_election.clone());
    let election_task = {
        let shutdown = shutdown.clone();
        let lead_metrics = metrics.clone();
        let stop_metrics = metrics.clone();
        tokio::spawn(async move {
            elector
                .run(
                    shutdown,
                    move |token| {
                        let controller = controller.clone();
                        let metrics = lead_metrics.clone();
                        async move {
                            tracing::info!("became leader, starting controller");
                            metrics.set_leader(true);
                            controller.run(token).await;
                        }
                    },
                    move || {
                        tracing::info!("stopped being leader");
                        stop_metrics.set_leader(false);
                    },
                )
                .await
        })
    };

    // Wait for SIGINT/SIGTERM.
    wait_for_signal().await;
    tracing::info!("received shutdown signal");
    shutdown.cancel();

    if let Err(e) = election_task.await? {
        tracing::error!(error = %e, "leader election error");
    }
    if let Err(e) = api_task.await? {
        tracing::error!(error = %e, "API server error");
    }

    provider.close().await?;
    tracing::info!("shutdown complete");
    Ok(())
}

fn create_provider(config: &Config) -> anyhow::Result<Arc<dyn Provider>> {
    match config.provider.kind.as_str() {
        "docker" => {
            let docker = DockerProvider::new(config.provider.docker.clone())?
                .with_stop_timeout(Duration::from_secs(config.scaling.termination_timeout_secs));
            Ok(Arc::new(docker))
        }
        other => anyhow::bail!("unknown provider kind: {}", other),
    }
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
