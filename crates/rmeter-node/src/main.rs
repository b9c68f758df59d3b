//! Cluster worker for rmeter: hosts one `NodeService` behind a TCP listener
//! and runs whatever `RunnerConfig` a controller dispatches to it.

use clap::Parser;
use rmeter_core::cluster::NodeService;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rmeter-node")]
#[command(about = "Cluster worker node for rmeter")]
#[command(version)]
struct Cli {
    /// Address to bind the node's control listener on.
    #[arg(short, long, default_value = "0.0.0.0:7070")]
    bind: String,
}

/// Cancels the node's active run on ctrl-c or, on unix, SIGTERM.
async fn watch_for_shutdown_signal(service: Arc<NodeService>) {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler, ctrl-c still works");
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("ctrl-c received, cancelling the active run if any");
                service.shutdown_active_run().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("ctrl-c received, cancelling the active run if any"),
            _ = sigterm.recv() => tracing::info!("SIGTERM received, cancelling the active run if any"),
        }
        service.shutdown_active_run().await;
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, cancelling the active run if any");
            service.shutdown_active_run().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("rmeter_core=info".parse()?))
        .init();

    let cli = Cli::parse();
    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    tracing::info!(bind = %cli.bind, "node listening");

    let service = Arc::new(NodeService::new());
    tokio::spawn(watch_for_shutdown_signal(service.clone()));

    service.serve(listener).await?;
    Ok(())
}
