//! Headless CLI for rmeter.
//!
//! Loads a run config from JSON or YAML, drives it through the engine either
//! standalone or across a fleet of rmeter-node instances, and prints a
//! summary when it finishes.

use clap::{Parser, Subcommand};
use rmeter_core::cluster::ClusterController;
use rmeter_core::config::RunnerConfig;
use rmeter_core::engine::Runner;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rmeter-cli")]
#[command(about = "Distributed load generator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a run config without executing it.
    Validate {
        /// Path to a JSON or YAML run config.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run a load test, locally or against the nodes named in the config.
    Run {
        /// Path to a JSON or YAML run config.
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Cancels `token` on ctrl-c or, on unix, SIGTERM - whichever arrives first.
async fn watch_for_shutdown_signal(token: tokio_util::sync::CancellationToken) {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler, ctrl-c still works");
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("ctrl-c received, cancelling the run");
                token.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("ctrl-c received, cancelling the run"),
            _ = sigterm.recv() => tracing::info!("SIGTERM received, cancelling the run"),
        }
        token.cancel();
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, cancelling the run");
            token.cancel();
        }
    }
}

fn load_config(path: &Path) -> Result<RunnerConfig, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&contents).map_err(|e| format!("failed to parse YAML config: {e}"))
        }
        _ => serde_json::from_str(&contents).map_err(|e| format!("failed to parse JSON config: {e}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("rmeter_core=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            let mut cfg = load_config(&config)?;
            let problems = cfg.validate();
            if problems.is_empty() {
                cfg.apply_defaults();
                println!("config is valid");
                Ok(())
            } else {
                for p in &problems {
                    eprintln!("- {p}");
                }
                Err(format!("{} problem(s) found in {}", problems.len(), config.display()).into())
            }
        }
        Commands::Run { config } => {
            let cfg = load_config(&config)?;
            let problems = cfg.validate();
            if !problems.is_empty() {
                for p in &problems {
                    eprintln!("- {p}");
                }
                return Err(format!("{} problem(s) found in {}", problems.len(), config.display()).into());
            }

            let shutdown = tokio_util::sync::CancellationToken::new();
            tokio::spawn(watch_for_shutdown_signal(shutdown.clone()));

            if let Some(cluster) = &cfg.cluster {
                let controller = ClusterController::new(cluster.nodes.clone());
                let (tick_tx, mut tick_rx) = tokio::sync::mpsc::channel(1024);
                let run_cfg = cfg.clone();
                let mut run_task = tokio::spawn(async move { controller.run(&run_cfg, tick_tx).await });

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            tracing::warn!("cancelling cluster run; nodes will time out their own runs independently");
                            run_task.abort();
                            break;
                        }
                        maybe_tick = tick_rx.recv() => {
                            let Some(tick) = maybe_tick else { break; };
                            println!(
                                "tick {} rate={:.1} success={:.1}% p50={}ms p95={}ms p99={}ms",
                                tick.tick,
                                tick.merged.rate,
                                tick.merged.success * 100.0,
                                tick.merged.p50_ms,
                                tick.merged.p95_ms,
                                tick.merged.p99_ms
                            );
                        }
                        result = &mut run_task => {
                            result??;
                            break;
                        }
                    }
                }
                println!("cluster run finished");
            } else {
                let runner = Runner::with_parent_cancellation(cfg, shutdown);
                let summary = runner.run(None).await?;
                println!(
                    "run finished: {} requests, max_rps={:.1}, failed={}",
                    summary.total_requests, summary.max_rps, summary.failed
                );
                if summary.failed {
                    std::process::exit(1);
                }
            }
            Ok(())
        }
    }
}
