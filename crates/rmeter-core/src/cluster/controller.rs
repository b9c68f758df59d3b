use super::wire::{self, NodeRequest, NodeResponse};
use crate::config::RunnerConfig;
use crate::engine::aggregator::{Metrics, TickMetrics};
use crate::error::RmeterError;
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Per-tick view once every node has reported in: the individual node
/// samples plus one `Metrics` folding them together. Percentiles in the
/// merged view are a request-weighted average across nodes rather than a
/// recomputation over raw latencies - nodes only ship their already
/// finalized tick metrics, not the underlying samples.
#[derive(Debug, Clone)]
pub struct ClusterTickMetrics {
    pub tick: u64,
    pub node_samples: Vec<TickMetrics>,
    pub merged: Metrics,
}

fn merge(tick: u64, samples: Vec<TickMetrics>) -> ClusterTickMetrics {
    let total_requests: u64 = samples.iter().map(|s| s.metrics.requests).sum();
    let weight = |requests: u64| {
        if total_requests == 0 {
            0.0
        } else {
            requests as f64 / total_requests as f64
        }
    };

    let mut status_codes = HashMap::new();
    let mut errors = Vec::new();
    let mut rate = 0.0;
    let mut target_rate = 0.0;
    let mut mean_ms = 0.0;
    let mut p50 = 0.0;
    let mut p95 = 0.0;
    let mut p99 = 0.0;
    let mut max_ms = 0u64;
    let mut success_sum = 0.0;

    for s in &samples {
        let w = weight(s.metrics.requests);
        rate += s.metrics.rate;
        target_rate += s.metrics.target_rate;
        mean_ms += s.metrics.mean_ms * w;
        p50 += s.metrics.p50_ms as f64 * w;
        p95 += s.metrics.p95_ms as f64 * w;
        p99 += s.metrics.p99_ms as f64 * w;
        max_ms = max_ms.max(s.metrics.max_ms);
        success_sum += s.metrics.success * w;
        for (code, count) in &s.metrics.status_codes {
            *status_codes.entry(*code).or_insert(0) += count;
        }
        for err in &s.metrics.errors {
            if !errors.contains(err) {
                errors.push(err.clone());
            }
        }
    }

    ClusterTickMetrics {
        tick,
        node_samples: samples,
        merged: Metrics {
            requests: total_requests,
            target_rate,
            rate,
            success: success_sum,
            mean_ms,
            p50_ms: p50 as u64,
            p95_ms: p95 as u64,
            p99_ms: p99 as u64,
            max_ms,
            status_codes,
            errors,
        },
    }
}

/// Drives a fleet of rmeter-node instances as one logical run: splits the
/// configured worker count across nodes, starts each node's runner, and
/// merges their per-tick results as they stream back.
pub struct ClusterController {
    node_addresses: Vec<String>,
}

impl ClusterController {
    pub fn new(node_addresses: Vec<String>) -> Self {
        ClusterController { node_addresses }
    }

    /// Dials every node and asks its `Status`; fails the whole cluster the
    /// moment one reports busy rather than discovering it mid-dispatch,
    /// since a node already running someone else's load will just reject
    /// our `Run` with `NodeResponse::Error` after we've already committed
    /// the other nodes to this run.
    pub async fn probe_nodes(&self) -> Result<(), RmeterError> {
        for addr in &self.node_addresses {
            let stream = TcpStream::connect(addr).await?;
            let mut transport = wire::transport(stream);
            let req = wire::encode(&NodeRequest::Status)?;
            transport.send(req.into()).await?;

            let Some(frame) = transport.next().await else {
                return Err(RmeterError::Cluster(format!("node {addr} closed the connection during status probe")));
            };
            let response: NodeResponse = wire::decode(&frame?)?;
            match response {
                NodeResponse::Status { busy: true } => {
                    return Err(RmeterError::NodeBusy(addr.clone()));
                }
                NodeResponse::Status { busy: false } => {}
                other => {
                    return Err(RmeterError::Cluster(format!(
                        "node {addr} replied to a status probe with an unexpected message: {other:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Probes every node's status, then runs `cfg` across the fleet and
    /// streams merged per-tick metrics back through `tick_tx` as each tick
    /// closes on all nodes.
    pub async fn run(
        &self,
        cfg: &RunnerConfig,
        tick_tx: mpsc::Sender<ClusterTickMetrics>,
    ) -> Result<(), RmeterError> {
        self.probe_nodes().await?;

        let node_count = self.node_addresses.len().max(1) as u32;
        let per_node_workers = (cfg.workers / node_count).max(1);
        let mut per_node_cfg = cfg.clone();
        per_node_cfg.workers = per_node_workers;
        per_node_cfg.cluster = None;

        let (batch_tx, mut batch_rx) = mpsc::channel::<(usize, NodeResponse)>(256);
        let mut node_handles = Vec::new();

        for (idx, addr) in self.node_addresses.iter().enumerate() {
            let addr = addr.clone();
            let cfg = per_node_cfg.clone();
            let batch_tx = batch_tx.clone();
            node_handles.push(tokio::spawn(async move {
                if let Err(e) = run_one_node(idx, &addr, cfg, batch_tx).await {
                    tracing::warn!(node = %addr, error = %e, "node session ended with an error");
                }
            }));
        }
        drop(batch_tx);

        let mut pending: HashMap<u64, Vec<TickMetrics>> = HashMap::new();
        let mut reported_nodes: HashMap<u64, HashSet<usize>> = HashMap::new();
        let mut active_nodes: HashSet<usize> = (0..self.node_addresses.len()).collect();
        let mut failed = false;

        while let Some((node_idx, response)) = batch_rx.recv().await {
            match response {
                NodeResponse::Batch(results) => {
                    if results.is_empty() {
                        continue;
                    }
                    let tick = results[0].token.tick;
                    let step = results[0].token.step;
                    let target_rps = results[0].token.target_rps;
                    let agg = crate::engine::aggregator::TickAggregator::new();
                    let mut node_tick = None;
                    for r in results {
                        let had_error = r.result.error.is_some();
                        if let Some(tm) = agg.record(r) {
                            node_tick = Some(tm);
                        }
                        if had_error && cfg.fail_on_first_error {
                            failed = true;
                        }
                    }
                    let tm = node_tick.unwrap_or(TickMetrics {
                        tick,
                        step,
                        target_rps,
                        metrics: Metrics {
                            requests: 0,
                            target_rate: target_rps as f64,
                            rate: 0.0,
                            success: 1.0,
                            mean_ms: 0.0,
                            p50_ms: 0,
                            p95_ms: 0,
                            p99_ms: 0,
                            max_ms: 0,
                            status_codes: HashMap::new(),
                            errors: vec![],
                        },
                        samples: vec![],
                    });

                    pending.entry(tick).or_default().push(tm);
                    let seen = reported_nodes.entry(tick).or_default();
                    seen.insert(node_idx);

                    if seen.len() == active_nodes.len() {
                        let samples = pending.remove(&tick).unwrap_or_default();
                        reported_nodes.remove(&tick);
                        let merged = merge(tick, samples);
                        if cfg.success_ratio > 0.0 && merged.merged.success < cfg.success_ratio {
                            failed = true;
                        }
                        if tick_tx.send(merged).await.is_err() {
                            break;
                        }
                    }
                }
                NodeResponse::StreamEnd => {
                    active_nodes.remove(&node_idx);
                }
                NodeResponse::Error(msg) => {
                    tracing::warn!(node_idx, %msg, "node reported an error");
                    if cfg.fail_on_first_error {
                        failed = true;
                    }
                }
                NodeResponse::Status { .. } => {}
            }

            if failed {
                break;
            }
        }

        for handle in node_handles {
            handle.abort();
        }
        self.shutdown_all_nodes().await;

        if failed {
            return Err(RmeterError::Cluster(
                "aborted: a node reported an error or the merged success ratio fell below successRatio".to_string(),
            ));
        }
        Ok(())
    }

    /// Best-effort `Shutdown` broadcast to every node, dialed fresh since the
    /// run's own connections may already be torn down. Failures are logged,
    /// not propagated - the controller is already exiting and a node that
    /// can't be reached is one whose own `testTimeSecs` will end it anyway.
    async fn shutdown_all_nodes(&self) {
        for addr in &self.node_addresses {
            let result: Result<(), RmeterError> = async {
                let stream = TcpStream::connect(addr).await?;
                let mut transport = wire::transport(stream);
                let req = wire::encode(&NodeRequest::Shutdown)?;
                transport.send(req.into()).await?;
                Ok(())
            }
            .await;
            if let Err(e) = result {
                tracing::warn!(node = %addr, error = %e, "failed to dispatch shutdown to node");
            }
        }
    }
}

async fn run_one_node(
    idx: usize,
    addr: &str,
    cfg: RunnerConfig,
    batch_tx: mpsc::Sender<(usize, NodeResponse)>,
) -> Result<(), RmeterError> {
    let stream = TcpStream::connect(addr).await?;
    let mut transport = wire::transport(stream);

    let req = wire::encode(&NodeRequest::Run(Box::new(cfg)))?;
    transport.send(req.into()).await?;

    while let Some(frame) = transport.next().await {
        let frame = frame?;
        let response: NodeResponse = wire::decode(&frame)?;
        let is_end = matches!(response, NodeResponse::StreamEnd);
        if batch_tx.send((idx, response)).await.is_err() {
            break;
        }
        if is_end {
            break;
        }
    }
    Ok(())
}
