use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::wire::{self, NodeRequest, NodeResponse};
use crate::engine::runner::Runner;
use crate::error::RmeterError;

/// Hosts at most one `Runner` at a time. A controller dials in, sends one
/// `NodeRequest`, and for `Run` gets back a stream of framed `NodeResponse`
/// batches - one per tick the local runner closes - until the run ends and
/// the node sends `StreamEnd`. A second `Run` while one is active is
/// rejected with `NodeResponse::Error`, matching the "single-occupancy"
/// contract spec.md requires.
pub struct NodeService {
    busy: Arc<AtomicBool>,
    active_cancel: Arc<Mutex<Option<CancellationToken>>>,
}

impl NodeService {
    pub fn new() -> Self {
        NodeService {
            busy: Arc::new(AtomicBool::new(false)),
            active_cancel: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Cancels whatever `Runner` is currently in flight, if any. A no-op
    /// when the node is idle.
    pub async fn shutdown_active_run(&self) {
        if let Some(cancel) = self.active_cancel.lock().await.as_ref() {
            cancel.cancel();
        }
    }

    /// Accepts connections forever, handling one at a time sequentially is
    /// not required - each connection gets its own task - but only one can
    /// ever be mid-`Run`, enforced by the `busy` flag.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), RmeterError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.handle_connection(stream).await {
                    tracing::warn!(peer = %addr, error = %e, "node connection ended with an error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<(), RmeterError> {
        let mut transport = wire::transport(stream);
        let Some(frame) = transport.next().await else {
            return Ok(());
        };
        let request: NodeRequest = wire::decode(&frame?)?;

        match request {
            NodeRequest::Status => {
                let resp = wire::encode(&NodeResponse::Status { busy: self.is_busy() })?;
                transport.send(resp.into()).await?;
            }
            NodeRequest::Shutdown => {
                self.shutdown_active_run().await;
            }
            NodeRequest::Run(cfg) => {
                if self.busy.swap(true, Ordering::SeqCst) {
                    let resp = wire::encode(&NodeResponse::Error("node is busy".to_string()))?;
                    transport.send(resp.into()).await?;
                    return Ok(());
                }

                let run_cancel = CancellationToken::new();
                *self.active_cancel.lock().await = Some(run_cancel.clone());

                let runner = Runner::with_parent_cancellation(*cfg, run_cancel);
                let (tick_tx, mut tick_rx) = mpsc::channel(1024);
                let run_task = tokio::spawn(runner.run(Some(tick_tx)));

                while let Some(tick) = tick_rx.recv().await {
                    let resp = wire::encode(&NodeResponse::Batch(tick.samples))?;
                    if transport.send(resp.into()).await.is_err() {
                        break;
                    }
                }

                match run_task.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "runner returned an error"),
                    Err(e) => tracing::warn!(error = %e, "runner task panicked"),
                }

                let end = wire::encode(&NodeResponse::StreamEnd)?;
                let _ = transport.send(end.into()).await;

                *self.active_cancel.lock().await = None;
                self.busy.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

impl Default for NodeService {
    fn default() -> Self {
        Self::new()
    }
}
