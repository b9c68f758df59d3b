use crate::attacker::{Attacker, AttackerContext};
use crate::config::WorkerMode;
use crate::error::RmeterError;
use crate::model::{AttackResult, AttackToken};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pool of workers pulling tokens off a shared queue and running one
/// attacker call per token. Grows monotonically: `spawn_workers` can be
/// called again later by the autoscaler, but workers are never torn down
/// individually - the whole pool goes away together when `cancel` fires.
pub struct WorkerPool {
    token_rx: Arc<Mutex<mpsc::Receiver<AttackToken>>>,
    result_tx: mpsc::Sender<AttackResult>,
    attacker_prototype: Box<dyn Attacker>,
    ctx: AttackerContext,
    cancel: CancellationToken,
    attacker_timeout: Duration,
    worker_mode: WorkerMode,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        token_rx: mpsc::Receiver<AttackToken>,
        result_tx: mpsc::Sender<AttackResult>,
        attacker_prototype: Box<dyn Attacker>,
        ctx: AttackerContext,
        cancel: CancellationToken,
        attacker_timeout: Duration,
        worker_mode: WorkerMode,
    ) -> Self {
        WorkerPool {
            token_rx: Arc::new(Mutex::new(token_rx)),
            result_tx,
            attacker_prototype,
            ctx,
            cancel,
            attacker_timeout,
            worker_mode,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Clones and sets up `count` new attacker instances and spawns a worker
    /// task for each. Returns how many actually started - a clone whose
    /// `setup` fails is logged and skipped rather than aborting the whole
    /// batch.
    pub async fn spawn_workers(&self, count: u32) -> u32 {
        let mut started = 0;
        let mut handles = self.handles.lock().await;
        for _ in 0..count {
            let mut attacker = self.attacker_prototype.clone_attacker();
            if let Err(e) = attacker.setup(&self.ctx).await {
                tracing::warn!(error = %e, "attacker setup failed, skipping worker");
                continue;
            }
            let handle = spawn_worker_loop(
                attacker,
                self.token_rx.clone(),
                self.result_tx.clone(),
                self.cancel.clone(),
                self.attacker_timeout,
                self.worker_mode,
            );
            handles.push(handle);
            started += 1;
        }
        started
    }

    /// Builds the initial pool: unlike `spawn_workers`, a single failed
    /// `setup` call aborts the whole batch, matching the orchestrator's
    /// "abort if any Setup fails" contract for a run's starting workers.
    /// Workers added later by the autoscaler use the lenient path instead.
    pub async fn spawn_initial(&self, count: u32) -> Result<u32, RmeterError> {
        let mut handles = self.handles.lock().await;
        for _ in 0..count {
            let mut attacker = self.attacker_prototype.clone_attacker();
            attacker
                .setup(&self.ctx)
                .await
                .map_err(|e| RmeterError::AttackerSetup(e.to_string()))?;
            let handle = spawn_worker_loop(
                attacker,
                self.token_rx.clone(),
                self.result_tx.clone(),
                self.cancel.clone(),
                self.attacker_timeout,
                self.worker_mode,
            );
            handles.push(handle);
        }
        Ok(count)
    }

    pub async fn worker_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Waits for every worker task to finish. Workers exit on their own once
    /// the channel is closed and drained, or once `cancel` fires.
    pub async fn join(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }
}

fn spawn_worker_loop(
    mut attacker: Box<dyn Attacker>,
    token_rx: Arc<Mutex<mpsc::Receiver<AttackToken>>>,
    result_tx: mpsc::Sender<AttackResult>,
    cancel: CancellationToken,
    attacker_timeout: Duration,
    worker_mode: WorkerMode,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let token = {
                let mut rx = token_rx.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    token = rx.recv() => match token {
                        Some(t) => t,
                        None => return,
                    },
                }
            };

            match worker_mode {
                WorkerMode::Synchronous => {
                    run_one_attack(&mut attacker, token, attacker_timeout, &result_tx).await;
                }
                WorkerMode::Asynchronous => {
                    // Legacy open-world mode: fire the call without waiting
                    // for it before pulling the next token. Each call clones
                    // its own attacker so concurrent calls never share
                    // mutable state.
                    let mut detached = attacker.clone_attacker();
                    let result_tx = result_tx.clone();
                    tokio::spawn(async move {
                        run_one_attack(&mut detached, token, attacker_timeout, &result_tx).await;
                    });
                }
            }
        }
    })
}

async fn run_one_attack(
    attacker: &mut Box<dyn Attacker>,
    token: AttackToken,
    timeout: Duration,
    result_tx: &mpsc::Sender<AttackResult>,
) {
    let begin = Utc::now();
    let do_result = match tokio::time::timeout(timeout, attacker.do_call()).await {
        Ok(result) => result,
        Err(_) => crate::model::DoResult::timed_out("attack"),
    };
    let end = Utc::now();
    let elapsed = (end - begin)
        .to_std()
        .unwrap_or(Duration::ZERO);

    // Runs after every call, not just once per worker - an attacker that
    // times out still gets a chance to release whatever it opened.
    if let Err(e) = attacker.teardown().await {
        tracing::warn!(error = %e, "attacker teardown failed");
    }

    let _ = result_tx
        .send(AttackResult {
            token,
            begin,
            end,
            elapsed,
            result: do_result,
        })
        .await;
}
