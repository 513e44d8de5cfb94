//! Worker pool orchestration for the dispatcher.
//!
//! Owns worker creation, per-worker control channels and shutdown fan-out.
//! Worker ids run from 1 to the pool size.

use super::worker::{
    panic_message, worker_command_channel, Assignment, IncidentWorker, WorkerCommand,
    WorkerCommandSender, WorkerEventSender, WorkerShared,
};
use crate::runtime::fatal::FatalErrorHandler;
use anyhow::{bail, Context, Result};
use futures::FutureExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

const WORKER_COMMAND_CAPACITY: usize = 2;

pub(crate) struct WorkerPool {
    size: usize,
    workers: Vec<JoinHandle<()>>,
    control_txs: Vec<WorkerCommandSender>,
}

impl WorkerPool {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size,
            workers: Vec::new(),
            control_txs: Vec::new(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Spawns every worker. A worker that errors or panics outside an incident
    /// triggers `fatal_handler`.
    pub(crate) fn launch(
        &mut self,
        shared: WorkerShared,
        event_tx: WorkerEventSender,
        fatal_handler: Arc<FatalErrorHandler>,
    ) -> Result<()> {
        if self.size == 0 {
            bail!("worker pool needs at least one worker");
        }

        self.workers.clear();
        self.control_txs.clear();

        for worker_id in 1..=self.size {
            let (tx, rx) = worker_command_channel(WORKER_COMMAND_CAPACITY);
            let worker = IncidentWorker::new(worker_id, shared.clone(), rx, event_tx.clone());

            let fatal_handler = fatal_handler.clone();

            let handle = tokio::spawn(async move {
                let result = std::panic::AssertUnwindSafe(worker.run())
                    .catch_unwind()
                    .await;

                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::error!(
                            worker = worker_id,
                            error = %err,
                            "worker task exited with error"
                        );
                        let context = format!("worker {worker_id} exited with error");
                        let err = err.context(context.clone());
                        fatal_handler.trigger_external(context.as_str(), err);
                    }
                    Err(panic_payload) => {
                        let panic_msg = panic_message(panic_payload.as_ref());
                        tracing::error!(
                            worker = worker_id,
                            panic = %panic_msg,
                            "worker task panicked"
                        );
                        let context = format!("worker {worker_id} panicked");
                        let panic_error =
                            anyhow::anyhow!("worker {worker_id} panicked: {panic_msg}");
                        fatal_handler.trigger_external(context.as_str(), panic_error);
                    }
                }
            });

            self.control_txs.push(tx);
            self.workers.push(handle);
        }

        Ok(())
    }

    /// Hands `assignment` to `worker_id`, which must be idle.
    pub(crate) async fn assign(&self, worker_id: usize, assignment: Assignment) -> Result<()> {
        let tx = worker_id
            .checked_sub(1)
            .and_then(|index| self.control_txs.get(index))
            .with_context(|| format!("unknown worker {worker_id}"))?;
        let incident_id = assignment.incident.id.clone();
        tx.send(WorkerCommand::Assign(assignment))
            .await
            .with_context(|| format!("failed to assign {incident_id} to worker {worker_id}"))
    }

    /// Asks every worker to stop and hands back their join handles.
    pub(crate) async fn shutdown(&mut self) -> Vec<JoinHandle<()>> {
        for (index, tx) in self.control_txs.iter().enumerate() {
            if let Err(err) = tx.send(WorkerCommand::Shutdown).await {
                tracing::warn!(
                    worker = index + 1,
                    error = %err,
                    "failed to deliver control signal to worker"
                );
            }
        }
        self.control_txs.clear();
        std::mem::take(&mut self.workers)
    }
}
