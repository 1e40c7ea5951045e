//! Lifecycle of the worker fleet.
//!
//! The supervisor starts one [`TransferWorker`] per mapping, all sharing the
//! same queue backend, document sink and cancellation token, and on shutdown
//! waits for every one of them to finish its current iteration.

use std::sync::Arc;

use tokio::{sync::watch, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Mapping,
    dead_letter::DeadLetterPolicy,
    queue::QueueSource,
    store::DocumentSink,
    worker::{TransferWorker, WorkerReport, WorkerSettings, WorkerState},
};

pub struct WorkerSupervisor {
    cancel: CancellationToken,
    workers: JoinSet<WorkerReport>,
    states: Vec<(Mapping, watch::Receiver<WorkerState>)>,
}

impl WorkerSupervisor {
    /// Spawns one worker per mapping onto the current tokio runtime.
    ///
    /// Workers are independent: a worker that panics is reported at shutdown
    /// and does not affect the others. An empty mapping list starts nothing.
    pub fn start(
        mappings: &[Mapping],
        queue: Arc<dyn QueueSource>,
        sink: Arc<dyn DocumentSink>,
        settings: WorkerSettings,
        dead_letter: DeadLetterPolicy,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        let mut states = Vec::with_capacity(mappings.len());

        for mapping in mappings {
            let worker = TransferWorker::builder()
                .mapping(mapping.clone())
                .queue(queue.clone())
                .sink(sink.clone())
                .settings(settings.clone())
                .dead_letter(dead_letter.clone())
                .cancel(cancel.clone())
                .build();

            states.push((mapping.clone(), worker.state()));
            workers.spawn(worker.run());

            tracing::info!(%mapping, "Started worker");
        }

        Self {
            cancel,
            workers,
            states,
        }
    }

    /// The token shared by every worker. Cancelling it stops the fleet
    /// without waiting; use [`WorkerSupervisor::shutdown`] to also wait.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn worker_count(&self) -> usize {
        self.states.len()
    }

    /// Current state of every worker, in mapping order.
    pub fn states(&self) -> Vec<(Mapping, WorkerState)> {
        self.states
            .iter()
            .map(|(mapping, state)| (mapping.clone(), *state.borrow()))
            .collect()
    }

    /// Signals cancellation and waits until every worker has stopped.
    ///
    /// Returns the reports of the workers that exited normally.
    pub async fn shutdown(mut self) -> Vec<WorkerReport> {
        tracing::info!(workers = self.workers.len(), "Stopping workers");
        self.cancel.cancel();

        let mut reports = Vec::with_capacity(self.workers.len());

        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(report) => {
                    tracing::info!(
                        mapping = %report.mapping,
                        remaining = self.workers.len(),
                        "Worker stopped"
                    );
                    reports.push(report);
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        remaining = self.workers.len(),
                        "Worker task failed"
                    );
                }
            }
        }

        tracing::info!("All workers stopped");

        reports
    }
}
