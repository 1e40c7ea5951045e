//! The per-mapping transfer loop.
//!
//! A [`TransferWorker`] owns one [`Mapping`] and repeatedly pops from its
//! source queue, decodes the message, and upserts it into the target
//! collection under the digest of its raw bytes.
//!
//! # States
//!
//! `Running` -> `Draining` -> `Stopped`
//!
//! The worker leaves `Running` only when the shared cancellation token fires.
//! Cancellation is observed before every pop and while the pop is waiting,
//! but never in the middle of a transfer, so a message that has been popped is
//! always carried through to its upsert (or its dead-letter disposition)
//! before the worker stops.
//!
//! # Failures
//!
//! No error stops the worker. Queue errors are followed by one backoff pause.
//! Malformed messages and failed writes are handed to the
//! [`DeadLetterPolicy`] and the loop moves on to the next message.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use strum::Display;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Mapping, WorkerConfig},
    dead_letter::{DeadLetterPolicy, Disposition, FailureKind},
    digest::content_digest,
    message::{Payload, Record},
    queue::{Popped, QueueSource},
    store::DocumentSink,
};

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum WorkerState {
    Running,
    Draining,
    Stopped,
}

/// Timing knobs shared by every worker.
#[derive(Clone, Debug, PartialEq, Eq, bon::Builder)]
pub struct WorkerSettings {
    /// Upper bound on a single blocking pop, and so on how long cancellation
    /// can go unnoticed while the queue is idle.
    #[builder(default = DEFAULT_POLL_TIMEOUT)]
    pub poll_timeout: Duration,
    /// Pause after a queue error before polling again.
    #[builder(default = DEFAULT_ERROR_BACKOFF)]
    pub error_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self::builder()
            .poll_timeout(config.poll_timeout())
            .error_backoff(config.error_backoff())
            .build()
    }
}

/// Counters accumulated over a worker's lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    pub mapping: Mapping,
    pub transferred: u64,
    pub malformed: u64,
    pub sink_failures: u64,
    pub queue_errors: u64,
    pub dead_lettered: u64,
}

impl WorkerReport {
    fn new(mapping: Mapping) -> Self {
        Self {
            mapping,
            transferred: 0,
            malformed: 0,
            sink_failures: 0,
            queue_errors: 0,
            dead_lettered: 0,
        }
    }
}

pub struct TransferWorker {
    mapping: Mapping,
    queue: Arc<dyn QueueSource>,
    sink: Arc<dyn DocumentSink>,
    settings: WorkerSettings,
    dead_letter: DeadLetterPolicy,
    cancel: CancellationToken,
    state: watch::Sender<WorkerState>,
}

#[bon::bon]
impl TransferWorker {
    #[builder]
    pub fn new(
        mapping: Mapping,
        queue: Arc<dyn QueueSource>,
        sink: Arc<dyn DocumentSink>,
        #[builder(default)] settings: WorkerSettings,
        #[builder(default)] dead_letter: DeadLetterPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Running);

        Self {
            mapping,
            queue,
            sink,
            settings,
            dead_letter,
            cancel,
            state,
        }
    }
}

impl TransferWorker {
    /// Subscribes to state transitions.
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Runs the transfer loop until the cancellation token fires.
    #[tracing::instrument(
        name = "worker",
        skip_all,
        fields(source = %self.mapping.source, target = %self.mapping.target)
    )]
    pub async fn run(self) -> WorkerReport {
        let mut report = WorkerReport::new(self.mapping.clone());

        tracing::info!("Worker started");

        while !self.cancel.is_cancelled() {
            let popped = self
                .queue
                .blocking_pop(
                    &self.mapping.source,
                    self.settings.poll_timeout,
                    &self.cancel,
                )
                .await;

            match popped {
                Ok(Popped::Value(raw)) => self.transfer(raw, &mut report).await,
                Ok(Popped::TimedOut) => continue,
                Ok(Popped::Cancelled) => break,
                Err(e) => {
                    report.queue_errors += 1;
                    tracing::error!(error = %e, "Error popping from queue");

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    }
                }
            }
        }

        self.state.send_replace(WorkerState::Draining);
        tracing::info!(
            transferred = report.transferred,
            malformed = report.malformed,
            sink_failures = report.sink_failures,
            queue_errors = report.queue_errors,
            dead_lettered = report.dead_lettered,
            "Worker stopping"
        );
        self.state.send_replace(WorkerState::Stopped);

        report
    }

    async fn transfer(&self, raw: Bytes, report: &mut WorkerReport) {
        let payload = match Payload::decode(&raw) {
            Ok(payload) => payload,
            Err(e) => {
                report.malformed += 1;
                tracing::warn!(
                    error = %e,
                    preview = %String::from_utf8_lossy(&raw[..raw.len().min(256)]),
                    "Error parsing message"
                );
                self.dispose(FailureKind::MalformedPayload, raw, report).await;
                return;
            }
        };

        let doc_id = content_digest(&raw);
        let record = Record::received(payload);

        match self
            .sink
            .upsert(&self.mapping.target, doc_id.as_str(), record)
            .await
        {
            Ok(handle) => {
                report.transferred += 1;
                tracing::info!(doc_id = %handle.id, "Transferred message");
            }
            Err(e) => {
                report.sink_failures += 1;
                tracing::error!(doc_id = %doc_id, error = %e, "Error writing document");
                self.dispose(FailureKind::SinkWrite, raw, report).await;
            }
        }
    }

    async fn dispose(&self, kind: FailureKind, raw: Bytes, report: &mut WorkerReport) {
        let disposition = self
            .dead_letter
            .dispose(self.queue.as_ref(), &self.mapping.source, kind, raw)
            .await;

        if disposition == Disposition::DeadLettered {
            report.dead_lettered += 1;
        }
    }
}
