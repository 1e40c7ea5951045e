//! What happens to a message the relay cannot persist.
//!
//! Messages that fail to decode, or whose upsert fails, are never retried.
//! By default they are logged and dropped. Operators who cannot afford that
//! loss can divert the raw bytes to a dead-letter queue instead.

use bytes::Bytes;
use serde::Deserialize;
use strum::{AsRefStr, Display};

use crate::queue::QueueSource;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DeadLetterPolicy {
    /// Log the failure and discard the message.
    #[default]
    Drop,
    /// Push the exact raw bytes onto `queue` through the shared queue backend.
    Queue { queue: String },
}

/// Why a message was handed to the dead-letter policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    MalformedPayload,
    SinkWrite,
}

/// Result of applying the policy to one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Dropped,
    DeadLettered,
}

impl DeadLetterPolicy {
    pub(crate) async fn dispose(
        &self,
        queue: &dyn QueueSource,
        source: &str,
        kind: FailureKind,
        raw: Bytes,
    ) -> Disposition {
        match self {
            Self::Drop => {
                tracing::warn!(source, reason = %kind, bytes = raw.len(), "Dropping message");
                Disposition::Dropped
            }
            Self::Queue { queue: dlq } => match queue.push(dlq, raw).await {
                Ok(()) => {
                    tracing::warn!(
                        source,
                        reason = %kind,
                        dead_letter = %dlq,
                        "Dead-lettered message"
                    );
                    Disposition::DeadLettered
                }
                Err(e) => {
                    tracing::error!(
                        source,
                        reason = %kind,
                        dead_letter = %dlq,
                        error = %e,
                        "Failed to dead-letter message, dropping it"
                    );
                    Disposition::Dropped
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use crate::queue::{InMemoryQueue, Popped};

    use super::*;

    #[tokio::test]
    async fn drop_leaves_queues_untouched() {
        let queue = InMemoryQueue::new();
        let disposition = DeadLetterPolicy::Drop
            .dispose(&queue, "q1", FailureKind::MalformedPayload, Bytes::from_static(b"{bad"))
            .await;

        assert_eq!(disposition, Disposition::Dropped);
    }

    #[tokio::test]
    async fn queue_policy_preserves_raw_bytes() {
        let queue = InMemoryQueue::new();
        let policy = DeadLetterPolicy::Queue {
            queue: "dlq".to_owned(),
        };

        let disposition = policy
            .dispose(&queue, "q1", FailureKind::SinkWrite, Bytes::from_static(b"{bad json"))
            .await;
        assert_eq!(disposition, Disposition::DeadLettered);

        let popped = queue
            .blocking_pop("dlq", Duration::from_millis(10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(popped, Popped::Value(Bytes::from_static(b"{bad json")));
    }

    #[test]
    fn failure_kinds_render_snake_case() {
        assert_eq!(FailureKind::MalformedPayload.to_string(), "malformed_payload");
        assert_eq!(FailureKind::SinkWrite.as_ref(), "sink_write");
    }
}
