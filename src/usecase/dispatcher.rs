use serde::{Deserialize, Serialize};

use crate::domain::email::EmailMessage;
use crate::usecase::contracts::{MailTransport, NotificationQueueRepository};
use crate::usecase::selector::ReadyBatch;

/// When consumed rows are removed from the queue relative to the send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgePolicy {
    /// Purge whether or not the transport accepted the message (at most once).
    #[default]
    BestEffort,
    /// Purge only after the transport accepted the message (at least once).
    AfterAck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub sent: bool,
    pub purged: u64,
    pub purge_failed: bool,
}

pub struct Dispatcher<Q, M>
where
    Q: NotificationQueueRepository,
    M: MailTransport,
{
    queue_repository: Q,
    mail_transport: M,
    purge_policy: PurgePolicy,
}

impl<Q, M> Dispatcher<Q, M>
where
    Q: NotificationQueueRepository,
    M: MailTransport,
{
    pub fn new(queue_repository: Q, mail_transport: M, purge_policy: PurgePolicy) -> Self {
        Self {
            queue_repository,
            mail_transport,
            purge_policy,
        }
    }

    /// Sends the digest, then deletes exactly the rows it was built from.
    #[tracing::instrument(skip(self, batch, message), fields(recipient_user_id = %batch.group.recipient_user_id, trip_id = %batch.group.trip_id, rows = batch.rows.len()))]
    pub async fn dispatch_and_purge(
        &self,
        batch: &ReadyBatch,
        message: &EmailMessage,
    ) -> DispatchOutcome {
        let sent = self.send(message).await;

        if !sent && self.purge_policy == PurgePolicy::AfterAck {
            tracing::warn!("send not acknowledged, keeping rows for the next cycle");
            return DispatchOutcome {
                sent,
                purged: 0,
                purge_failed: false,
            };
        }

        let (purged, purge_failed) = self.purge(batch).await;
        DispatchOutcome {
            sent,
            purged,
            purge_failed,
        }
    }

    /// Deletes the batch's rows without sending anything.
    pub async fn discard(&self, batch: &ReadyBatch) -> DispatchOutcome {
        let (purged, purge_failed) = self.purge(batch).await;
        DispatchOutcome {
            sent: false,
            purged,
            purge_failed,
        }
    }

    async fn send(&self, message: &EmailMessage) -> bool {
        let data = match serde_json::to_value(&message.data) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize digest data");
                metrics::counter!("notification_send_failures_total").increment(1);
                return false;
            }
        };

        match self
            .mail_transport
            .send(&message.to, &message.subject, &message.template, &data)
            .await
        {
            Ok(()) => {
                metrics::counter!("notification_batches_sent_total").increment(1);
                tracing::info!(to = %message.to, subject = %message.subject, "digest email sent");
                true
            }
            Err(e) => {
                metrics::counter!("notification_send_failures_total").increment(1);
                tracing::error!(to = %message.to, error = %e, "failed to send digest email");
                false
            }
        }
    }

    async fn purge(&self, batch: &ReadyBatch) -> (u64, bool) {
        let ids = batch.ids();
        match self.queue_repository.delete_by_ids(&ids).await {
            Ok(purged) => {
                tracing::debug!(purged, "batch purged from queue");
                (purged, false)
            }
            Err(e) => {
                metrics::counter!("notification_purge_failures_total").increment(1);
                tracing::error!(error = %e, "failed to purge batch, rows stay queued for retry");
                (0, true)
            }
        }
    }
}
