use uuid::Uuid;

use crate::domain::notification::{
    NewPendingNotification, NotificationPayload, TripInfo, UpdateDetails,
};
use crate::usecase::contracts::{NotificationQueueRepository, TripMemberRepository};

const UNKNOWN_UPDATER: &str = "A trip member";

pub struct EnqueueUseCase<Q, T>
where
    Q: NotificationQueueRepository,
    T: TripMemberRepository,
{
    queue_repository: Q,
    member_repository: T,
}

impl<Q, T> EnqueueUseCase<Q, T>
where
    Q: NotificationQueueRepository,
    T: TripMemberRepository,
{
    pub fn new(queue_repository: Q, member_repository: T) -> Self {
        Self {
            queue_repository,
            member_repository,
        }
    }

    /// Queues one notification per trip member who should hear about this
    /// update. Failures are logged and never reach the caller; the return
    /// value is the number of rows actually written.
    #[tracing::instrument(skip(self, details, trip), fields(%trip_id, %updater_user_id, kind = %details.kind()))]
    pub async fn notify_trip_members(
        &self,
        trip_id: Uuid,
        updater_user_id: Uuid,
        details: UpdateDetails,
        trip: TripInfo,
    ) -> usize {
        tracing::debug!("queueing trip update notifications");

        let recipients = match self
            .member_repository
            .find_notifiable_members(trip_id, updater_user_id)
            .await
        {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::error!(error = %e, "failed to resolve notification recipients");
                metrics::counter!("notification_enqueue_failures_total", "stage" => "recipients")
                    .increment(1);
                return 0;
            }
        };

        if recipients.is_empty() {
            tracing::debug!("no eligible recipients for trip update");
            return 0;
        }

        let updater_name = match self.member_repository.find_user(updater_user_id).await {
            Ok(Some(updater)) => updater.display_name(),
            Ok(None) => {
                tracing::warn!("updater not found, using placeholder name");
                UNKNOWN_UPDATER.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load updater, using placeholder name");
                UNKNOWN_UPDATER.to_string()
            }
        };

        let payload = NotificationPayload {
            trip,
            updater_name,
            details,
        };

        let mut queued = 0;
        for recipient in &recipients {
            let notification =
                NewPendingNotification::new(trip_id, recipient.id, updater_user_id, payload.clone());

            match self.queue_repository.insert(&notification).await {
                Ok(row) => {
                    tracing::debug!(notification_id = row.id, recipient_user_id = %recipient.id, "notification queued");
                    queued += 1;
                }
                Err(e) => {
                    tracing::error!(recipient_user_id = %recipient.id, error = %e, "failed to queue notification");
                    metrics::counter!("notification_enqueue_failures_total", "stage" => "insert")
                        .increment(1);
                }
            }
        }

        metrics::counter!("notification_rows_enqueued_total").increment(queued as u64);
        tracing::info!(recipients = recipients.len(), queued, "trip update notifications queued");
        queued
    }
}
