use chrono::{DateTime, Duration, Utc};

use crate::domain::notification::{PendingNotification, QueueGroup, QueueStats};
use crate::repository::errors::RepositoryError;
use crate::usecase::contracts::NotificationQueueRepository;

/// All pending rows of one group, as read for a single delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyBatch {
    pub group: QueueGroup,
    pub rows: Vec<PendingNotification>,
}

impl ReadyBatch {
    pub fn ids(&self) -> Vec<i64> {
        self.rows.iter().map(|row| row.id).collect()
    }
}

pub struct BatchSelector<Q>
where
    Q: NotificationQueueRepository,
{
    queue_repository: Q,
    queue_duration: Duration,
}

impl<Q> BatchSelector<Q>
where
    Q: NotificationQueueRepository,
{
    pub fn new(queue_repository: Q, queue_duration: Duration) -> Self {
        Self {
            queue_repository,
            queue_duration,
        }
    }

    /// Rows created at or before the cutoff are old enough to deliver.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, RepositoryError> {
        now.checked_sub_signed(self.queue_duration).ok_or_else(|| {
            tracing::error!(%now, queue_duration_ms = self.queue_duration.num_milliseconds(), "queue duration out of range");
            RepositoryError::InvalidQuery(format!(
                "queue duration of {} ms is out of range",
                self.queue_duration.num_milliseconds()
            ))
        })
    }

    /// Groups whose oldest row is at least `queue_duration` old.
    #[tracing::instrument(skip(self), fields(%now))]
    pub async fn select_ready_groups(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueGroup>, RepositoryError> {
        let cutoff = self.cutoff(now)?;
        let groups = self.queue_repository.find_ready_groups(cutoff).await?;

        if groups.is_empty() {
            tracing::debug!(%cutoff, "no notification groups ready");
        } else {
            tracing::info!(%cutoff, count = groups.len(), "notification groups ready");
        }
        Ok(groups)
    }

    /// Loads every pending row of the group, including rows younger than the
    /// threshold, so a group is never split across deliveries.
    #[tracing::instrument(skip(self), fields(recipient_user_id = %group.recipient_user_id, trip_id = %group.trip_id))]
    pub async fn load_batch(&self, group: QueueGroup) -> Result<ReadyBatch, RepositoryError> {
        let rows = self.queue_repository.find_by_group(group).await?;
        tracing::debug!(count = rows.len(), "batch loaded");
        Ok(ReadyBatch { group, rows })
    }

    #[tracing::instrument(skip(self), fields(%now))]
    pub async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats, RepositoryError> {
        self.queue_repository.stats(self.cutoff(now)?).await
    }
}
