use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::{
    domain::notification::{
        NewPendingNotification, NotificationKind, NotificationPayload, PendingNotification,
        QueueGroup, QueueStats,
    },
    domain::recipient::Recipient,
    repository::errors::RepositoryError,
    usecase::contracts::{NotificationQueueRepository, TripMemberRepository},
};

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Creates the queue table and its indexes when absent.
pub async fn initialize(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!().run(pool).await
}

#[derive(Debug, sqlx::FromRow)]
struct PendingNotificationRow {
    id: i64,
    trip_id: Uuid,
    recipient_user_id: Uuid,
    updater_user_id: Uuid,
    kind: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<PendingNotificationRow> for PendingNotification {
    type Error = RepositoryError;

    fn try_from(row: PendingNotificationRow) -> Result<Self, Self::Error> {
        let kind = NotificationKind::parse(&row.kind).ok_or_else(|| {
            RepositoryError::DatabaseError(format!(
                "unknown notification kind '{}' on row {}",
                row.kind, row.id
            ))
        })?;

        Ok(PendingNotification {
            id: row.id,
            trip_id: row.trip_id,
            recipient_user_id: row.recipient_user_id,
            updater_user_id: row.updater_user_id,
            payload: NotificationPayload::from_document(kind, row.payload),
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PostgresNotificationQueueRepository {
    pool: PgPool,
}

impl PostgresNotificationQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationQueueRepository for PostgresNotificationQueueRepository {
    #[tracing::instrument(skip(self, notification), fields(trip_id = %notification.trip_id, recipient_user_id = %notification.recipient_user_id, kind = %notification.kind()))]
    async fn insert(
        &self,
        notification: &NewPendingNotification,
    ) -> Result<PendingNotification, RepositoryError> {
        tracing::debug!("inserting pending notification");

        let row = sqlx::query_as::<_, PendingNotificationRow>(
            r#"
            INSERT INTO pending_notifications (trip_id, recipient_user_id, updater_user_id, kind, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, trip_id, recipient_user_id, updater_user_id, kind, payload, created_at
            "#,
        )
        .bind(notification.trip_id)
        .bind(notification.recipient_user_id)
        .bind(notification.updater_user_id)
        .bind(notification.kind().as_str())
        .bind(notification.payload.to_document())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(notification_id = row.id, "pending notification inserted");
        row.try_into()
    }

    #[tracing::instrument(skip(self), fields(%cutoff))]
    async fn find_ready_groups(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<QueueGroup>, RepositoryError> {
        tracing::debug!("finding ready notification groups");

        let groups = sqlx::query_as::<_, QueueGroup>(
            r#"
            SELECT recipient_user_id, trip_id
            FROM pending_notifications
            GROUP BY recipient_user_id, trip_id
            HAVING MIN(created_at) <= $1
            ORDER BY MIN(created_at) ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(count = groups.len(), "found ready groups");
        Ok(groups)
    }

    #[tracing::instrument(skip(self), fields(recipient_user_id = %group.recipient_user_id, trip_id = %group.trip_id))]
    async fn find_by_group(
        &self,
        group: QueueGroup,
    ) -> Result<Vec<PendingNotification>, RepositoryError> {
        tracing::debug!("loading pending notifications for group");

        let rows = sqlx::query_as::<_, PendingNotificationRow>(
            r#"
            SELECT id, trip_id, recipient_user_id, updater_user_id, kind, payload, created_at
            FROM pending_notifications
            WHERE recipient_user_id = $1 AND trip_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(group.recipient_user_id)
        .bind(group.trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(count = rows.len(), "loaded group rows");
        rows.into_iter().map(PendingNotification::try_from).collect()
    }

    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_by_ids(&self, ids: &[i64]) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }

        tracing::debug!("deleting processed notifications");

        let result = sqlx::query(
            r#"
            DELETE FROM pending_notifications
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(deleted = result.rows_affected(), "processed notifications deleted");
        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self), fields(%cutoff))]
    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<QueueStats, RepositoryError> {
        let (pending_rows, groups, ready_groups, oldest_created_at) =
            sqlx::query_as::<_, (i64, i64, i64, Option<DateTime<Utc>>)>(
                r#"
                SELECT
                    COUNT(*) AS pending_rows,
                    COUNT(DISTINCT (recipient_user_id, trip_id)) AS groups,
                    (
                        SELECT COUNT(*) FROM (
                            SELECT 1
                            FROM pending_notifications
                            GROUP BY recipient_user_id, trip_id
                            HAVING MIN(created_at) <= $1
                        ) ready
                    ) AS ready_groups,
                    MIN(created_at) AS oldest_created_at
                FROM pending_notifications
                "#,
            )
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(QueueStats {
            pending_rows,
            groups,
            ready_groups,
            oldest_created_at,
        })
    }
}

#[derive(Clone)]
pub struct PostgresTripMemberRepository {
    pool: PgPool,
}

impl PostgresTripMemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TripMemberRepository for PostgresTripMemberRepository {
    #[tracing::instrument(skip(self), fields(trip_id = %trip_id, exclude_user_id = %exclude_user_id))]
    async fn find_notifiable_members(
        &self,
        trip_id: Uuid,
        exclude_user_id: Uuid,
    ) -> Result<Vec<Recipient>, RepositoryError> {
        tracing::debug!("finding notifiable trip members");

        let members = sqlx::query_as::<_, Recipient>(
            r#"
            SELECT u.id, u.email, u.name, u.notifications_enabled
            FROM trip_members tm
            JOIN users u ON u.id = tm.user_id
            WHERE tm.trip_id = $1
              AND tm.user_id <> $2
              AND u.notifications_enabled = TRUE
            ORDER BY u.email
            "#,
        )
        .bind(trip_id)
        .bind(exclude_user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        tracing::debug!(count = members.len(), "found notifiable members");
        Ok(members)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn find_user(&self, user_id: Uuid) -> Result<Option<Recipient>, RepositoryError> {
        let user = sqlx::query_as::<_, Recipient>(
            r#"
            SELECT id, email, name, notifications_enabled
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::DatabaseError(e.to_string()))?;

        Ok(user)
    }
}
