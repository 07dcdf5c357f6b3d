use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    domain::notification::{NewPendingNotification, PendingNotification, QueueGroup, QueueStats},
    domain::recipient::Recipient,
    repository::errors::RepositoryError,
    usecase::mail::MailError,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationQueueRepository: Send + Sync {
    async fn insert(
        &self,
        notification: &NewPendingNotification,
    ) -> Result<PendingNotification, RepositoryError>;
    async fn find_ready_groups(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<QueueGroup>, RepositoryError>;
    async fn find_by_group(
        &self,
        group: QueueGroup,
    ) -> Result<Vec<PendingNotification>, RepositoryError>;
    async fn delete_by_ids(&self, ids: &[i64]) -> Result<u64, RepositoryError>;
    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<QueueStats, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TripMemberRepository: Send + Sync {
    async fn find_notifiable_members(
        &self,
        trip_id: Uuid,
        exclude_user_id: Uuid,
    ) -> Result<Vec<Recipient>, RepositoryError>;
    async fn find_user(&self, user_id: Uuid) -> Result<Option<Recipient>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        data: &serde_json::Value,
    ) -> Result<(), MailError>;
}

#[async_trait]
impl<T: NotificationQueueRepository + ?Sized> NotificationQueueRepository for Arc<T> {
    async fn insert(
        &self,
        notification: &NewPendingNotification,
    ) -> Result<PendingNotification, RepositoryError> {
        (**self).insert(notification).await
    }

    async fn find_ready_groups(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<QueueGroup>, RepositoryError> {
        (**self).find_ready_groups(cutoff).await
    }

    async fn find_by_group(
        &self,
        group: QueueGroup,
    ) -> Result<Vec<PendingNotification>, RepositoryError> {
        (**self).find_by_group(group).await
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<u64, RepositoryError> {
        (**self).delete_by_ids(ids).await
    }

    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<QueueStats, RepositoryError> {
        (**self).stats(cutoff).await
    }
}

#[async_trait]
impl<T: TripMemberRepository + ?Sized> TripMemberRepository for Arc<T> {
    async fn find_notifiable_members(
        &self,
        trip_id: Uuid,
        exclude_user_id: Uuid,
    ) -> Result<Vec<Recipient>, RepositoryError> {
        (**self).find_notifiable_members(trip_id, exclude_user_id).await
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<Recipient>, RepositoryError> {
        (**self).find_user(user_id).await
    }
}
