//! In-memory stand-ins for the Postgres repositories, used by scenario tests.
//! They keep the same grouping and ordering rules as the SQL queries.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::{
    domain::notification::{NewPendingNotification, PendingNotification, QueueGroup, QueueStats},
    domain::recipient::Recipient,
    repository::errors::RepositoryError,
    usecase::contracts::{NotificationQueueRepository, TripMemberRepository},
};

struct QueueState {
    next_id: i64,
    now: DateTime<Utc>,
    rows: Vec<PendingNotification>,
    fail_inserts: bool,
    fail_selects: bool,
    fail_deletes: bool,
}

#[derive(Clone)]
pub struct InMemoryNotificationQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryNotificationQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                next_id: 1,
                now: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
                rows: Vec::new(),
                fail_inserts: false,
                fail_selects: false,
                fail_deletes: false,
            })),
        }
    }

    /// Clock used to stamp `created_at` on insert.
    pub fn now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap().now
    }

    pub fn advance(&self, by: Duration) {
        self.state.lock().unwrap().now += by;
    }

    pub fn rows(&self) -> Vec<PendingNotification> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.state.lock().unwrap().fail_inserts = fail;
    }

    pub fn set_fail_selects(&self, fail: bool) {
        self.state.lock().unwrap().fail_selects = fail;
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail_deletes = fail;
    }
}

#[async_trait]
impl NotificationQueueRepository for InMemoryNotificationQueue {
    async fn insert(
        &self,
        notification: &NewPendingNotification,
    ) -> Result<PendingNotification, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_inserts {
            return Err(RepositoryError::DatabaseError("insert failed".to_string()));
        }

        let row = PendingNotification {
            id: state.next_id,
            trip_id: notification.trip_id,
            recipient_user_id: notification.recipient_user_id,
            updater_user_id: notification.updater_user_id,
            payload: notification.payload.clone(),
            created_at: state.now,
        };
        state.next_id += 1;
        state.rows.push(row.clone());
        Ok(row)
    }

    async fn find_ready_groups(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<QueueGroup>, RepositoryError> {
        let state = self.state.lock().unwrap();
        if state.fail_selects {
            return Err(RepositoryError::DatabaseError("select failed".to_string()));
        }

        let mut oldest: HashMap<QueueGroup, DateTime<Utc>> = HashMap::new();
        for row in &state.rows {
            let entry = oldest.entry(row.group()).or_insert(row.created_at);
            if row.created_at < *entry {
                *entry = row.created_at;
            }
        }

        let mut ready: Vec<(QueueGroup, DateTime<Utc>)> = oldest
            .into_iter()
            .filter(|(_, created_at)| *created_at <= cutoff)
            .collect();
        ready.sort_by_key(|(_, created_at)| *created_at);
        Ok(ready.into_iter().map(|(group, _)| group).collect())
    }

    async fn find_by_group(
        &self,
        group: QueueGroup,
    ) -> Result<Vec<PendingNotification>, RepositoryError> {
        let state = self.state.lock().unwrap();
        if state.fail_selects {
            return Err(RepositoryError::DatabaseError("select failed".to_string()));
        }

        let mut rows: Vec<PendingNotification> = state
            .rows
            .iter()
            .filter(|row| row.group() == group)
            .cloned()
            .collect();
        rows.sort_by_key(|row| (row.created_at, row.id));
        Ok(rows)
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<u64, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes {
            return Err(RepositoryError::DatabaseError("delete failed".to_string()));
        }

        let ids: HashSet<i64> = ids.iter().copied().collect();
        let before = state.rows.len();
        state.rows.retain(|row| !ids.contains(&row.id));
        Ok((before - state.rows.len()) as u64)
    }

    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<QueueStats, RepositoryError> {
        let ready_groups = self.find_ready_groups(cutoff).await?.len() as i64;
        let state = self.state.lock().unwrap();
        let groups: HashSet<QueueGroup> = state.rows.iter().map(|row| row.group()).collect();

        Ok(QueueStats {
            pending_rows: state.rows.len() as i64,
            groups: groups.len() as i64,
            ready_groups,
            oldest_created_at: state.rows.iter().map(|row| row.created_at).min(),
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTripMembers {
    members: Arc<Mutex<HashMap<Uuid, Vec<Recipient>>>>,
    users: Arc<Mutex<HashMap<Uuid, Recipient>>>,
}

impl InMemoryTripMembers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, trip_id: Uuid, recipient: Recipient) {
        self.users
            .lock()
            .unwrap()
            .insert(recipient.id, recipient.clone());
        self.members
            .lock()
            .unwrap()
            .entry(trip_id)
            .or_default()
            .push(recipient);
    }
}

#[async_trait]
impl TripMemberRepository for InMemoryTripMembers {
    async fn find_notifiable_members(
        &self,
        trip_id: Uuid,
        exclude_user_id: Uuid,
    ) -> Result<Vec<Recipient>, RepositoryError> {
        let members = self.members.lock().unwrap();
        Ok(members
            .get(&trip_id)
            .map(|list| {
                list.iter()
                    .filter(|m| m.id != exclude_user_id && m.notifications_enabled)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<Recipient>, RepositoryError> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }
}
