use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::domain::notification::{QueueGroup, QueueStats};
use crate::repository::errors::RepositoryError;
use crate::usecase::contracts::{MailTransport, NotificationQueueRepository, TripMemberRepository};
use crate::usecase::dispatcher::{Dispatcher, PurgePolicy};
use crate::usecase::renderer::{RenderOptions, render_batch};
use crate::usecase::selector::BatchSelector;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub ready_groups: usize,
    pub batches_sent: usize,
    pub send_failures: usize,
    pub rows_purged: u64,
    pub purge_failures: usize,
    pub skipped_groups: usize,
}

/// Select, render and dispatch in one pass over the queue.
pub struct NotificationPipeline<Q, T, M>
where
    Q: NotificationQueueRepository + Clone,
    T: TripMemberRepository,
    M: MailTransport,
{
    selector: BatchSelector<Q>,
    dispatcher: Dispatcher<Q, M>,
    member_repository: T,
    render_options: RenderOptions,
    clock: Clock,
    // only one cycle may read and purge the queue at a time
    cycle_lock: Mutex<()>,
}

impl<Q, T, M> NotificationPipeline<Q, T, M>
where
    Q: NotificationQueueRepository + Clone,
    T: TripMemberRepository,
    M: MailTransport,
{
    pub fn new(
        queue_repository: Q,
        member_repository: T,
        mail_transport: M,
        queue_duration: Duration,
        purge_policy: PurgePolicy,
        render_options: RenderOptions,
    ) -> Self {
        Self {
            selector: BatchSelector::new(queue_repository.clone(), queue_duration),
            dispatcher: Dispatcher::new(queue_repository, mail_transport, purge_policy),
            member_repository,
            render_options,
            clock: Arc::new(Utc::now),
            cycle_lock: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, RepositoryError> {
        self.selector.stats(self.now()).await
    }

    /// Runs one cycle at the current clock time.
    pub async fn run_once(&self) -> Result<CycleReport, RepositoryError> {
        self.run_cycle(self.now()).await
    }

    /// Processes every group that is ready at `now`, one after another.
    /// Fails only when the ready groups cannot be selected.
    #[tracing::instrument(skip(self), fields(%now))]
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, RepositoryError> {
        let _guard = self.cycle_lock.lock().await;
        let started = std::time::Instant::now();

        let groups = self.selector.select_ready_groups(now).await?;
        let mut report = CycleReport {
            ready_groups: groups.len(),
            ..CycleReport::default()
        };

        for group in groups {
            self.process_group(group, &mut report).await;
        }

        metrics::histogram!("notification_cycle_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if report.ready_groups > 0 {
            tracing::info!(?report, "notification cycle finished");
        }
        Ok(report)
    }

    async fn process_group(&self, group: QueueGroup, report: &mut CycleReport) {
        let batch = match self.selector.load_batch(group).await {
            Ok(batch) if batch.rows.is_empty() => {
                tracing::debug!(recipient_user_id = %group.recipient_user_id, trip_id = %group.trip_id, "group emptied before load");
                report.skipped_groups += 1;
                return;
            }
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(recipient_user_id = %group.recipient_user_id, trip_id = %group.trip_id, error = %e, "failed to load batch");
                report.skipped_groups += 1;
                return;
            }
        };

        let recipient = match self.member_repository.find_user(group.recipient_user_id).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => {
                tracing::warn!(recipient_user_id = %group.recipient_user_id, "recipient no longer exists, discarding batch");
                let outcome = self.dispatcher.discard(&batch).await;
                report.rows_purged += outcome.purged;
                if outcome.purge_failed {
                    report.purge_failures += 1;
                }
                report.skipped_groups += 1;
                return;
            }
            Err(e) => {
                tracing::error!(recipient_user_id = %group.recipient_user_id, error = %e, "failed to load recipient");
                report.skipped_groups += 1;
                return;
            }
        };

        let message = match render_batch(&recipient, &batch.rows, &self.render_options) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(recipient_user_id = %group.recipient_user_id, error = %e, "failed to render batch");
                report.skipped_groups += 1;
                return;
            }
        };

        let outcome = self.dispatcher.dispatch_and_purge(&batch, &message).await;
        if outcome.sent {
            report.batches_sent += 1;
        } else {
            report.send_failures += 1;
        }
        report.rows_purged += outcome.purged;
        if outcome.purge_failed {
            report.purge_failures += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::email::EmailMessage;
    use crate::domain::notification::{
        LodgingDetails, NewPendingNotification, NotificationKind, NotificationPayload, TripInfo,
        UpdateDetails,
    };
    use crate::domain::recipient::Recipient;
    use crate::repository::memory::{InMemoryNotificationQueue, InMemoryTripMembers};
    use crate::usecase::mail::MailError;
    use crate::usecase::renderer::render_batch;
    use crate::usecase::selector::ReadyBatch;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    #[derive(Clone, Default)]
    pub struct RecordingMailTransport {
        sent: Arc<StdMutex<Vec<(String, String, serde_json::Value)>>>,
        fail: Arc<StdMutex<bool>>,
    }

    impl RecordingMailTransport {
        pub fn sent(&self) -> Vec<(String, String, serde_json::Value)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn set_fail(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    #[async_trait]
    impl MailTransport for RecordingMailTransport {
        async fn send(
            &self,
            to: &str,
            subject: &str,
            _template: &str,
            data: &serde_json::Value,
        ) -> Result<(), MailError> {
            if *self.fail.lock().unwrap() {
                return Err(MailError::Request("smtp relay down".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), data.clone()));
            Ok(())
        }
    }

    pub struct Fixture {
        pub queue: InMemoryNotificationQueue,
        pub members: InMemoryTripMembers,
        pub mail: RecordingMailTransport,
        pub trip_id: Uuid,
        pub recipient: Recipient,
    }

    impl Fixture {
        pub fn new() -> Self {
            let members = InMemoryTripMembers::new();
            let trip_id = Uuid::new_v4();
            let recipient = Recipient {
                id: Uuid::new_v4(),
                email: "uma@example.com".to_string(),
                name: Some("Uma".to_string()),
                notifications_enabled: true,
            };
            members.add_member(trip_id, recipient.clone());

            Self {
                queue: InMemoryNotificationQueue::new(),
                members,
                mail: RecordingMailTransport::default(),
                trip_id,
                recipient,
            }
        }

        pub fn pipeline(
            &self,
            purge_policy: PurgePolicy,
        ) -> NotificationPipeline<InMemoryNotificationQueue, InMemoryTripMembers, RecordingMailTransport>
        {
            let queue = self.queue.clone();
            NotificationPipeline::new(
                self.queue.clone(),
                self.members.clone(),
                self.mail.clone(),
                Duration::milliseconds(3_600_000),
                purge_policy,
                RenderOptions {
                    app_base_url: "http://localhost:3000".to_string(),
                },
            )
            .with_clock(Arc::new(move || queue.now()))
        }

        pub async fn enqueue(&self, updater: &str, details: UpdateDetails) {
            self.enqueue_for(self.recipient.id, updater, details).await;
        }

        pub async fn enqueue_for(&self, recipient_user_id: Uuid, updater: &str, details: UpdateDetails) {
            self.queue
                .insert(&NewPendingNotification::new(
                    self.trip_id,
                    recipient_user_id,
                    Uuid::new_v4(),
                    NotificationPayload {
                        trip: TripInfo {
                            name: "Reykjavik".to_string(),
                            location: Some("Iceland".to_string()),
                        },
                        updater_name: updater.to_string(),
                        details,
                    },
                ))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_single_activity_is_delivered_after_threshold() {
        let fx = Fixture::new();
        fx.enqueue("Alice", UpdateDetails::empty(NotificationKind::Activity)).await;
        fx.queue.advance(Duration::minutes(61));

        let report = fx.pipeline(PurgePolicy::BestEffort).run_once().await.unwrap();

        assert_eq!(report.ready_groups, 1);
        assert_eq!(report.batches_sent, 1);
        assert_eq!(report.rows_purged, 1);
        let sent = fx.mail.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "uma@example.com");
        assert_eq!(sent[0].1, "Alice added a new activity to Reykjavik");
        assert!(fx.queue.rows().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_rows_are_delivered_together() {
        let fx = Fixture::new();
        fx.enqueue("Alice", UpdateDetails::Lodging(LodgingDetails::default())).await;
        fx.queue.advance(Duration::minutes(20));
        fx.enqueue("Bob", UpdateDetails::empty(NotificationKind::Checklist)).await;
        fx.queue.advance(Duration::minutes(70));

        let report = fx.pipeline(PurgePolicy::BestEffort).run_once().await.unwrap();

        assert_eq!(report.batches_sent, 1);
        assert_eq!(report.rows_purged, 2);
        let sent = fx.mail.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "2 new updates to Reykjavik");
        assert_eq!(sent[0].2["lodging"].as_array().unwrap().len(), 1);
        assert_eq!(sent[0].2["checklists"].as_array().unwrap().len(), 1);
        assert_eq!(sent[0].2["updater_text"], "Alice and Bob");
    }

    #[tokio::test]
    async fn test_young_group_is_left_alone() {
        let fx = Fixture::new();
        fx.enqueue("Alice", UpdateDetails::empty(NotificationKind::Activity)).await;
        fx.queue.advance(Duration::minutes(10));

        let report = fx.pipeline(PurgePolicy::BestEffort).run_once().await.unwrap();

        assert_eq!(report, CycleReport::default());
        assert!(fx.mail.sent().is_empty());
        assert_eq!(fx.queue.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_failure_keeps_rows_for_next_cycle() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(PurgePolicy::BestEffort);
        fx.enqueue("Alice", UpdateDetails::empty(NotificationKind::Activity)).await;
        fx.queue.advance(Duration::minutes(61));
        let group = fx.queue.rows()[0].group();
        let first_ids: Vec<i64> = fx.queue.rows().iter().map(|r| r.id).collect();

        fx.queue.set_fail_deletes(true);
        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report.batches_sent, 1);
        assert_eq!(report.purge_failures, 1);

        // a new row arrives before the retry
        fx.enqueue("Bob", UpdateDetails::empty(NotificationKind::Lodging)).await;
        fx.queue.set_fail_deletes(false);

        let groups = pipeline.selector.select_ready_groups(pipeline.now()).await.unwrap();
        assert_eq!(groups, vec![group]);
        let retry: ReadyBatch = pipeline.selector.load_batch(group).await.unwrap();
        let retry_ids = retry.ids();
        assert!(first_ids.iter().all(|id| retry_ids.contains(id)));
        assert_eq!(retry_ids.len(), 2);

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report.rows_purged, 2);
        assert_eq!(fx.mail.sent().len(), 2);
        assert!(fx.queue.rows().is_empty());
    }

    #[tokio::test]
    async fn test_rerender_after_purge_failure_is_equivalent() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(PurgePolicy::BestEffort);
        fx.enqueue("Alice", UpdateDetails::empty(NotificationKind::Activity)).await;
        fx.enqueue("Bob", UpdateDetails::empty(NotificationKind::Checklist)).await;
        fx.queue.advance(Duration::minutes(61));
        let group = fx.queue.rows()[0].group();

        let before = pipeline.selector.load_batch(group).await.unwrap();
        let first: EmailMessage =
            render_batch(&fx.recipient, &before.rows, &pipeline.render_options).unwrap();

        fx.queue.set_fail_deletes(true);
        pipeline.run_once().await.unwrap();

        let after = pipeline.selector.load_batch(group).await.unwrap();
        let second = render_batch(&fx.recipient, &after.rows, &pipeline.render_options).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_send_failure_policies() {
        let fx = Fixture::new();
        fx.enqueue("Alice", UpdateDetails::empty(NotificationKind::Activity)).await;
        fx.queue.advance(Duration::minutes(61));
        fx.mail.set_fail(true);

        let report = fx.pipeline(PurgePolicy::AfterAck).run_once().await.unwrap();
        assert_eq!(report.send_failures, 1);
        assert_eq!(fx.queue.rows().len(), 1);

        let report = fx.pipeline(PurgePolicy::BestEffort).run_once().await.unwrap();
        assert_eq!(report.send_failures, 1);
        assert_eq!(report.rows_purged, 1);
        assert!(fx.queue.rows().is_empty());
    }

    #[tokio::test]
    async fn test_selection_failure_aborts_cycle() {
        let fx = Fixture::new();
        fx.enqueue("Alice", UpdateDetails::empty(NotificationKind::Activity)).await;
        fx.queue.advance(Duration::minutes(61));
        fx.queue.set_fail_selects(true);

        let result = fx.pipeline(PurgePolicy::BestEffort).run_once().await;

        assert!(result.is_err());
        assert_eq!(fx.queue.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_recipient_batch_is_discarded() {
        let fx = Fixture::new();
        fx.enqueue_for(Uuid::new_v4(), "Alice", UpdateDetails::empty(NotificationKind::Activity))
            .await;
        fx.queue.advance(Duration::minutes(61));

        let report = fx.pipeline(PurgePolicy::BestEffort).run_once().await.unwrap();

        assert_eq!(report.skipped_groups, 1);
        assert_eq!(report.rows_purged, 1);
        assert!(fx.mail.sent().is_empty());
        assert!(fx.queue.rows().is_empty());
    }

    #[tokio::test]
    async fn test_three_updaters_in_first_appearance_order() {
        let fx = Fixture::new();
        for name in ["Cleo", "Anton", "Cleo", "Bea"] {
            fx.enqueue(name, UpdateDetails::empty(NotificationKind::Activity)).await;
            fx.queue.advance(Duration::minutes(1));
        }
        fx.queue.advance(Duration::hours(1));

        fx.pipeline(PurgePolicy::BestEffort).run_once().await.unwrap();

        let sent = fx.mail.sent();
        assert_eq!(sent[0].2["updater_text"], "Cleo, Anton and Bea");
        assert_eq!(sent[0].2["activities"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let fx = Fixture::new();
        let other = Uuid::new_v4();
        fx.enqueue("Alice", UpdateDetails::empty(NotificationKind::Activity)).await;
        fx.queue.advance(Duration::minutes(61));
        fx.enqueue_for(other, "Alice", UpdateDetails::empty(NotificationKind::Activity))
            .await;

        let stats = fx.pipeline(PurgePolicy::BestEffort).queue_stats().await.unwrap();

        assert_eq!(stats.pending_rows, 2);
        assert_eq!(stats.groups, 2);
        assert_eq!(stats.ready_groups, 1);
        assert!(stats.oldest_created_at.is_some());
    }
}
