use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::usecase::contracts::{MailTransport, NotificationQueueRepository, TripMemberRepository};
use crate::usecase::pipeline::NotificationPipeline;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub warmup_delay: Duration,
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the background loop that drains the notification queue.
pub struct NotificationScheduler<Q, T, M>
where
    Q: NotificationQueueRepository + Clone + 'static,
    T: TripMemberRepository + 'static,
    M: MailTransport + 'static,
{
    pipeline: Arc<NotificationPipeline<Q, T, M>>,
    config: SchedulerConfig,
    running: Option<RunningLoop>,
}

impl<Q, T, M> NotificationScheduler<Q, T, M>
where
    Q: NotificationQueueRepository + Clone + 'static,
    T: TripMemberRepository + 'static,
    M: MailTransport + 'static,
{
    pub fn new(pipeline: Arc<NotificationPipeline<Q, T, M>>, config: SchedulerConfig) -> Self {
        Self {
            pipeline,
            config,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawns the loop: one warm-up cycle after `warmup_delay`, then one cycle
    /// per `poll_interval`. Returns false if the loop is already running.
    pub fn start(&mut self) -> bool {
        if self.running.is_some() {
            tracing::warn!("notification scheduler already running");
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(self.pipeline.clone(), self.config, shutdown_rx));
        self.running = Some(RunningLoop { shutdown, handle });

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            warmup_delay_ms = self.config.warmup_delay.as_millis() as u64,
            "notification scheduler started"
        );
        true
    }

    /// Prevents further ticks and waits for a cycle already in progress.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "notification scheduler task failed");
        }
        tracing::info!("notification scheduler stopped");
    }
}

async fn run_loop<Q, T, M>(
    pipeline: Arc<NotificationPipeline<Q, T, M>>,
    config: SchedulerConfig,
    mut shutdown: watch::Receiver<bool>,
) where
    Q: NotificationQueueRepository + Clone + 'static,
    T: TripMemberRepository + 'static,
    M: MailTransport + 'static,
{
    tokio::select! {
        _ = tokio::time::sleep(config.warmup_delay) => {}
        _ = shutdown.changed() => return,
    }

    tracing::debug!("running warm-up notification cycle");
    run_logged(&pipeline).await;

    let mut interval = tokio::time::interval_at(
        Instant::now() + config.poll_interval,
        config.poll_interval,
    );
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => run_logged(&pipeline).await,
            _ = shutdown.changed() => break,
        }
    }
}

async fn run_logged<Q, T, M>(pipeline: &NotificationPipeline<Q, T, M>)
where
    Q: NotificationQueueRepository + Clone,
    T: TripMemberRepository,
    M: MailTransport,
{
    if let Err(e) = pipeline.run_once().await {
        metrics::counter!("notification_cycle_failures_total").increment(1);
        tracing::error!(error = %e, "notification cycle failed, retrying next tick");
    }
}
