mod config;
mod delivery;
mod domain;
mod repository;
mod telemetry;
mod usecase;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower_http::trace::TraceLayer;

use crate::delivery::http::v1::admin::{flush_queue, get_queue_stats};
use crate::delivery::http::v1::middleware::auth_middleware;
use crate::delivery::http::v1::updates::report_trip_update;
use crate::repository::postgres::{
    create_pool, initialize, PostgresNotificationQueueRepository, PostgresTripMemberRepository,
};
use crate::usecase::contracts::{MailTransport, NotificationQueueRepository, TripMemberRepository};
use crate::usecase::enqueue::EnqueueUseCase;
use crate::usecase::jwt::JwtService;
use crate::usecase::mail::{HttpMailTransport, LogMailTransport};
use crate::usecase::pipeline::NotificationPipeline;
use crate::usecase::renderer::RenderOptions;
use crate::usecase::scheduler::{NotificationScheduler, SchedulerConfig};

type QueueRepository = Arc<dyn NotificationQueueRepository>;
type MemberRepository = Arc<dyn TripMemberRepository>;
type SharedPipeline = NotificationPipeline<QueueRepository, MemberRepository, Arc<dyn MailTransport>>;

pub struct AppState {
    pub enqueue_usecase: EnqueueUseCase<QueueRepository, MemberRepository>,
    pub pipeline: Arc<SharedPipeline>,
    pub jwt_service: JwtService,
    pub metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::AppConfig::from_env().context("failed to load configuration")?;

    telemetry::init(&config).map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {e}"))?;

    tracing::info!("starting the trip notifications service");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    metrics_process::Collector::default().describe();
    tracing::info!("prometheus metrics initialized");

    tracing::info!(
        telemetry_enabled = config.telemetry_enabled,
        purge_policy = ?config.purge_policy,
        queue_duration_ms = config.queue_duration_ms,
        "config loaded"
    );

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to create database pool")?;
    tracing::info!("database pool created");

    initialize(&pool).await?;
    tracing::info!("database migrations applied");

    let queue_repository: QueueRepository =
        Arc::new(PostgresNotificationQueueRepository::new(pool.clone()));
    let member_repository: MemberRepository = Arc::new(PostgresTripMemberRepository::new(pool));

    let mail_transport: Arc<dyn MailTransport> = match &config.mail_api_url {
        Some(url) => Arc::new(HttpMailTransport::new(
            url.clone(),
            config.mail_api_key.clone(),
            config.mail_from.clone(),
            config.mail_timeout(),
        )?),
        None => {
            tracing::warn!("MAIL_API_URL not set, digests will only be logged");
            Arc::new(LogMailTransport)
        }
    };

    let pipeline = Arc::new(NotificationPipeline::new(
        queue_repository.clone(),
        member_repository.clone(),
        mail_transport,
        config.queue_duration(),
        config.purge_policy,
        RenderOptions {
            app_base_url: config.app_base_url.clone(),
        },
    ));

    let mut scheduler = NotificationScheduler::new(
        pipeline.clone(),
        SchedulerConfig {
            poll_interval: config.poll_interval(),
            warmup_delay: config.warmup_delay(),
        },
    );
    scheduler.start();

    let shared_state = Arc::new(AppState {
        enqueue_usecase: EnqueueUseCase::new(queue_repository, member_repository),
        pipeline,
        jwt_service: JwtService::new(config.jwt_secret.clone()),
        metrics_handle,
    });

    let router = router(shared_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "trip notifications service running");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if scheduler.is_running() {
        scheduler.stop().await;
    }
    tracing::info!("trip notifications service stopped");

    Ok(())
}

pub(crate) fn router(shared_state: Arc<AppState>) -> Router {
    // All API routes require authentication
    let api = Router::new()
        .route("/api/v1/trips/{trip_id}/updates", post(report_trip_update))
        .route("/api/v1/admin/notifications/queue", get(get_queue_stats))
        .route("/api/v1/admin/notifications/flush", post(flush_queue))
        .layer(middleware::from_fn_with_state(
            shared_state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    metrics_process::Collector::default().collect();
    state.metrics_handle.render()
}

#[tracing::instrument]
async fn healthz() -> &'static str {
    "OK"
}
