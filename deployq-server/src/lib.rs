pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod shutdown;
pub mod state;

use axum::routing::{get, post};
use axum::{middleware, Router};
use config::Settings;
use deployq::Queue;
use deployq_async::{
    AsyncWorker, CommandDeployer, GroupScheduler, MemoryStore, QueueStore, RedisStore,
    WorkerConfig,
};
use error::ServerError;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Rate limit, then API key, then routing.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/deploy", post(handlers::deploy))
        .route("/health", get(handlers::health))
        .route("/jobs/{id}", get(handlers::job))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_by_ip,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The ingress and the worker sharing one scheduler.
pub struct Server {
    settings: Settings,
    scheduler: GroupScheduler,
}

impl Server {
    /// Connects the store and applies the startup policy to it.
    pub async fn new(settings: Settings) -> Result<Self, ServerError> {
        let store: Arc<dyn QueueStore> = if settings.uses_memory_store() {
            tracing::warn!("using the in-memory store, jobs do not survive a restart");
            Arc::new(MemoryStore::new())
        } else {
            let queue = Queue::with_prefix(&settings.queue_prefix);
            Arc::new(RedisStore::new(&settings.redis_url, queue).await?)
        };

        let scheduler = GroupScheduler::start(store, settings.startup_policy)
            .await?
            .with_max_pending(settings.max_pending_per_group);

        Ok(Self {
            settings,
            scheduler,
        })
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let settings = &self.settings;

        let worker = AsyncWorker::new(
            self.scheduler.clone(),
            CommandDeployer::new(settings.deploy_command.as_str()),
            WorkerConfig {
                concurrency: settings.worker_concurrency,
                deploy_timeout: settings.deploy_timeout,
                ..Default::default()
            },
        );
        let worker = tokio::spawn(worker.run(shutdown.clone()));

        let limiter = Arc::new(rate_limit::IpRateLimiter::new(
            settings.rate_limit_window,
            settings.rate_limit_max_requests,
        ));
        let pruner =
            rate_limit::spawn_pruner(limiter.clone(), LIMITER_PRUNE_INTERVAL, shutdown.clone());

        let state = AppState::new(self.scheduler.clone(), &settings.api_key, limiter);
        let app = create_router(state);

        let addr = settings.bind_addr();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "starting deployments server");

        let serve_shutdown = shutdown.clone();
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
        .await;

        // stop the worker too when serving ends on its own
        shutdown.cancel();
        if let Err(err) = worker.await {
            tracing::error!("worker task ERROR: {err}");
        }
        pruner.abort();

        served?;
        tracing::info!("deployments server stopped");
        Ok(())
    }
}
