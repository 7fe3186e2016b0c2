use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use platform_adapters::{HttpAdapter, MockAdapter};
use platform_api::{config::Config, routes::build_router, state::AppState};
use platform_auth::TokenIssuer;
use platform_broadcaster::Broadcaster;
use platform_cleanup::CleanupOrchestrator;
use platform_common::{models::JobType, rate_limit::RateLimiter};
use platform_pipeline::{DeploymentHandler, PipelineConfig};
use platform_queue::Queue;
use platform_store::Store;
use platform_webhook::WebhookIngestor;
use platform_worker::{JobHandler, WorkerPool, WorkerPoolConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap();
    tracing_subscriber::registry().with(filter_layer).with(fmt::layer()).init();

    let store = Store::connect(&config.store).await?;

    if config.use_mock_infra {
        run(config, store, Arc::new(MockAdapter::new())).await
    } else {
        run(
            config.clone(),
            store,
            Arc::new(HttpAdapter::new(
                config.pipeline.registry_url.clone(),
                config.compute_url.clone(),
                config.dns_url.clone(),
                config.router_url.clone(),
            )),
        )
        .await
    }
}

async fn run<A>(config: Config, store: Store, adapter: A) -> anyhow::Result<()>
where
    A: platform_adapters::ImageAdapter
        + platform_adapters::CloneAdapter
        + platform_adapters::WorkloadAdapter
        + platform_adapters::NetworkAdapter
        + platform_adapters::RouterAdapter
        + Clone
        + Send
        + Sync
        + 'static,
{
    let queue = Queue::new(store.clone());
    let broadcaster = Broadcaster::new(store.clone());
    let auth = TokenIssuer::new(config.auth.clone(), store.clone());
    let webhook = Arc::new(WebhookIngestor::new(store.clone(), queue.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_requests, Duration::from_secs(config.rate_limit_window_secs)));
    let metrics = Arc::new(platform_api::metrics::Metrics::default());

    let pipeline = Arc::new(DeploymentHandler::new(
        store.clone(),
        broadcaster.clone(),
        adapter.clone(),
        PipelineConfig::from(config.pipeline.clone()),
    ));
    let cleanup = Arc::new(CleanupOrchestrator::new(store.clone(), adapter.clone()));

    let mut handlers: HashMap<JobType, Arc<dyn JobHandler>> = HashMap::new();
    handlers.insert(JobType::Build, pipeline.clone());
    handlers.insert(JobType::Rollback, pipeline.clone());
    handlers.insert(JobType::CleanupService, cleanup.clone());
    handlers.insert(JobType::CleanupProject, cleanup.clone());

    let pool = WorkerPool::new(
        queue.clone(),
        handlers,
        WorkerPoolConfig { pool_size: config.worker_count, ..Default::default() },
    );
    let worker_handles = pool.start();

    let state = AppState {
        store,
        queue,
        broadcaster,
        auth,
        pipeline,
        cleanup,
        webhook,
        rate_limiter,
        metrics,
        webhook_secret: Arc::from(config.webhook_secret.as_str()),
        gitlab_webhook_secret: Arc::from(config.gitlab_webhook_secret.clone().unwrap_or_default().as_str()),
    };

    let router = build_router(state);

    info!(addr = %config.bind_addr, "listening");
    let server = axum::Server::bind(&config.bind_addr).serve(router.into_make_service());

    tokio::select! {
        result = server => { result?; }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining workers");
            pool.shutdown();
        }
    }

    for handle in worker_handles {
        let _ = handle.await;
    }

    Ok(())
}
