//! Shared router state. One struct holding every service the handlers need,
//! with manual `FromRef` impls per field — the same shape as the teacher's
//! `auth::api::builder::RouterState`, generalized from two services
//! (`user_manager`, `key_manager`) to the full set this control plane wires
//! together.

use std::sync::Arc;

use axum::extract::FromRef;
use platform_adapters::RuntimeAdapter;
use platform_auth::TokenIssuer;
use platform_broadcaster::Broadcaster;
use platform_cleanup::CleanupOrchestrator;
use platform_common::rate_limit::RateLimiter;
use platform_pipeline::DeploymentHandler;
use platform_queue::Queue;
use platform_store::Store;
use platform_webhook::WebhookIngestor;

use crate::metrics::Metrics;

pub struct AppState<A> {
    pub store: Store,
    pub queue: Queue,
    pub broadcaster: Broadcaster,
    pub auth: TokenIssuer,
    pub pipeline: Arc<DeploymentHandler<A>>,
    pub cleanup: Arc<CleanupOrchestrator<A>>,
    pub webhook: Arc<WebhookIngestor>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
    pub webhook_secret: Arc<str>,
    pub gitlab_webhook_secret: Arc<str>,
}

impl<A> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            queue: self.queue.clone(),
            broadcaster: self.broadcaster.clone(),
            auth: self.auth.clone(),
            pipeline: self.pipeline.clone(),
            cleanup: self.cleanup.clone(),
            webhook: self.webhook.clone(),
            rate_limiter: self.rate_limiter.clone(),
            metrics: self.metrics.clone(),
            webhook_secret: self.webhook_secret.clone(),
            gitlab_webhook_secret: self.gitlab_webhook_secret.clone(),
        }
    }
}

impl<A: RuntimeAdapter + 'static> FromRef<AppState<A>> for TokenIssuer {
    fn from_ref(state: &AppState<A>) -> Self {
        state.auth.clone()
    }
}
