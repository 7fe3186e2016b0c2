mod deployments;
mod health;
mod resources;
mod webhooks;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use platform_adapters::RuntimeAdapter;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub fn build_router<A: RuntimeAdapter + 'static>(state: AppState<A>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/webhooks/github", post(webhooks::github))
        .route("/webhooks/gitlab", post(webhooks::gitlab))
        .route("/v1/orgs/:org_id/projects", get(resources::list_projects).post(resources::create_project))
        .route("/v1/projects/:id", get(resources::get_project).delete(resources::delete_project))
        .route(
            "/v1/projects/:project_id/services",
            get(resources::list_services).post(resources::create_service),
        )
        .route("/v1/services/:id", get(resources::get_service).delete(resources::delete_service))
        .route(
            "/v1/projects/:project_id/databases",
            get(resources::list_databases).post(resources::create_database),
        )
        .route("/v1/databases/:id", get(resources::get_database).delete(resources::delete_database))
        .route(
            "/v1/projects/:project_id/volumes",
            post(resources::create_volume),
        )
        .route("/v1/volumes/:id", get(resources::get_volume).delete(resources::delete_volume))
        .route(
            "/v1/services/:service_id/env",
            get(resources::list_env_vars),
        )
        .route(
            "/v1/services/:service_id/env/:key",
            put(resources::upsert_env_var).delete(resources::delete_env_var),
        )
        .route(
            "/v1/services/:service_id/domains",
            get(resources::list_custom_domains).post(resources::create_custom_domain),
        )
        .route("/v1/domains/:id", delete(resources::delete_custom_domain))
        .route("/services/:id/deploy", post(deployments::deploy))
        .route("/services/:id/rollback/:deployment_id", post(deployments::rollback))
        .route("/services/:id/rollback-candidates", get(deployments::rollback_candidates))
        .route("/deployments/:id", get(deployments::get_deployment))
        .route("/deployments/:id/logs", get(deployments::logs))
        .route("/deployments/:id/cancel", post(deployments::cancel))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
