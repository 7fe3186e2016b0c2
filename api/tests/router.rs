//! HTTP-surface integration tests: auth gating, health/metrics, and
//! webhook signature verification, driven against the real router with
//! `tower::ServiceExt::oneshot` and an in-memory store + `MockAdapter`,
//! the way the teacher's `deployer/tests` drive the deploy layer against
//! a mock runtime without a socket.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use platform_adapters::MockAdapter;
use platform_api::{routes::build_router, state::AppState};
use platform_auth::{AuthArgs, TokenIssuer};
use platform_broadcaster::Broadcaster;
use platform_cleanup::CleanupOrchestrator;
use platform_common::{claims::Scope, rate_limit::RateLimiter};
use platform_pipeline::{DeploymentHandler, PipelineConfig};
use platform_queue::Queue;
use platform_store::Store;
use platform_webhook::WebhookIngestor;
use tower::ServiceExt;

const WEBHOOK_SECRET: &str = "test-webhook-secret";

async fn test_state() -> AppState<Arc<MockAdapter>> {
    let store = Store::in_memory().await;
    let adapter = Arc::new(MockAdapter::new());
    let queue = Queue::new(store.clone());
    let broadcaster = Broadcaster::new(store.clone());
    let auth = TokenIssuer::new(
        AuthArgs {
            jwt_secret: "test-secret".to_string(),
            jwt_access_expiry_secs: 900,
            jwt_refresh_expiry_secs: 2_592_000,
        },
        store.clone(),
    );

    AppState {
        pipeline: Arc::new(DeploymentHandler::new(
            store.clone(),
            broadcaster.clone(),
            adapter.clone(),
            PipelineConfig {
                build_dir: "/tmp/platform-test-builds".into(),
                registry_url: "registry.test".to_string(),
                base_domain: "apps.test".to_string(),
                dns_zone: "zone-test".to_string(),
            },
        )),
        cleanup: Arc::new(CleanupOrchestrator::new(store.clone(), adapter.clone())),
        webhook: Arc::new(WebhookIngestor::new(store.clone(), queue.clone())),
        rate_limiter: Arc::new(RateLimiter::new(120, Duration::from_secs(60))),
        metrics: Arc::new(platform_api::metrics::Metrics::default()),
        webhook_secret: Arc::from(WEBHOOK_SECRET),
        gitlab_webhook_secret: Arc::from("unused"),
        store,
        queue,
        broadcaster,
        auth,
    }
}

#[tokio::test]
async fn health_reports_ok_once_migrations_have_applied() {
    let router = build_router(test_state().await);
    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_exposition() {
    let router = build_router(test_state().await);
    let response = router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("http_requests_total"));
}

#[tokio::test]
async fn deploy_without_a_bearer_token_is_rejected() {
    let state = test_state().await;
    let project = state.store.create_project(platform_common::Id::new(), "demo", "tenant-a").await.unwrap();
    let service = state
        .store
        .create_service(
            project.id,
            "web",
            platform_common::models::ServiceSize::Small,
            8080,
            Default::default(),
            true,
        )
        .await
        .unwrap();

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/services/{}/deploy", service.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn deploy_with_a_valid_token_enqueues_a_build_job() {
    let state = test_state().await;
    let org_id = platform_common::Id::new();
    let project = state.store.create_project(org_id, "demo", "tenant-a").await.unwrap();
    let service = state
        .store
        .create_service(
            project.id,
            "web",
            platform_common::models::ServiceSize::Small,
            8080,
            Default::default(),
            true,
        )
        .await
        .unwrap();

    let tokens = state
        .auth
        .issue(platform_common::Id::new(), org_id, &[Scope::DeploymentWrite.to_string()])
        .await
        .unwrap();

    let router = build_router(state.clone());
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/services/{}/deploy", service.id))
                .header("authorization", format!("Bearer {}", tokens.access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let jobs = state
        .store
        .list_jobs_by_state(platform_common::models::JobState::Queued)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, platform_common::models::JobType::Build);
}

#[tokio::test]
async fn webhook_with_a_bad_signature_is_rejected() {
    let router = build_router(test_state().await);
    let body = br#"{"owner":"acme","repo":"web","branch":"main","commit_sha":"deadbeef","commit_message":"m","commit_author":"a"}"#;
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/github")
                .header("x-hub-signature-256", "sha256=0000000000000000000000000000000000000000000000000000000000000000")
                .body(Body::from(body.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_with_a_valid_signature_is_ingested() {
    use ring::hmac;

    let state = test_state().await;
    let body = br#"{"owner":"acme","repo":"web","branch":"main","commit_sha":"deadbeef","commit_message":"m","commit_author":"a"}"#;

    let key = hmac::Key::new(hmac::HMAC_SHA256, WEBHOOK_SECRET.as_bytes());
    let tag = hmac::sign(&key, body);
    let signature = format!("sha256={}", hex_encode(tag.as_ref()));

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/github")
                .header("x-hub-signature-256", signature)
                .body(Body::from(body.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
