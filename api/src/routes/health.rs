use axum::{extract::State, http::StatusCode};
use platform_adapters::RuntimeAdapter;

use crate::state::AppState;

pub async fn health<A: RuntimeAdapter + 'static>(State(state): State<AppState<A>>) -> (StatusCode, &'static str) {
    if state.store.is_healthy().await {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    }
}

pub async fn metrics<A: RuntimeAdapter + 'static>(State(state): State<AppState<A>>) -> String {
    state.metrics.render()
}
