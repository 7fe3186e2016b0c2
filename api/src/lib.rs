//! HTTP control-plane surface: router, shared state, and the handlers
//! `src/main.rs` binds to a listener. Split out as a library so the
//! integration tests can drive the router directly with `tower::ServiceExt`
//! instead of going over a real socket, the way the teacher's `gateway`
//! crate separates `api::make_api` from its `main.rs` binding step.

pub mod config;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::Config;
pub use state::AppState;
