//! Environment-driven configuration for the control-plane binary. One
//! `clap::Args` struct per concern, matching `platform-store`'s
//! `StoreArgs`/`platform-pipeline`'s `PipelineArgs`/`platform-auth`'s
//! `AuthArgs` rather than one flat bag of fields.

use std::net::SocketAddr;

use clap::Parser;
use platform_auth::AuthArgs;
use platform_pipeline::PipelineArgs;
use platform_store::StoreArgs;

#[derive(Debug, Clone, Parser)]
pub struct Config {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[command(flatten)]
    pub auth: AuthArgs,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    #[arg(long, env = "WORKER_COUNT", default_value = "4")]
    pub worker_count: usize,

    #[arg(long, env = "WEBHOOK_SECRET")]
    pub webhook_secret: String,

    #[arg(long, env = "GITLAB_WEBHOOK_SECRET")]
    pub gitlab_webhook_secret: Option<String>,

    #[arg(long, env = "RATE_LIMIT_REQUESTS", default_value = "120")]
    pub rate_limit_requests: u32,

    #[arg(long, env = "RATE_LIMIT_WINDOW", default_value = "60")]
    pub rate_limit_window_secs: u64,

    #[arg(long, env = "USE_MOCK_INFRA", default_value = "false")]
    pub use_mock_infra: bool,

    #[arg(long, env = "COMPUTE_URL", default_value = "")]
    pub compute_url: String,

    #[arg(long, env = "DNS_URL", default_value = "")]
    pub dns_url: String,

    #[arg(long, env = "CADDY_ADMIN_URL", default_value = "")]
    pub router_url: String,
}
