//! Entity definitions for §3 of the spec. Each struct is the row shape
//! `platform-store` persists and the shape the HTTP API serializes,
//! mirroring the teacher's convention of keeping `common` models free of
//! any persistence-engine specifics beyond `sqlx::Type` derives for enums.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{Id, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Id,
    pub name: String,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Id,
    pub organization_id: Id,
    pub name: String,
    /// Identifier passed to the compute adapter so multi-tenancy is enforced
    /// at the runtime layer rather than in the core.
    pub tenant_id: String,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum ServiceType {
    App,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum ServiceSize {
    Small,
    Medium,
    Large,
    Xlarge,
}

impl ServiceSize {
    /// CPU millicores and memory MiB the size maps to, used when creating
    /// the workload spec (§4.5 step 6).
    pub fn resources(&self) -> (u32, u32) {
        match self {
            ServiceSize::Small => (250, 512),
            ServiceSize::Medium => (500, 1024),
            ServiceSize::Large => (1000, 2048),
            ServiceSize::Xlarge => (2000, 4096),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub success_threshold: u32,
    pub failure_threshold: u32,
    pub initial_delay_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval_secs: 10,
            timeout_secs: 5,
            success_threshold: 1,
            failure_threshold: 3,
            initial_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Id,
    pub project_id: Id,
    pub name: String,
    pub service_type: ServiceType,
    pub size: ServiceSize,
    pub listen_port: u16,
    pub health_check: HealthCheckConfig,
    pub current_image_tag: Option<String>,
    pub subdomain: Option<String>,
    pub current_runtime_handle: Option<String>,
    pub current_floating_ip_id: Option<String>,
    pub current_security_group_id: Option<String>,
    pub current_dns_record_id: Option<String>,
    pub pending_commits_count: u32,
    pub auto_deploy: bool,
    pub restart_count: u32,
    pub last_restart_at: Option<Instant>,
    /// Gate described in §4.5 "Concurrency per service": set atomically on
    /// entering `building`, cleared on terminal deployment states.
    pub deployment_in_progress: bool,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum GitProvider {
    Github,
    Gitlab,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSource {
    pub service_id: Id,
    pub provider: GitProvider,
    pub repo_owner: String,
    pub repo_name: String,
    pub branch: String,
    pub subdirectory: Option<String>,
    pub webhook_handle: Option<String>,
    /// Encrypted at rest; never serialized back out over the API.
    #[serde(skip_serializing)]
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum Trigger {
    Webhook,
    Manual,
    Rollback,
    Recovery,
}

/// Deployment states and transitions, per the state machine in §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type, Default)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum DeploymentState {
    #[default]
    Queued,
    Building,
    Publishing,
    Provisioning,
    Starting,
    Verifying,
    Success,
    Failed,
    Cancelled,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Success | DeploymentState::Failed | DeploymentState::Cancelled
        )
    }

    /// The states a deployment may transition into from `self`, used by the
    /// store to reject invalid conditional transitions before they hit SQL.
    pub fn allowed_next(&self) -> &'static [DeploymentState] {
        use DeploymentState::*;
        match self {
            Queued => &[Building, Cancelled, Failed],
            Building => &[Publishing, Cancelled, Failed],
            Publishing => &[Provisioning, Cancelled, Failed],
            Provisioning => &[Starting, Cancelled, Failed],
            Starting => &[Verifying, Cancelled, Failed],
            Verifying => &[Success, Cancelled, Failed],
            Success | Failed | Cancelled => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Id,
    pub service_id: Id,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub commit_author: Option<String>,
    pub trigger: Trigger,
    pub state: DeploymentState,
    pub image_tag: Option<String>,
    pub build_duration_ms: Option<u64>,
    pub deploy_duration_ms: Option<u64>,
    pub terminal_error: Option<String>,
    pub created_at: Instant,
    pub updated_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum LogPhase {
    Clone,
    Build,
    Publish,
    Provision,
    Start,
    Verify,
    Route,
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLog {
    pub id: Id,
    pub deployment_id: Id,
    pub timestamp: Instant,
    pub phase: LogPhase,
    pub level: LogLevel,
    pub message: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize, sqlx::Type)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum JobType {
    Build,
    DeployImage,
    ProvisionInfra,
    ProvisionDb,
    CreateVolume,
    AttachVolume,
    DetachVolume,
    DeleteVolume,
    CleanupService,
    CleanupProject,
    VerifyCustomDomain,
    Rollback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Id,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub lease_holder: Option<String>,
    pub lease_deadline: Option<Instant>,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum DbEngine {
    Postgres,
    Mysql,
    Redis,
    Mongo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub id: Id,
    pub project_id: Id,
    pub name: String,
    pub engine: DbEngine,
    pub size: ServiceSize,
    #[serde(skip_serializing)]
    pub encrypted_credentials: Vec<u8>,
    pub internal_hostname: Option<String>,
    pub current_runtime_handle: Option<String>,
    pub volume_id: Option<Id>,
    pub created_at: Instant,
}

/// A resolved database field, the output of a §3 `EnvVar` link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum DbField {
    ConnectionUrl,
    Host,
    Port,
    Username,
    Password,
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: Id,
    pub project_id: Id,
    pub size_gb: u32,
    pub mount_path: String,
    pub attached_service_id: Option<Id>,
    pub attached_database_id: Option<Id>,
    pub runtime_handle: Option<String>,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvVarValue {
    Literal { value: String, secret: bool },
    Link { database_id: Id, field: DbField },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    pub id: Id,
    pub service_id: Id,
    pub key: String,
    pub value: EnvVarValue,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type, Default)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum CustomDomainState {
    #[default]
    Pending,
    Verifying,
    Active,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomDomain {
    pub id: Id,
    pub service_id: Id,
    pub hostname: String,
    pub state: CustomDomainState,
    pub expected_cname_target: String,
    pub validation_token: String,
    pub ssl_issuance_metadata: Option<serde_json::Value>,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommit {
    pub id: Id,
    pub service_id: Id,
    pub commit_sha: String,
    pub commit_message: String,
    pub commit_author: String,
    pub acknowledged: bool,
    pub received_at: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: Id,
    pub user_id: Id,
    pub token_hash: Vec<u8>,
    pub expires_at: Instant,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpCode {
    pub id: Id,
    pub user_id: Id,
    pub code_hash: Vec<u8>,
    pub expires_at: Instant,
    pub consumed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, sqlx::Type)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[sqlx(rename_all = "snake_case")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMember {
    pub organization_id: Id,
    pub user_id: Id,
    pub role: OrgRole,
    pub joined_at: Instant,
}
