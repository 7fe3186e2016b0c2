use axum::{
    extract::{Path, Query, State},
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

/// `POST /services/{id}/deploy`: manual trigger, trigger=manual, no commit
/// metadata (the clone step resolves the current branch head itself).
pub async fn deploy<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(service_id): Path<Id>,
) -> Result<Json<Deployment>, Error> {
    require(&claim, Scope::DeploymentWrite)?;

    let _ = state.store.get_service(service_id).await?;
    let deployment = state
        .store
        .create_deployment(service_id, Trigger::Manual, None, None, None)
        .await?;

    state
        .queue
        .enqueue(JobType::Build, serde_json::json!({ "deployment_id": deployment.id }), 3)
        .await?;

    Ok(Json(deployment))
}

pub async fn get_deployment<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
) -> Result<Json<Deployment>, Error> {
    require(&claim, Scope::DeploymentRead)?;
    Ok(Json(state.store.get_deployment(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    since: Option<i64>,
}

pub async fn logs<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<DeploymentLog>>, Error> {
    require(&claim, Scope::DeploymentRead)?;
    Ok(Json(state.store.list_logs(id, query.since).await?))
}

/// `POST /deployments/{id}/cancel`: cancels the `build`/`rollback` job
/// backing this deployment, whether it's still queued or already being
/// worked by a worker. A running handler notices via its heartbeat failing
/// once the job's row leaves `processing` and transitions the deployment to
/// `cancelled` itself (§5).
pub async fn cancel<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(id): Path<Id>,
) -> Result<(), Error> {
    require(&claim, Scope::DeploymentWrite)?;

    let deployment = state.store.get_deployment(id).await?;
    if deployment.state.is_terminal() {
        return Err(Error::Conflict(format!("deployment {id} already terminal")));
    }

    for job_state in [JobState::Queued, JobState::Processing] {
        for job in state.store.list_jobs_by_state(job_state).await? {
            if job.payload.get("deployment_id").and_then(|v| v.as_str()) == Some(&id.to_string()) {
                let _ = state.store.cancel_job(job.id).await;
            }
        }
    }

    Ok(())
}

/// `POST /services/{id}/rollback/{deployment_id}`.
pub async fn rollback<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path((service_id, deployment_id)): Path<(Id, Id)>,
) -> Result<Json<Id>, Error> {
    require(&claim, Scope::DeploymentWrite)?;
    let new_deployment_id = state.pipeline.initiate_rollback(&state.queue, service_id, deployment_id).await?;
    Ok(Json(new_deployment_id))
}

#[derive(Debug, Deserialize)]
pub struct RollbackCandidatesQuery {
    #[serde(default = "default_candidate_count")]
    n: u32,
}

fn default_candidate_count() -> u32 {
    10
}

/// `GET rollback-candidates(service, n=10)`: the most recent successful
/// deployments minus whichever one is currently live.
pub async fn rollback_candidates<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    AuthenticatedClaim(claim): AuthenticatedClaim,
    Path(service_id): Path<Id>,
    Query(query): Query<RollbackCandidatesQuery>,
) -> Result<Json<Vec<Deployment>>, Error> {
    require(&claim, Scope::DeploymentRead)?;

    let service = state.store.get_service(service_id).await?;
    let candidates = state
        .store
        .list_successful_deployments(service_id, query.n)
        .await?
        .into_iter()
        .filter(|d| d.image_tag.as_deref() != service.current_image_tag.as_deref())
        .collect();

    Ok(Json(candidates))
}
