//! The deployment state machine (C5) and rollback engine (C8): the `build`
//! and `rollback` job handlers that drive a service from a queued
//! deployment to a published, health-checked workload. Grounded on the
//! teacher's `deployer::deployment::run` task shape — one phase per
//! function, each persisted before the next begins — generalized away from
//! a gRPC runtime client onto the five-trait `RuntimeAdapter` facade.

mod env;
mod recipe;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use clap::Args;
use platform_adapters::{
    AddrHandle, BuildArgs, CloneAdapter, ImageAdapter, NetworkAdapter, RouterAdapter, WorkloadAdapter,
    WorkloadHandle, WorkloadSpec, WorkloadStatus,
};
use platform_broadcaster::Broadcaster;
use platform_common::{models::*, now, Error, Id};
use platform_queue::Queue;
use platform_store::Store;
use platform_worker::{CancellationToken, JobHandler};
use serde::Deserialize;
use tracing::{instrument, warn};

/// Exponential backoff schedule for retrying a `Transient` adapter failure
/// in place, per §5: 1s, 2s, 4s, 8s, 16s, then bubble up.
const RETRY_BACKOFF: &[Duration] = &[
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
];

#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    #[arg(long, env = "BUILD_DIR", default_value = "/var/lib/platform/builds")]
    pub build_dir: PathBuf,

    #[arg(long, env = "REGISTRY_URL")]
    pub registry_url: String,

    #[arg(long, env = "BASE_URL")]
    pub base_domain: String,

    #[arg(long, env = "DNS_ZONE_ID")]
    pub dns_zone: String,
}

pub struct PipelineConfig {
    pub build_dir: PathBuf,
    pub registry_url: String,
    pub base_domain: String,
    pub dns_zone: String,
}

impl From<PipelineArgs> for PipelineConfig {
    fn from(args: PipelineArgs) -> Self {
        Self {
            build_dir: args.build_dir,
            registry_url: args.registry_url,
            base_domain: args.base_domain,
            dns_zone: args.dns_zone,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BuildPayload {
    deployment_id: Id,
    #[serde(default)]
    clone_token: String,
}

#[derive(Debug, Deserialize)]
struct RollbackPayload {
    deployment_id: Id,
}

pub struct DeploymentHandler<A> {
    store: Store,
    broadcaster: Broadcaster,
    adapter: A,
    config: PipelineConfig,
}

impl<A> DeploymentHandler<A>
where
    A: ImageAdapter + CloneAdapter + WorkloadAdapter + NetworkAdapter + RouterAdapter,
{
    pub fn new(store: Store, broadcaster: Broadcaster, adapter: A, config: PipelineConfig) -> Self {
        Self { store, broadcaster, adapter, config }
    }

    /// §4.8: verifies the target deployment, creates a new `rollback`
    /// deployment row carrying the target's image, and enqueues the job
    /// that re-runs phases 4-9 against it. The existing workload is left
    /// running until the rollback reaches `success`.
    pub async fn initiate_rollback(&self, queue: &Queue, service_id: Id, target_deployment_id: Id) -> Result<Id, Error> {
        let target = self.store.get_deployment(target_deployment_id).await?;
        if target.service_id != service_id {
            return Err(Error::Invalid("rollback target does not belong to this service".into()));
        }
        if target.state != DeploymentState::Success || target.image_tag.is_none() {
            return Err(Error::Invalid("rollback target is not a successful deployment with an image".into()));
        }

        let deployment = self
            .store
            .create_deployment(service_id, Trigger::Rollback, target.commit_sha.as_deref(), target.commit_message.as_deref(), target.commit_author.as_deref())
            .await?;
        self.store.set_deployment_image(deployment.id, target.image_tag.as_deref().unwrap()).await?;

        let job_id = queue
            .enqueue(JobType::Rollback, serde_json::json!({ "deployment_id": deployment.id }), 3)
            .await?;
        Ok(job_id)
    }

    async fn log(&self, deployment_id: Id, phase: LogPhase, level: LogLevel, message: &str) {
        if let Err(err) = self.broadcaster.log(deployment_id, phase, level, message, serde_json::json!({})).await {
            warn!(%deployment_id, error = %err, "failed to record deployment log");
        }
    }

    #[instrument(skip(self, cancel, clone_token), fields(deployment_id = %deployment_id))]
    async fn run(&self, deployment_id: Id, skip_build: bool, clone_token: &str, cancel: CancellationToken) -> Result<(), Error> {
        let deployment = self.store.get_deployment(deployment_id).await?;
        let service = self.store.get_service(deployment.service_id).await?;

        if !self.store.try_begin_deployment(service.id).await? {
            // Another deployment for this service is in flight; the job
            // machinery will re-lease and retry this one later.
            return Err(Error::Transient("a deployment for this service is already in progress".into()));
        }

        let outcome = self.run_phases(&deployment, &service, skip_build, clone_token, &cancel).await;
        self.store.end_deployment(service.id).await?;

        match outcome {
            Ok(()) => Ok(()),
            Err(PhaseError::Cancelled) => {
                let current = self.store.get_deployment(deployment.id).await?.state;
                let _ = self.store.transition_deployment(deployment.id, current, DeploymentState::Cancelled).await;
                self.log(deployment.id, LogPhase::Cleanup, LogLevel::Warn, "deployment cancelled").await;
                self.broadcaster.retire(deployment.id);
                Ok(())
            }
            Err(PhaseError::Fatal(err)) => {
                self.store.fail_deployment(deployment.id, &err.to_string()).await?;
                self.log(deployment.id, LogPhase::Cleanup, LogLevel::Error, &err.to_string()).await;
                self.broadcaster.retire(deployment.id);
                Err(err)
            }
        }
    }

    async fn run_phases(&self, deployment: &Deployment, service: &Service, skip_build: bool, clone_token: &str, cancel: &CancellationToken) -> Result<(), PhaseError> {
        if cancel.is_cancelled() {
            return Err(PhaseError::Cancelled);
        }

        self.transition(deployment.id, DeploymentState::Queued, DeploymentState::Building).await?;

        let mut image_tag = deployment.image_tag.clone();
        if skip_build {
            self.log(deployment.id, LogPhase::Build, LogLevel::Info, "rollback: reusing target image, skipping build").await;
        } else {
            image_tag = Some(self.phase_clone_build_push(deployment, service, clone_token).await?);
        }
        let image_tag = image_tag.ok_or_else(|| PhaseError::Fatal(Error::Internal("no image resolved for deployment".into())))?;

        self.transition(deployment.id, DeploymentState::Building, DeploymentState::Publishing).await?;
        self.transition(deployment.id, DeploymentState::Publishing, DeploymentState::Provisioning).await?;

        if cancel.is_cancelled() {
            return Err(PhaseError::Cancelled);
        }

        let env_vars = env::resolve_env(&self.store, service).await.map_err(PhaseError::Fatal)?;
        let (addr, security_group_id, created_addr) = self.phase_network_prereqs(service).await?;
        let hostname = self.phase_subdomain(service).await?;

        self.transition(deployment.id, DeploymentState::Provisioning, DeploymentState::Starting).await?;

        let (cpu_millicores, mem_mib) = service.size.resources();
        let spec = WorkloadSpec {
            image_ref: image_tag.clone(),
            env: env_vars,
            cpu_millicores,
            mem_mib,
            restart_policy: "always".to_string(),
        };

        let handle = self.phase_create_workload(deployment, &spec, &addr, created_addr).await?;

        if cancel.is_cancelled() {
            self.rollback_start_resources(&handle, &addr, created_addr).await;
            return Err(PhaseError::Cancelled);
        }

        self.transition(deployment.id, DeploymentState::Starting, DeploymentState::Verifying).await?;
        self.phase_verify(deployment, &handle, &addr, created_addr, &service.health_check).await?;

        self.phase_publish(deployment, service, &hostname, &handle, &addr, security_group_id.as_deref(), &image_tag).await?;
        Ok(())
    }

    async fn transition(&self, deployment_id: Id, from: DeploymentState, to: DeploymentState) -> Result<(), PhaseError> {
        self.store.transition_deployment(deployment_id, from, to).await.map_err(PhaseError::Fatal)?;
        self.log(deployment_id, phase_for_state(to), LogLevel::Info, &format!("{from} -> {to}")).await;
        Ok(())
    }

    /// Phases 1-3: clone, detect recipe, build, push, tag `latest`.
    async fn phase_clone_build_push(&self, deployment: &Deployment, service: &Service, clone_token: &str) -> Result<String, PhaseError> {
        let git_source = self.store.get_git_source(service.id).await.map_err(PhaseError::Fatal)?;
        let dst_dir = self.config.build_dir.join(deployment.id.to_string());
        let dst_dir_str = dst_dir.to_string_lossy().to_string();

        let provider_str = git_source.provider.to_string();
        let commit_sha = retry_transient(|| {
            self.adapter.clone_repo(
                &provider_str,
                &git_source.repo_owner,
                &git_source.repo_name,
                &git_source.branch,
                clone_token,
                &dst_dir_str,
            )
        })
        .await
        .map_err(PhaseError::Fatal)?;
        self.store.set_commit_sha(deployment.id, &commit_sha).await.map_err(PhaseError::Fatal)?;
        self.log(deployment.id, LogPhase::Clone, LogLevel::Info, &format!("cloned {commit_sha}")).await;

        let chosen = recipe::detect_recipe(&dst_dir);
        self.log(deployment.id, LogPhase::Build, LogLevel::Info, &format!("recipe: {chosen:?}")).await;

        let destination_ref = format!(
            "{}/{}:{}-{}",
            self.config.registry_url,
            service.name,
            &deployment.id.to_string()[..8],
            &commit_sha[..commit_sha.len().min(7)],
        );
        let latest_ref = format!("{}/{}:latest", self.config.registry_url, service.name);

        let build_args = BuildArgs(serde_json::json!({ "dockerfile": chosen.synthesize_dockerfile() }));
        let outcome = retry_transient(|| self.adapter.build(&dst_dir_str, &build_args, &destination_ref))
            .await
            .map_err(PhaseError::Fatal)?;
        self.log(deployment.id, LogPhase::Build, LogLevel::Info, &format!("built {}", outcome.digest.0)).await;

        retry_transient(|| self.adapter.push(&destination_ref)).await.map_err(PhaseError::Fatal)?;
        retry_transient(|| self.adapter.tag(&destination_ref, &latest_ref)).await.map_err(PhaseError::Fatal)?;
        self.store.set_deployment_image(deployment.id, &destination_ref).await.map_err(PhaseError::Fatal)?;
        self.log(deployment.id, LogPhase::Publish, LogLevel::Info, &format!("pushed {destination_ref}")).await;

        Ok(destination_ref)
    }

    /// Phase 5a: ensures a floating address and security group exist.
    /// Returns `(addr, security_group_id, did_allocate_addr)`.
    async fn phase_network_prereqs(&self, service: &Service) -> Result<(AddrHandle, Option<String>, bool), PhaseError> {
        if let Some(existing) = &service.current_floating_ip_id {
            return Ok((AddrHandle(existing.clone()), service.current_security_group_id.clone(), false));
        }

        let tenant = self.store.get_project(service.project_id).await.map_err(PhaseError::Fatal)?.tenant_id;
        let addr = retry_transient(|| self.adapter.allocate_public_addr(&tenant)).await.map_err(PhaseError::Fatal)?;

        let security_group_id = match &service.current_security_group_id {
            Some(id) => Some(id.clone()),
            None => Some({
                let allowed = serde_json::json!({ "allow": ["http", "https"] });
                retry_transient(|| self.adapter.create_security_group(&allowed))
                    .await
                    .map_err(PhaseError::Fatal)?
            }),
        };

        Ok((addr, security_group_id, true))
    }

    /// Phase 5b: assigns a subdomain (generating one on first deploy) and
    /// ensures its DNS record exists.
    async fn phase_subdomain(&self, service: &Service) -> Result<String, PhaseError> {
        let hostname = match &service.subdomain {
            Some(existing) => existing.clone(),
            None => {
                let slug = format!("{}-{}", slugify(&service.name), short_suffix(service.id));
                let hostname = format!("{slug}.{}", self.config.base_domain);
                self.store.assign_subdomain(service.id, &hostname).await.map_err(PhaseError::Fatal)?;
                hostname
            }
        };

        if service.current_dns_record_id.is_none() {
            let record = retry_transient(|| {
                self.adapter.create_dns_record(&self.config.dns_zone, &hostname, "CNAME", &self.config.base_domain)
            })
            .await
            .map_err(PhaseError::Fatal)?;
            self.store.set_dns_record(service.id, &record.0).await.map_err(PhaseError::Fatal)?;
        }

        Ok(hostname)
    }

    async fn phase_create_workload(&self, deployment: &Deployment, spec: &WorkloadSpec, addr: &AddrHandle, created_addr: bool) -> Result<WorkloadHandle, PhaseError> {
        let handle = match retry_transient(|| self.adapter.create(spec)).await {
            Ok(handle) => handle,
            Err(err) => {
                if created_addr {
                    let _ = self.adapter.release_addr(addr).await;
                }
                return Err(PhaseError::Fatal(err));
            }
        };

        if let Err(err) = self.adapter.wait_for(&handle, WorkloadStatus::Running, Duration::from_secs(120)).await {
            let _ = WorkloadAdapter::delete(&self.adapter, &handle).await;
            if created_addr {
                let _ = self.adapter.release_addr(addr).await;
            }
            return Err(PhaseError::Fatal(err));
        }

        if let Err(err) = self.adapter.attach(addr, &handle).await {
            let _ = WorkloadAdapter::delete(&self.adapter, &handle).await;
            if created_addr {
                let _ = self.adapter.release_addr(addr).await;
            }
            return Err(PhaseError::Fatal(err));
        }

        self.log(deployment.id, LogPhase::Start, LogLevel::Info, &format!("workload {} running", handle.0)).await;
        Ok(handle)
    }

    async fn rollback_start_resources(&self, handle: &WorkloadHandle, addr: &AddrHandle, created_addr: bool) {
        let _ = WorkloadAdapter::delete(&self.adapter, handle).await;
        if created_addr {
            let _ = self.adapter.release_addr(addr).await;
        }
    }

    /// Phase 8: polls workload status as a stand-in for the HTTP health
    /// probe (the facade's `Workload::Get` is the only externally-visible
    /// signal of the running process's readiness available through the
    /// five-trait adapter union).
    async fn phase_verify(&self, deployment: &Deployment, handle: &WorkloadHandle, addr: &AddrHandle, created_addr: bool, health_check: &HealthCheckConfig) -> Result<(), PhaseError> {
        tokio::time::sleep(Duration::from_secs(health_check.initial_delay_secs)).await;

        let mut consecutive_successes = 0u32;
        let max_attempts = health_check.failure_threshold.max(health_check.success_threshold);

        for attempt in 0..max_attempts {
            match self.adapter.get(handle).await {
                Ok(WorkloadStatus::Running) => {
                    consecutive_successes += 1;
                    if consecutive_successes >= health_check.success_threshold {
                        self.log(deployment.id, LogPhase::Verify, LogLevel::Info, "health check passed").await;
                        return Ok(());
                    }
                }
                Ok(_) | Err(_) => consecutive_successes = 0,
            }

            if attempt + 1 < max_attempts {
                tokio::time::sleep(Duration::from_secs(health_check.interval_secs)).await;
            }
        }

        self.log(deployment.id, LogPhase::Verify, LogLevel::Error, "health check failed, tearing down new workload").await;
        let _ = self.adapter.stop(handle, 5).await;
        let _ = WorkloadAdapter::delete(&self.adapter, handle).await;
        if created_addr {
            let _ = self.adapter.release_addr(addr).await;
        }
        Err(PhaseError::Fatal(Error::Permanent("workload failed health checks".into())))
    }

    /// Phase 9: publishes the hostname to the new workload, tears down the
    /// old one, and records success.
    async fn phase_publish(&self, deployment: &Deployment, service: &Service, hostname: &str, handle: &WorkloadHandle, addr: &AddrHandle, security_group_id: Option<&str>, image_tag: &str) -> Result<(), PhaseError> {
        if let Err(err) = retry_transient(|| self.adapter.publish(hostname, &handle.0)).await {
            let _ = self.adapter.stop(handle, 5).await;
            let _ = WorkloadAdapter::delete(&self.adapter, handle).await;
            return Err(PhaseError::Fatal(err));
        }

        if let Some(old_handle) = &service.current_runtime_handle {
            if old_handle != &handle.0 {
                let _ = WorkloadAdapter::delete(&self.adapter, &WorkloadHandle(old_handle.clone())).await;
            }
        }

        self.store
            .set_live_image(service.id, image_tag, &handle.0, Some(&addr.0), security_group_id)
            .await
            .map_err(PhaseError::Fatal)?;

        self.transition(deployment.id, DeploymentState::Verifying, DeploymentState::Success).await?;
        self.store.record_durations(deployment.id, None, None).await.map_err(PhaseError::Fatal)?;
        self.log(deployment.id, LogPhase::Route, LogLevel::Info, &format!("published {hostname}")).await;
        self.broadcaster.retire(deployment.id);
        Ok(())
    }
}

enum PhaseError {
    Cancelled,
    Fatal(Error),
}

fn phase_for_state(state: DeploymentState) -> LogPhase {
    match state {
        DeploymentState::Building => LogPhase::Build,
        DeploymentState::Publishing => LogPhase::Publish,
        DeploymentState::Provisioning => LogPhase::Provision,
        DeploymentState::Starting => LogPhase::Start,
        DeploymentState::Verifying => LogPhase::Verify,
        _ => LogPhase::Route,
    }
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

fn short_suffix(id: Id) -> String {
    id.to_string().to_lowercase().chars().rev().take(6).collect()
}

/// Retries a `Transient` adapter failure with the fixed backoff schedule
/// in §5; any other error (including `Permanent`) bubbles up immediately.
async fn retry_transient<F, Fut, T>(mut call: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut last_err = None;
    for delay in std::iter::once(Duration::ZERO).chain(RETRY_BACKOFF.iter().copied()) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match call().await {
            Ok(value) => return Ok(value),
            Err(err @ Error::Transient(_)) => last_err = Some(err),
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Internal("retry loop exited without a result".into())))
}

#[async_trait]
impl<A> JobHandler for DeploymentHandler<A>
where
    A: ImageAdapter + CloneAdapter + WorkloadAdapter + NetworkAdapter + RouterAdapter + 'static,
{
    async fn handle(&self, job: &Job, cancel: CancellationToken) -> Result<(), Error> {
        match job.job_type {
            JobType::Build => {
                let payload: BuildPayload = serde_json::from_value(job.payload.clone())
                    .map_err(|err| Error::Invalid(format!("malformed build payload: {err}")))?;
                self.run(payload.deployment_id, false, &payload.clone_token, cancel).await
            }
            JobType::Rollback => {
                let payload: RollbackPayload = serde_json::from_value(job.payload.clone())
                    .map_err(|err| Error::Invalid(format!("malformed rollback payload: {err}")))?;
                self.run(payload.deployment_id, true, "", cancel).await
            }
            other => Err(Error::Invalid(format!("deployment handler cannot process job type {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_adapters::MockAdapter;

    async fn seeded(store: &Store) -> (Service, GitSource) {
        let org = store.create_organization("acme").await.unwrap();
        let project = store.create_project(org.id, "proj", "tenant-1").await.unwrap();
        let service = store
            .create_service(project.id, "web", ServiceSize::Small, 8080, HealthCheckConfig::default(), true)
            .await
            .unwrap();
        let source = GitSource {
            service_id: service.id,
            provider: GitProvider::Github,
            repo_owner: "acme".to_string(),
            repo_name: "web".to_string(),
            branch: "main".to_string(),
            subdirectory: None,
            webhook_handle: None,
            webhook_secret: "shh".to_string(),
        };
        store.upsert_git_source(&source).await.unwrap();
        (service, source)
    }

    fn no_cancel() -> CancellationToken {
        CancellationToken::stub(false)
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            build_dir: std::env::temp_dir(),
            registry_url: "registry.example.com/acme".to_string(),
            base_domain: "apps.example.com".to_string(),
            dns_zone: "zone-1".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_deploy_reaches_success() {
        let store = Store::in_memory().await;
        let (service, _source) = seeded(&store).await;
        let deployment = store
            .create_deployment(service.id, Trigger::Manual, Some("deadbeef"), None, None)
            .await
            .unwrap();

        let handler = DeploymentHandler::new(
            store.clone(),
            Broadcaster::new(store.clone()),
            MockAdapter::new(),
            config(),
        );

        let job = Job {
            id: Id::new(),
            job_type: JobType::Build,
            payload: serde_json::json!({ "deployment_id": deployment.id }),
            state: JobState::Processing,
            attempts: 1,
            max_attempts: 3,
            lease_holder: None,
            lease_deadline: None,
            created_at: now(),
            started_at: None,
            finished_at: None,
            last_error: None,
        };

        handler.handle(&job, no_cancel()).await.unwrap();

        let deployment = store.get_deployment(deployment.id).await.unwrap();
        assert_eq!(deployment.state, DeploymentState::Success);
        let service = store.get_service(service.id).await.unwrap();
        assert!(service.current_image_tag.is_some());
        assert!(service.subdomain.is_some());
    }

    #[tokio::test]
    async fn a_second_concurrent_deploy_for_the_same_service_bounces() {
        let store = Store::in_memory().await;
        let (service, _source) = seeded(&store).await;
        store.try_begin_deployment(service.id).await.unwrap();

        let deployment = store
            .create_deployment(service.id, Trigger::Manual, Some("deadbeef"), None, None)
            .await
            .unwrap();

        let handler = DeploymentHandler::new(
            store.clone(),
            Broadcaster::new(store.clone()),
            MockAdapter::new(),
            config(),
        );

        let err = handler.run(deployment.id, false, "", no_cancel()).await.unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_reuses_the_target_image_without_rebuilding() {
        let store = Store::in_memory().await;
        let (service, _source) = seeded(&store).await;
        let queue = Queue::new(store.clone());
        let adapter = MockAdapter::new();
        let handler = DeploymentHandler::new(store.clone(), Broadcaster::new(store.clone()), adapter, config());

        let original = store
            .create_deployment(service.id, Trigger::Manual, Some("deadbeef"), None, None)
            .await
            .unwrap();
        let build_job = Job {
            id: Id::new(),
            job_type: JobType::Build,
            payload: serde_json::json!({ "deployment_id": original.id }),
            state: JobState::Processing,
            attempts: 1,
            max_attempts: 3,
            lease_holder: None,
            lease_deadline: None,
            created_at: now(),
            started_at: None,
            finished_at: None,
            last_error: None,
        };
        handler.handle(&build_job, no_cancel()).await.unwrap();
        let original = store.get_deployment(original.id).await.unwrap();
        assert_eq!(original.state, DeploymentState::Success);

        let rollback_job_id = handler.initiate_rollback(&queue, service.id, original.id).await.unwrap();
        let rollback_job = queue.get(rollback_job_id).await.unwrap();
        assert_eq!(rollback_job.job_type, JobType::Rollback);

        handler.handle(&rollback_job, no_cancel()).await.unwrap();

        let deployments = store.list_deployments_by_service(service.id).await.unwrap();
        let rollback_deployment = deployments.iter().find(|d| d.trigger == Trigger::Rollback).unwrap();
        assert_eq!(rollback_deployment.state, DeploymentState::Success);
        assert_eq!(rollback_deployment.image_tag, original.image_tag);
    }
}
