//! Walks a service's (or project's) resource graph in reverse-creation
//! order, tearing down whatever the pipeline created. Each step is
//! independently attempted and logged; a step's failure is counted but
//! never stops the walk, so tenants aren't stuck behind one stubborn
//! external system (§4.6). Grounded on resource-recorder's flat `Dal`
//! trait, generalized here to an ordered list of named steps.

use std::future::Future;

use async_trait::async_trait;
use platform_adapters::{
    AddrHandle, CloneAdapter, NetworkAdapter, RecordHandle, RouterAdapter, WorkloadAdapter, WorkloadHandle,
};
use platform_common::{models::*, Error, Id};
use platform_store::Store;
use platform_worker::{CancellationToken, JobHandler};
use serde::Deserialize;
use tracing::{info, instrument, warn};

/// Reverse-creation order, per §3's resource graph invariant: route
/// publication, published hostname, runtime handle, floating IP, security
/// group, DNS records, registered webhook, then any jobs still pending for
/// the service.
const STEP_ORDER: &[&str] = &[
    "unpublish_route",
    "delete_workload",
    "release_floating_ip",
    "release_security_group",
    "delete_dns_record",
    "unregister_webhook",
    "cancel_pending_jobs",
];

pub struct CleanupOrchestrator<A> {
    store: Store,
    adapter: A,
}

impl<A> CleanupOrchestrator<A>
where
    A: NetworkAdapter + RouterAdapter + WorkloadAdapter + CloneAdapter,
{
    pub fn new(store: Store, adapter: A) -> Self {
        Self { store, adapter }
    }

    /// Tears down every external resource a service owns, then deletes the
    /// service row. The row is deleted even if some steps were abandoned —
    /// debris remains queryable via `platform_store::cleanup::list_debris`
    /// for an operator to reconcile later.
    #[instrument(skip(self))]
    pub async fn cleanup_service(&self, service_id: Id) -> Result<(), Error> {
        let service = self.store.get_service(service_id).await?;

        self.attempt("unpublish_route", service_id, service.subdomain.clone(), |hostname| async move {
            self.adapter.unpublish(&hostname).await
        })
        .await;

        self.attempt(
            "delete_workload",
            service_id,
            service.current_runtime_handle.clone(),
            |handle| async move { self.adapter.delete(&WorkloadHandle(handle)).await },
        )
        .await;

        self.attempt(
            "release_floating_ip",
            service_id,
            service.current_floating_ip_id.clone(),
            |id| async move { self.adapter.release_addr(&AddrHandle(id)).await },
        )
        .await;

        self.attempt(
            "release_security_group",
            service_id,
            service.current_security_group_id.clone(),
            |id| async move { self.adapter.delete_security_group(&id).await },
        )
        .await;

        self.attempt(
            "delete_dns_record",
            service_id,
            service.current_dns_record_id.clone(),
            |id| async move { self.adapter.delete_dns_record(&RecordHandle(id)).await },
        )
        .await;

        let webhook_handle = match self.store.get_git_source(service_id).await {
            Ok(source) => source.webhook_handle.clone(),
            Err(Error::NotFound(_)) => None,
            Err(err) => return Err(err),
        };
        self.attempt("unregister_webhook", service_id, webhook_handle, |handle| async move {
            self.adapter.unregister_webhook(&handle).await
        })
        .await;
        let _ = self.store.delete_git_source(service_id).await;

        for domain in self.store.list_custom_domains_by_service(service_id).await? {
            self.attempt("unpublish_route", service_id, Some(domain.hostname.clone()), |hostname| async move {
                self.adapter.unpublish(&hostname).await
            })
            .await;
            let _ = self.store.delete_custom_domain(domain.id).await;
        }

        for job in self.store.list_jobs_by_state(JobState::Queued).await? {
            if job.payload.get("service_id").and_then(|v| v.as_str()) == Some(&service_id.to_string()) {
                let _ = self.store.cancel_job(job.id).await;
            }
        }

        self.store.delete_service(service_id).await?;
        info!(%service_id, "cleanup complete");
        Ok(())
    }

    /// A project's services have already been individually cleaned up
    /// before this is called; this only releases project-scoped resources
    /// (volumes, databases) not owned by any one service.
    #[instrument(skip(self))]
    pub async fn cleanup_project(&self, project_id: Id) -> Result<(), Error> {
        for database in self.store.list_databases_by_project(project_id).await? {
            if let Some(handle) = database.current_runtime_handle.clone() {
                self.attempt("delete_workload", project_id, Some(handle), |h| async move {
                    self.adapter.delete(&WorkloadHandle(h)).await
                })
                .await;
            }
            let _ = self.store.delete_database(database.id).await;
        }

        self.store.delete_project(project_id).await?;
        info!(%project_id, "project cleanup complete");
        Ok(())
    }

    /// Runs one step against an optional resource identifier (steps with no
    /// identifier recorded — nothing was ever created — are skipped
    /// without being marked as a failure). Records the outcome via
    /// `platform_store::cleanup` so the walk can be resumed/reported on.
    async fn attempt<F, Fut>(&self, step_name: &'static str, service_id: Id, identifier: Option<String>, call: F)
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        let Some(identifier) = identifier else {
            return;
        };

        debug_assert!(STEP_ORDER.contains(&step_name));

        match call(identifier.clone()).await {
            Ok(()) => {
                let _ = self
                    .store
                    .record_cleanup_attempt(service_id, step_name, &identifier, None)
                    .await;
            }
            Err(err) => {
                warn!(%service_id, step = step_name, error = %err, "cleanup step failed, will retry or abandon");
                let _ = self
                    .store
                    .record_cleanup_attempt(service_id, step_name, &identifier, Some(&err.to_string()))
                    .await;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceJobPayload {
    service_id: Id,
}

#[derive(Debug, Deserialize)]
struct ProjectJobPayload {
    project_id: Id,
}

#[async_trait]
impl<A> JobHandler for CleanupOrchestrator<A>
where
    A: NetworkAdapter + RouterAdapter + WorkloadAdapter + CloneAdapter + Send + Sync + 'static,
{
    async fn handle(&self, job: &Job, _cancel: CancellationToken) -> Result<(), Error> {
        match job.job_type {
            JobType::CleanupService => {
                let payload: ServiceJobPayload = serde_json::from_value(job.payload.clone())
                    .map_err(|err| Error::Invalid(format!("malformed cleanup_service payload: {err}")))?;
                self.cleanup_service(payload.service_id).await
            }
            JobType::CleanupProject => {
                let payload: ProjectJobPayload = serde_json::from_value(job.payload.clone())
                    .map_err(|err| Error::Invalid(format!("malformed cleanup_project payload: {err}")))?;
                self.cleanup_project(payload.project_id).await
            }
            other => Err(Error::Invalid(format!("cleanup handler cannot process job type {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_adapters::MockAdapter;

    async fn service_with_resources(store: &Store) -> Id {
        let org = store.create_organization("acme").await.unwrap();
        let project = store.create_project(org.id, "proj", "tenant-1").await.unwrap();
        let service = store
            .create_service(project.id, "web", ServiceSize::Small, 8080, HealthCheckConfig::default(), true)
            .await
            .unwrap();
        store
            .set_live_image(service.id, "img:1", "workload-1", Some("addr-1"), Some("sg-1"))
            .await
            .unwrap();
        store.set_dns_record(service.id, "dns-1").await.unwrap();
        store
            .upsert_git_source(&GitSource {
                service_id: service.id,
                provider: GitProvider::Github,
                repo_owner: "acme".to_string(),
                repo_name: "web".to_string(),
                branch: "main".to_string(),
                subdirectory: None,
                webhook_handle: Some("hook-1".to_string()),
                webhook_secret: "shh".to_string(),
            })
            .await
            .unwrap();
        service.id
    }

    #[tokio::test]
    async fn cleanup_service_deletes_the_row_even_when_steps_fail() {
        let store = Store::in_memory().await;
        let service_id = service_with_resources(&store).await;
        let adapter = MockAdapter::new();
        adapter.fail_next_call(Error::Transient("router flaky".into()));

        let orchestrator = CleanupOrchestrator::new(store.clone(), adapter);
        orchestrator.cleanup_service(service_id).await.unwrap();

        let err = store.get_service(service_id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn cleanup_service_tears_down_the_full_resource_graph() {
        let store = Store::in_memory().await;
        let service_id = service_with_resources(&store).await;

        let orchestrator = CleanupOrchestrator::new(store.clone(), MockAdapter::new());
        orchestrator.cleanup_service(service_id).await.unwrap();

        // Security group, DNS record, and webhook all release without error,
        // and the git binding itself is gone along with the service row.
        assert!(matches!(store.get_git_source(service_id).await, Err(Error::NotFound(_))));
        assert!(matches!(store.get_service(service_id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn a_failing_security_group_release_is_recorded_but_does_not_block_cleanup() {
        let store = Store::in_memory().await;
        let service_id = service_with_resources(&store).await;

        store
            .record_cleanup_attempt(service_id, "release_security_group", "sg-1", Some("still attached"))
            .await
            .unwrap();

        let orchestrator = CleanupOrchestrator::new(store.clone(), MockAdapter::new());
        orchestrator.cleanup_service(service_id).await.unwrap();

        assert!(matches!(store.get_service(service_id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn job_handler_dispatches_cleanup_service_jobs() {
        let store = Store::in_memory().await;
        let service_id = service_with_resources(&store).await;
        let orchestrator = CleanupOrchestrator::new(store.clone(), MockAdapter::new());

        let job = Job {
            id: Id::new(),
            job_type: JobType::CleanupService,
            payload: serde_json::json!({ "service_id": service_id }),
            state: JobState::Processing,
            attempts: 0,
            max_attempts: 3,
            lease_holder: None,
            lease_deadline: None,
            created_at: platform_common::now(),
            started_at: None,
            finished_at: None,
            last_error: None,
        };

        orchestrator.handle(&job, CancellationToken::stub(false)).await.unwrap();
        assert!(matches!(store.get_service(service_id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn repeated_failures_abandon_the_step_but_still_finish() {
        let store = Store::in_memory().await;
        let service_id = service_with_resources(&store).await;

        for _ in 0..platform_store::cleanup::MAX_CLEANUP_ATTEMPTS {
            store
                .record_cleanup_attempt(service_id, "unpublish_route", "sub.example.com", Some("still down"))
                .await
                .unwrap();
        }

        let debris = store.list_debris(service_id).await.unwrap();
        assert!(debris.iter().any(|d| d.abandoned));
    }
}
