use platform_common::{models::*, now, Error, Id};
use sqlx::{types::Json, Row};

use crate::Store;

fn row_to_service(row: &sqlx::sqlite::SqliteRow) -> Result<Service, Error> {
    let health_check: Json<HealthCheckConfig> = row.try_get("health_check")?;
    Ok(Service {
        id: row.try_get::<String, _>("id")?.parse().unwrap(),
        project_id: row.try_get::<String, _>("project_id")?.parse().unwrap(),
        name: row.try_get("name")?,
        service_type: row.try_get("service_type")?,
        size: row.try_get("size")?,
        listen_port: row.try_get::<i64, _>("listen_port")? as u16,
        health_check: health_check.0,
        current_image_tag: row.try_get("current_image_tag")?,
        subdomain: row.try_get("subdomain")?,
        current_runtime_handle: row.try_get("current_runtime_handle")?,
        current_floating_ip_id: row.try_get("current_floating_ip_id")?,
        current_security_group_id: row.try_get("current_security_group_id")?,
        current_dns_record_id: row.try_get("current_dns_record_id")?,
        pending_commits_count: row.try_get::<i64, _>("pending_commits_count")? as u32,
        auto_deploy: row.try_get("auto_deploy")?,
        restart_count: row.try_get::<i64, _>("restart_count")? as u32,
        last_restart_at: row.try_get("last_restart_at")?,
        deployment_in_progress: row.try_get("deployment_in_progress")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    pub async fn create_service(
        &self,
        project_id: Id,
        name: &str,
        size: ServiceSize,
        listen_port: u16,
        health_check: HealthCheckConfig,
        auto_deploy: bool,
    ) -> Result<Service, Error> {
        let service = Service {
            id: Id::new(),
            project_id,
            name: name.to_string(),
            service_type: ServiceType::App,
            size,
            listen_port,
            health_check,
            current_image_tag: None,
            subdomain: None,
            current_runtime_handle: None,
            current_floating_ip_id: None,
            current_security_group_id: None,
            current_dns_record_id: None,
            pending_commits_count: 0,
            auto_deploy,
            restart_count: 0,
            last_restart_at: None,
            deployment_in_progress: false,
            created_at: now(),
        };

        sqlx::query(
            "INSERT INTO services (id, project_id, name, service_type, size, listen_port, health_check, \
             pending_commits_count, auto_deploy, restart_count, deployment_in_progress, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, 0, 0, ?)",
        )
        .bind(service.id.to_string())
        .bind(service.project_id.to_string())
        .bind(&service.name)
        .bind(service.service_type)
        .bind(service.size)
        .bind(service.listen_port as i64)
        .bind(Json(&service.health_check))
        .bind(service.auto_deploy)
        .bind(service.created_at)
        .execute(self.pool())
        .await?;

        Ok(service)
    }

    pub async fn get_service(&self, id: Id) -> Result<Service, Error> {
        let row = sqlx::query("SELECT * FROM services WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("service {id}")))?;
        row_to_service(&row)
    }

    pub async fn list_services_by_project(&self, project_id: Id) -> Result<Vec<Service>, Error> {
        let rows = sqlx::query("SELECT * FROM services WHERE project_id = ?")
            .bind(project_id.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_service).collect()
    }

    pub async fn delete_service(&self, id: Id) -> Result<(), Error> {
        let affected = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(Error::NotFound(format!("service {id}")));
        }
        Ok(())
    }

    /// Atomically sets the service-level gate described in §4.5
    /// "Concurrency per service". Returns `true` if this caller won the
    /// gate, `false` if another deployment already holds it.
    pub async fn try_begin_deployment(&self, service_id: Id) -> Result<bool, Error> {
        let affected = sqlx::query(
            "UPDATE services SET deployment_in_progress = 1 \
             WHERE id = ? AND deployment_in_progress = 0",
        )
        .bind(service_id.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(affected == 1)
    }

    pub async fn end_deployment(&self, service_id: Id) -> Result<(), Error> {
        sqlx::query("UPDATE services SET deployment_in_progress = 0 WHERE id = ?")
            .bind(service_id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Publishes a newly verified image as the service's live image and
    /// records the resources created for it. Invariant (c) in §3: a
    /// non-null image tag implies the last deployment succeeded, so this is
    /// only ever called from the `verifying -> success` transition.
    #[allow(clippy::too_many_arguments)]
    pub async fn set_live_image(
        &self,
        service_id: Id,
        image_tag: &str,
        runtime_handle: &str,
        floating_ip_id: Option<&str>,
        security_group_id: Option<&str>,
    ) -> Result<(), Error> {
        sqlx::query(
            "UPDATE services SET current_image_tag = ?, current_runtime_handle = ?, \
             current_floating_ip_id = COALESCE(?, current_floating_ip_id), \
             current_security_group_id = COALESCE(?, current_security_group_id) WHERE id = ?",
        )
        .bind(image_tag)
        .bind(runtime_handle)
        .bind(floating_ip_id)
        .bind(security_group_id)
        .bind(service_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn assign_subdomain(&self, service_id: Id, subdomain: &str) -> Result<(), Error> {
        self.acquire_name_lock(subdomain, service_id).await?;
        sqlx::query("UPDATE services SET subdomain = ? WHERE id = ?")
            .bind(subdomain)
            .bind(service_id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Records the handle returned by the DNS record created alongside a
    /// service's subdomain, so cleanup can look it up and tear it down.
    pub async fn set_dns_record(&self, service_id: Id, record_id: &str) -> Result<(), Error> {
        sqlx::query("UPDATE services SET current_dns_record_id = ? WHERE id = ?")
            .bind(record_id)
            .bind(service_id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn record_restart(&self, service_id: Id) -> Result<(), Error> {
        sqlx::query(
            "UPDATE services SET restart_count = restart_count + 1, last_restart_at = ? WHERE id = ?",
        )
        .bind(now())
        .bind(service_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn increment_pending_commits(&self, service_id: Id) -> Result<(), Error> {
        sqlx::query(
            "UPDATE services SET pending_commits_count = pending_commits_count + 1 WHERE id = ?",
        )
        .bind(service_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn clear_pending_commits(&self, service_id: Id) -> Result<(), Error> {
        sqlx::query("UPDATE services SET pending_commits_count = 0 WHERE id = ?")
            .bind(service_id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    // -- GitSource --

    pub async fn upsert_git_source(&self, source: &GitSource) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO git_sources (service_id, provider, repo_owner, repo_name, branch, subdirectory, webhook_handle, webhook_secret) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(service_id) DO UPDATE SET provider=excluded.provider, repo_owner=excluded.repo_owner, \
             repo_name=excluded.repo_name, branch=excluded.branch, subdirectory=excluded.subdirectory, \
             webhook_handle=excluded.webhook_handle, webhook_secret=excluded.webhook_secret",
        )
        .bind(source.service_id.to_string())
        .bind(source.provider)
        .bind(&source.repo_owner)
        .bind(&source.repo_name)
        .bind(&source.branch)
        .bind(&source.subdirectory)
        .bind(&source.webhook_handle)
        .bind(&source.webhook_secret)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_git_source(&self, service_id: Id) -> Result<GitSource, Error> {
        let row = sqlx::query("SELECT * FROM git_sources WHERE service_id = ?")
            .bind(service_id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("git source for service {service_id}")))?;

        Ok(GitSource {
            service_id,
            provider: row.try_get("provider")?,
            repo_owner: row.try_get("repo_owner")?,
            repo_name: row.try_get("repo_name")?,
            branch: row.try_get("branch")?,
            subdirectory: row.try_get("subdirectory")?,
            webhook_handle: row.try_get("webhook_handle")?,
            webhook_secret: row.try_get("webhook_secret")?,
        })
    }

    /// Used by the webhook ingestor (§4.7 step 1) to find every service
    /// bound to a given `(provider, owner, repo, branch)`.
    pub async fn find_services_by_git_binding(
        &self,
        provider: GitProvider,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Vec<Service>, Error> {
        let rows = sqlx::query(
            "SELECT s.* FROM services s JOIN git_sources g ON g.service_id = s.id \
             WHERE g.provider = ? AND g.repo_owner = ? AND g.repo_name = ? AND g.branch = ?",
        )
        .bind(provider)
        .bind(owner)
        .bind(repo)
        .bind(branch)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_service).collect()
    }

    pub async fn delete_git_source(&self, service_id: Id) -> Result<Option<GitSource>, Error> {
        match self.get_git_source(service_id).await {
            Ok(source) => {
                sqlx::query("DELETE FROM git_sources WHERE service_id = ?")
                    .bind(service_id.to_string())
                    .execute(self.pool())
                    .await?;
                Ok(Some(source))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
