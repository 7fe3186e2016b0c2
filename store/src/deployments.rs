use platform_common::{models::*, now, Error, Id};
use sqlx::Row;

use crate::Store;

fn row_to_deployment(row: &sqlx::sqlite::SqliteRow) -> Result<Deployment, Error> {
    Ok(Deployment {
        id: row.try_get::<String, _>("id")?.parse().unwrap(),
        service_id: row.try_get::<String, _>("service_id")?.parse().unwrap(),
        commit_sha: row.try_get("commit_sha")?,
        commit_message: row.try_get("commit_message")?,
        commit_author: row.try_get("commit_author")?,
        trigger: row.try_get("trigger")?,
        state: row.try_get("state")?,
        image_tag: row.try_get("image_tag")?,
        build_duration_ms: row
            .try_get::<Option<i64>, _>("build_duration_ms")?
            .map(|v| v as u64),
        deploy_duration_ms: row
            .try_get::<Option<i64>, _>("deploy_duration_ms")?
            .map(|v| v as u64),
        terminal_error: row.try_get("terminal_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Store {
    pub async fn create_deployment(
        &self,
        service_id: Id,
        trigger: Trigger,
        commit_sha: Option<&str>,
        commit_message: Option<&str>,
        commit_author: Option<&str>,
    ) -> Result<Deployment, Error> {
        let deployment = Deployment {
            id: Id::new(),
            service_id,
            commit_sha: commit_sha.map(str::to_string),
            commit_message: commit_message.map(str::to_string),
            commit_author: commit_author.map(str::to_string),
            trigger,
            state: DeploymentState::Queued,
            image_tag: None,
            build_duration_ms: None,
            deploy_duration_ms: None,
            terminal_error: None,
            created_at: now(),
            updated_at: now(),
        };

        sqlx::query(
            "INSERT INTO deployments (id, service_id, commit_sha, commit_message, commit_author, trigger, state, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(deployment.id.to_string())
        .bind(deployment.service_id.to_string())
        .bind(&deployment.commit_sha)
        .bind(&deployment.commit_message)
        .bind(&deployment.commit_author)
        .bind(deployment.trigger)
        .bind(deployment.state)
        .bind(deployment.created_at)
        .bind(deployment.updated_at)
        .execute(self.pool())
        .await?;

        Ok(deployment)
    }

    pub async fn get_deployment(&self, id: Id) -> Result<Deployment, Error> {
        let row = sqlx::query("SELECT * FROM deployments WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("deployment {id}")))?;
        row_to_deployment(&row)
    }

    pub async fn list_deployments_by_service(&self, service_id: Id) -> Result<Vec<Deployment>, Error> {
        let rows = sqlx::query("SELECT * FROM deployments WHERE service_id = ? ORDER BY created_at ASC")
            .bind(service_id.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_deployment).collect()
    }

    /// `ListSuccessfulDeployments(service, n)`: the most recent `n`
    /// deployments in `success` state with a non-null image tag, used by
    /// rollback (§4.1(a), §4.8).
    pub async fn list_successful_deployments(
        &self,
        service_id: Id,
        n: u32,
    ) -> Result<Vec<Deployment>, Error> {
        let rows = sqlx::query(
            "SELECT * FROM deployments WHERE service_id = ? AND state = ? AND image_tag IS NOT NULL \
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(service_id.to_string())
        .bind(DeploymentState::Success)
        .bind(n as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_deployment).collect()
    }

    /// Conditional transition per §4.1's contract: "update X from state A
    /// to state B where X.state = A", returning whether the transition
    /// fired. Rejects transitions not listed in `DeploymentState::allowed_next`.
    pub async fn transition_deployment(
        &self,
        id: Id,
        from: DeploymentState,
        to: DeploymentState,
    ) -> Result<bool, Error> {
        if !from.allowed_next().contains(&to) {
            return Err(Error::Invalid(format!(
                "illegal deployment transition {from} -> {to}"
            )));
        }

        let affected = sqlx::query(
            "UPDATE deployments SET state = ?, updated_at = ? WHERE id = ? AND state = ?",
        )
        .bind(to)
        .bind(now())
        .bind(id.to_string())
        .bind(from)
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(affected == 1)
    }

    pub async fn fail_deployment(&self, id: Id, error: &str) -> Result<(), Error> {
        sqlx::query(
            "UPDATE deployments SET state = ?, terminal_error = ?, updated_at = ? \
             WHERE id = ? AND state NOT IN (?, ?, ?)",
        )
        .bind(DeploymentState::Failed)
        .bind(error)
        .bind(now())
        .bind(id.to_string())
        .bind(DeploymentState::Success)
        .bind(DeploymentState::Failed)
        .bind(DeploymentState::Cancelled)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_deployment_image(&self, id: Id, image_tag: &str) -> Result<(), Error> {
        sqlx::query("UPDATE deployments SET image_tag = ? WHERE id = ?")
            .bind(image_tag)
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_commit_sha(&self, id: Id, commit_sha: &str) -> Result<(), Error> {
        sqlx::query("UPDATE deployments SET commit_sha = ? WHERE id = ?")
            .bind(commit_sha)
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn record_durations(
        &self,
        id: Id,
        build_duration_ms: Option<u64>,
        deploy_duration_ms: Option<u64>,
    ) -> Result<(), Error> {
        sqlx::query(
            "UPDATE deployments SET build_duration_ms = COALESCE(?, build_duration_ms), \
             deploy_duration_ms = COALESCE(?, deploy_duration_ms) WHERE id = ?",
        )
        .bind(build_duration_ms.map(|v| v as i64))
        .bind(deploy_duration_ms.map(|v| v as i64))
        .bind(id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    // -- DeploymentLog --

    pub async fn append_log(
        &self,
        deployment_id: Id,
        phase: LogPhase,
        level: LogLevel,
        message: &str,
        metadata: serde_json::Value,
    ) -> Result<DeploymentLog, Error> {
        let seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM deployment_logs WHERE deployment_id = ?",
        )
        .bind(deployment_id.to_string())
        .fetch_one(self.pool())
        .await?;

        let log = DeploymentLog {
            id: Id::new(),
            deployment_id,
            timestamp: now(),
            phase,
            level,
            message: message.to_string(),
            metadata,
        };

        sqlx::query(
            "INSERT INTO deployment_logs (id, deployment_id, timestamp, phase, level, message, metadata, seq) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.id.to_string())
        .bind(log.deployment_id.to_string())
        .bind(log.timestamp)
        .bind(log.phase)
        .bind(log.level)
        .bind(&log.message)
        .bind(&log.metadata)
        .bind(seq)
        .execute(self.pool())
        .await?;

        Ok(log)
    }

    /// Logs for a deployment, in store-insertion order, optionally only
    /// those after a given sequence cursor (`GET /deployments/{id}/logs?since=`).
    pub async fn list_logs(
        &self,
        deployment_id: Id,
        since_seq: Option<i64>,
    ) -> Result<Vec<DeploymentLog>, Error> {
        let rows = sqlx::query(
            "SELECT id, deployment_id, timestamp, phase, level, message, metadata FROM deployment_logs \
             WHERE deployment_id = ? AND seq > ? ORDER BY seq ASC",
        )
        .bind(deployment_id.to_string())
        .bind(since_seq.unwrap_or(0))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DeploymentLog {
                    id: row.try_get::<String, _>("id")?.parse().unwrap(),
                    deployment_id,
                    timestamp: row.try_get("timestamp")?,
                    phase: row.try_get("phase")?,
                    level: row.try_get("level")?,
                    message: row.try_get("message")?,
                    metadata: row.try_get("metadata")?,
                })
            })
            .collect()
    }

    // -- PendingCommit --

    /// Idempotent on `(service, commit_sha)` per §4.7 step 3: a duplicate
    /// delivery returns the existing row instead of inserting a new one.
    pub async fn upsert_pending_commit(
        &self,
        service_id: Id,
        commit_sha: &str,
        commit_message: &str,
        commit_author: &str,
    ) -> Result<PendingCommit, Error> {
        let existing = sqlx::query("SELECT * FROM pending_commits WHERE service_id = ? AND commit_sha = ?")
            .bind(service_id.to_string())
            .bind(commit_sha)
            .fetch_optional(self.pool())
            .await?;

        if let Some(row) = existing {
            return row_to_pending_commit(&row, service_id);
        }

        let commit = PendingCommit {
            id: Id::new(),
            service_id,
            commit_sha: commit_sha.to_string(),
            commit_message: commit_message.to_string(),
            commit_author: commit_author.to_string(),
            acknowledged: false,
            received_at: now(),
        };

        sqlx::query(
            "INSERT INTO pending_commits (id, service_id, commit_sha, commit_message, commit_author, acknowledged, received_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(commit.id.to_string())
        .bind(commit.service_id.to_string())
        .bind(&commit.commit_sha)
        .bind(&commit.commit_message)
        .bind(&commit.commit_author)
        .bind(commit.received_at)
        .execute(self.pool())
        .await?;

        Ok(commit)
    }

    pub async fn count_pending_commits(&self, service_id: Id) -> Result<u32, Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pending_commits WHERE service_id = ? AND acknowledged = 0",
        )
        .bind(service_id.to_string())
        .fetch_one(self.pool())
        .await?;
        Ok(count as u32)
    }

    pub async fn acknowledge_pending_commits(&self, service_id: Id) -> Result<(), Error> {
        sqlx::query("UPDATE pending_commits SET acknowledged = 1 WHERE service_id = ?")
            .bind(service_id.to_string())
            .execute(self.pool())
            .await?;
        self.clear_pending_commits(service_id).await
    }
}

fn row_to_pending_commit(row: &sqlx::sqlite::SqliteRow, service_id: Id) -> Result<PendingCommit, Error> {
    Ok(PendingCommit {
        id: row.try_get::<String, _>("id")?.parse().unwrap(),
        service_id,
        commit_sha: row.try_get("commit_sha")?,
        commit_message: row.try_get("commit_message")?,
        commit_author: row.try_get("commit_author")?,
        acknowledged: row.try_get("acknowledged")?,
        received_at: row.try_get("received_at")?,
    })
}
