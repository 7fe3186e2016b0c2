//! A database-backed work queue with cooperative leasing (C2). Multiple
//! stateless workers can process jobs concurrently without duplication, and
//! the queue survives worker crashes because a lease is just a row with a
//! deadline: any worker can reclaim it once the deadline passes.

use std::time::Duration;

use chrono::Utc;
use platform_common::{models::*, now, Error, Id};
use platform_store::Store;
use sqlx::Row;
use tracing::instrument;

#[derive(Clone)]
pub struct Queue {
    store: Store,
}

impl Queue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Persists a job in `queued`. Returns the job id.
    #[instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> Result<Id, Error> {
        let id = Id::new();
        sqlx::query(
            "INSERT INTO jobs (id, job_type, payload, state, attempts, max_attempts, created_at) \
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(id.to_string())
        .bind(job_type)
        .bind(&payload)
        .bind(JobState::Queued)
        .bind(max_attempts as i64)
        .bind(now())
        .execute(self.store.pool())
        .await?;

        Ok(id)
    }

    /// Atomically picks the oldest `queued` job, or the oldest `processing`
    /// job whose lease has expired, and hands it to `worker_id`. The
    /// candidate selection and the claiming `UPDATE` run inside one
    /// transaction with a `WHERE state = <observed state>` guard so two
    /// concurrent callers can never claim the same row (§4.2).
    #[instrument(skip(self))]
    pub async fn lease(&self, worker_id: &str, lease_ttl: Duration) -> Result<Option<Job>, Error> {
        let mut tx = self.store.pool().begin().await?;
        let now_ts = now();

        let candidate = sqlx::query(
            "SELECT id, state FROM jobs \
             WHERE state = ? OR (state = ? AND lease_deadline < ?) \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(JobState::Queued)
        .bind(JobState::Processing)
        .bind(now_ts)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let id: String = row.try_get("id")?;
        let observed_state: JobState = row.try_get("state")?;
        let deadline = now_ts + chrono::Duration::seconds(lease_ttl.as_secs() as i64);

        let affected = sqlx::query(
            "UPDATE jobs SET state = ?, lease_holder = ?, lease_deadline = ?, attempts = attempts + 1, \
             started_at = COALESCE(started_at, ?) WHERE id = ? AND state = ?",
        )
        .bind(JobState::Processing)
        .bind(worker_id)
        .bind(deadline)
        .bind(now_ts)
        .bind(&id)
        .bind(observed_state)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if affected == 0 {
            // Lost the race to another concurrent leaser; caller retries.
            return Ok(None);
        }

        Ok(Some(self.store.get_job(id.parse().unwrap()).await?))
    }

    /// Extends the lease. Fails with `Conflict` if the caller no longer
    /// holds it (another worker reclaimed it after expiry).
    #[instrument(skip(self))]
    pub async fn heartbeat(&self, job_id: Id, worker_id: &str, lease_ttl: Duration) -> Result<(), Error> {
        let deadline = Utc::now() + chrono::Duration::seconds(lease_ttl.as_secs() as i64);
        let affected = sqlx::query(
            "UPDATE jobs SET lease_deadline = ? WHERE id = ? AND lease_holder = ? AND state = ?",
        )
        .bind(deadline)
        .bind(job_id.to_string())
        .bind(worker_id)
        .bind(JobState::Processing)
        .execute(self.store.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(Error::Conflict(format!(
                "worker {worker_id} no longer holds the lease for job {job_id}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn complete(&self, job_id: Id, worker_id: &str) -> Result<(), Error> {
        let affected = sqlx::query(
            "UPDATE jobs SET state = ?, finished_at = ? WHERE id = ? AND lease_holder = ? AND state = ?",
        )
        .bind(JobState::Completed)
        .bind(now())
        .bind(job_id.to_string())
        .bind(worker_id)
        .bind(JobState::Processing)
        .execute(self.store.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(Error::Conflict(format!(
                "worker {worker_id} no longer holds the lease for job {job_id}"
            )));
        }
        Ok(())
    }

    /// Returns the job to `queued` if attempts remain, else terminally
    /// `failed`.
    #[instrument(skip(self, err))]
    pub async fn fail(&self, job_id: Id, worker_id: &str, err: &str) -> Result<(), Error> {
        let job = self.store.get_job(job_id).await?;

        if job.attempts < job.max_attempts {
            let affected = sqlx::query(
                "UPDATE jobs SET state = ?, last_error = ?, lease_holder = NULL, lease_deadline = NULL \
                 WHERE id = ? AND lease_holder = ? AND state = ?",
            )
            .bind(JobState::Queued)
            .bind(err)
            .bind(job_id.to_string())
            .bind(worker_id)
            .bind(JobState::Processing)
            .execute(self.store.pool())
            .await?
            .rows_affected();

            if affected == 0 {
                return Err(Error::Conflict(format!(
                    "worker {worker_id} no longer holds the lease for job {job_id}"
                )));
            }
        } else {
            sqlx::query(
                "UPDATE jobs SET state = ?, last_error = ?, finished_at = ? WHERE id = ?",
            )
            .bind(JobState::Failed)
            .bind(err)
            .bind(now())
            .bind(job_id.to_string())
            .execute(self.store.pool())
            .await?;
        }
        Ok(())
    }

    /// Observable by the worker at its next heartbeat (§4.2).
    pub async fn cancel(&self, job_id: Id) -> Result<bool, Error> {
        self.store.cancel_job(job_id).await
    }

    pub async fn get(&self, job_id: Id) -> Result<Job, Error> {
        self.store.get_job(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn queue() -> Queue {
        Queue::new(Store::in_memory().await)
    }

    #[tokio::test]
    async fn lease_is_exclusive_between_concurrent_workers() {
        let q = queue().await;
        q.enqueue(JobType::Build, serde_json::json!({}), 3)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            q.lease("worker-a", Duration::from_secs(30)),
            q.lease("worker-b", Duration::from_secs(30)),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        // Exactly one of the two concurrent callers won the single job.
        assert_ne!(a.is_some(), b.is_some());
    }

    #[tokio::test]
    async fn fifo_ordering() {
        let q = queue().await;
        let first = q
            .enqueue(JobType::Build, serde_json::json!({"n": 1}), 3)
            .await
            .unwrap();
        let _second = q
            .enqueue(JobType::Build, serde_json::json!({"n": 2}), 3)
            .await
            .unwrap();

        let leased = q.lease("w1", Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(leased.id, first);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let q = queue().await;
        let id = q
            .enqueue(JobType::Build, serde_json::json!({}), 3)
            .await
            .unwrap();

        q.lease("w1", Duration::from_secs(0)).await.unwrap();
        // w1's lease deadline is already in the past.
        let reclaimed = q.lease("w2", Duration::from_secs(30)).await.unwrap();
        assert_eq!(reclaimed.unwrap().id, id);
    }

    #[tokio::test]
    async fn fail_under_max_attempts_requeues() {
        let q = queue().await;
        let id = q
            .enqueue(JobType::Build, serde_json::json!({}), 2)
            .await
            .unwrap();
        q.lease("w1", Duration::from_secs(30)).await.unwrap();
        q.fail(id, "w1", "boom").await.unwrap();

        let job = q.get(id).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
    }

    #[tokio::test]
    async fn fail_at_max_attempts_terminates() {
        let q = queue().await;
        let id = q
            .enqueue(JobType::Build, serde_json::json!({}), 1)
            .await
            .unwrap();
        q.lease("w1", Duration::from_secs(30)).await.unwrap();
        q.fail(id, "w1", "boom").await.unwrap();

        let job = q.get(id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
    }

    #[tokio::test]
    async fn heartbeat_fails_without_the_lease() {
        let q = queue().await;
        let id = q
            .enqueue(JobType::Build, serde_json::json!({}), 3)
            .await
            .unwrap();
        q.lease("w1", Duration::from_secs(30)).await.unwrap();

        let err = q
            .heartbeat(id, "someone-else", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
