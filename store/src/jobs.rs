use platform_common::{models::*, now, Error, Id};
use sqlx::Row;

use crate::Store;

pub(crate) fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, Error> {
    Ok(Job {
        id: row.try_get::<String, _>("id")?.parse().unwrap(),
        job_type: row.try_get("job_type")?,
        payload: row.try_get("payload")?,
        state: row.try_get("state")?,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
        lease_holder: row.try_get("lease_holder")?,
        lease_deadline: row.try_get("lease_deadline")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        last_error: row.try_get("last_error")?,
    })
}

impl Store {
    pub async fn get_job(&self, id: Id) -> Result<Job, Error> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        row_to_job(&row)
    }

    pub async fn list_jobs_by_state(&self, state: JobState) -> Result<Vec<Job>, Error> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE state = ? ORDER BY created_at ASC")
            .bind(state)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    pub async fn cancel_job(&self, id: Id) -> Result<bool, Error> {
        let affected = sqlx::query(
            "UPDATE jobs SET state = ?, finished_at = ? WHERE id = ? AND state IN (?, ?)",
        )
        .bind(JobState::Cancelled)
        .bind(now())
        .bind(id.to_string())
        .bind(JobState::Queued)
        .bind(JobState::Processing)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(affected == 1)
    }
}
