//! Bookkeeping for the resource lifecycle & cleanup orchestrator (C6). Each
//! row records the outcome of one step of the ordered cleanup walk in §3's
//! "resource graph invariant", so a step that keeps failing can be
//! abandoned without blocking the parent row's deletion (§4.6).

use platform_common::{now, Error, Id};
use sqlx::Row;

use crate::Store;

#[derive(Debug, Clone)]
pub struct DebrisRecord {
    pub id: Id,
    pub service_id: Id,
    pub step_name: String,
    pub resource_identifier: String,
    pub attempts: u32,
    pub abandoned: bool,
    pub last_error: Option<String>,
}

/// A step is abandoned after this many failed attempts (§4.6).
pub const MAX_CLEANUP_ATTEMPTS: u32 = 3;

impl Store {
    /// Records the outcome of one cleanup step. Creates the debris row on
    /// first failure, and marks it abandoned once `MAX_CLEANUP_ATTEMPTS` is
    /// reached.
    pub async fn record_cleanup_attempt(
        &self,
        service_id: Id,
        step_name: &str,
        resource_identifier: &str,
        error: Option<&str>,
    ) -> Result<(), Error> {
        if error.is_none() {
            sqlx::query(
                "DELETE FROM resource_debris WHERE service_id = ? AND step_name = ? AND resource_identifier = ?",
            )
            .bind(service_id.to_string())
            .bind(step_name)
            .bind(resource_identifier)
            .execute(self.pool())
            .await?;
            return Ok(());
        }

        let existing: Option<(String, i64)> = sqlx::query_as(
            "SELECT id, attempts FROM resource_debris WHERE service_id = ? AND step_name = ? AND resource_identifier = ?",
        )
        .bind(service_id.to_string())
        .bind(step_name)
        .bind(resource_identifier)
        .fetch_optional(self.pool())
        .await?;

        if let Some((id, attempts)) = existing {
            let attempts = attempts + 1;
            sqlx::query(
                "UPDATE resource_debris SET attempts = ?, abandoned = ?, last_error = ? WHERE id = ?",
            )
            .bind(attempts)
            .bind(attempts as u32 >= MAX_CLEANUP_ATTEMPTS)
            .bind(error)
            .bind(id)
            .execute(self.pool())
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO resource_debris (id, service_id, step_name, resource_identifier, attempts, abandoned, last_error, created_at) \
                 VALUES (?, ?, ?, ?, 1, 0, ?, ?)",
            )
            .bind(Id::new().to_string())
            .bind(service_id.to_string())
            .bind(step_name)
            .bind(resource_identifier)
            .bind(error)
            .bind(now())
            .execute(self.pool())
            .await?;
        }

        Ok(())
    }

    pub async fn list_debris(&self, service_id: Id) -> Result<Vec<DebrisRecord>, Error> {
        let rows = sqlx::query("SELECT * FROM resource_debris WHERE service_id = ?")
            .bind(service_id.to_string())
            .fetch_all(self.pool())
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DebrisRecord {
                    id: row.try_get::<String, _>("id")?.parse().unwrap(),
                    service_id,
                    step_name: row.try_get("step_name")?,
                    resource_identifier: row.try_get("resource_identifier")?,
                    attempts: row.try_get::<i64, _>("attempts")? as u32,
                    abandoned: row.try_get("abandoned")?,
                    last_error: row.try_get("last_error")?,
                })
            })
            .collect()
    }
}
