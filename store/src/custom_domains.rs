use platform_common::{models::*, now, Error, Id};
use sqlx::Row;

use crate::Store;

fn row_to_custom_domain(row: &sqlx::sqlite::SqliteRow) -> Result<CustomDomain, Error> {
    Ok(CustomDomain {
        id: row.try_get::<String, _>("id")?.parse().unwrap(),
        service_id: row.try_get::<String, _>("service_id")?.parse().unwrap(),
        hostname: row.try_get("hostname")?,
        state: row.try_get("state")?,
        expected_cname_target: row.try_get("expected_cname_target")?,
        validation_token: row.try_get("validation_token")?,
        ssl_issuance_metadata: row.try_get("ssl_issuance_metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    pub async fn create_custom_domain(
        &self,
        service_id: Id,
        hostname: &str,
        expected_cname_target: &str,
        validation_token: &str,
    ) -> Result<CustomDomain, Error> {
        let domain = CustomDomain {
            id: Id::new(),
            service_id,
            hostname: hostname.to_string(),
            state: CustomDomainState::Pending,
            expected_cname_target: expected_cname_target.to_string(),
            validation_token: validation_token.to_string(),
            ssl_issuance_metadata: None,
            created_at: now(),
        };

        let result = sqlx::query(
            "INSERT INTO custom_domains (id, service_id, hostname, state, expected_cname_target, validation_token, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(domain.id.to_string())
        .bind(domain.service_id.to_string())
        .bind(&domain.hostname)
        .bind(domain.state)
        .bind(&domain.expected_cname_target)
        .bind(&domain.validation_token)
        .bind(domain.created_at)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(domain),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                Error::Conflict(format!("hostname `{hostname}` is already claimed")),
            ),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_custom_domain(&self, id: Id) -> Result<CustomDomain, Error> {
        let row = sqlx::query("SELECT * FROM custom_domains WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("custom domain {id}")))?;
        row_to_custom_domain(&row)
    }

    pub async fn list_custom_domains_by_service(&self, service_id: Id) -> Result<Vec<CustomDomain>, Error> {
        let rows = sqlx::query("SELECT * FROM custom_domains WHERE service_id = ?")
            .bind(service_id.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_custom_domain).collect()
    }

    /// Conditional transition, same contract as `transition_deployment`.
    pub async fn transition_custom_domain(
        &self,
        id: Id,
        from: CustomDomainState,
        to: CustomDomainState,
    ) -> Result<bool, Error> {
        let affected = sqlx::query("UPDATE custom_domains SET state = ? WHERE id = ? AND state = ?")
            .bind(to)
            .bind(id.to_string())
            .bind(from)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(affected == 1)
    }

    pub async fn delete_custom_domain(&self, id: Id) -> Result<(), Error> {
        let affected = sqlx::query("DELETE FROM custom_domains WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(Error::NotFound(format!("custom domain {id}")));
        }
        Ok(())
    }
}
