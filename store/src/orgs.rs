use platform_common::{models::*, now, Error, Id};
use sqlx::Row;

use crate::Store;

impl Store {
    pub async fn create_organization(&self, name: &str) -> Result<Organization, Error> {
        let org = Organization {
            id: Id::new(),
            name: name.to_string(),
            created_at: now(),
        };
        sqlx::query("INSERT INTO organizations (id, name, created_at) VALUES (?, ?, ?)")
            .bind(org.id.to_string())
            .bind(&org.name)
            .bind(org.created_at)
            .execute(self.pool())
            .await?;
        Ok(org)
    }

    pub async fn get_organization(&self, id: Id) -> Result<Organization, Error> {
        let row = sqlx::query("SELECT id, name, created_at FROM organizations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("organization {id}")))?;

        Ok(Organization {
            id,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn rename_organization(&self, id: Id, name: &str) -> Result<(), Error> {
        let affected = sqlx::query("UPDATE organizations SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id.to_string())
            .execute(self.pool())
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(Error::NotFound(format!("organization {id}")));
        }
        Ok(())
    }

    pub async fn add_org_member(
        &self,
        organization_id: Id,
        user_id: Id,
        role: OrgRole,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO org_members (organization_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)",
        )
        .bind(organization_id.to_string())
        .bind(user_id.to_string())
        .bind(role)
        .bind(now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_org_members(&self, organization_id: Id) -> Result<Vec<OrgMember>, Error> {
        let rows = sqlx::query(
            "SELECT organization_id, user_id, role, joined_at FROM org_members WHERE organization_id = ?",
        )
        .bind(organization_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(OrgMember {
                    organization_id,
                    user_id: row.try_get::<String, _>("user_id")?.parse().map_err(|_| {
                        Error::Internal("corrupt user_id in org_members".into())
                    })?,
                    role: row.try_get("role")?,
                    joined_at: row.try_get("joined_at")?,
                })
            })
            .collect()
    }
}
