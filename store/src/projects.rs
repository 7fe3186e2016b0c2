use platform_common::{models::*, now, Error, Id};
use sqlx::Row;

use crate::Store;

fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> Result<Project, Error> {
    Ok(Project {
        id: row.try_get::<String, _>("id")?.parse().unwrap(),
        organization_id: row.try_get::<String, _>("organization_id")?.parse().unwrap(),
        name: row.try_get("name")?,
        tenant_id: row.try_get("tenant_id")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    pub async fn create_project(
        &self,
        organization_id: Id,
        name: &str,
        tenant_id: &str,
    ) -> Result<Project, Error> {
        let project = Project {
            id: Id::new(),
            organization_id,
            name: name.to_string(),
            tenant_id: tenant_id.to_string(),
            created_at: now(),
        };

        sqlx::query(
            "INSERT INTO projects (id, organization_id, name, tenant_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(project.id.to_string())
        .bind(project.organization_id.to_string())
        .bind(&project.name)
        .bind(&project.tenant_id)
        .bind(project.created_at)
        .execute(self.pool())
        .await?;

        Ok(project)
    }

    pub async fn get_project(&self, id: Id) -> Result<Project, Error> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {id}")))?;
        row_to_project(&row)
    }

    pub async fn list_projects_by_org(&self, organization_id: Id) -> Result<Vec<Project>, Error> {
        let rows = sqlx::query("SELECT * FROM projects WHERE organization_id = ?")
            .bind(organization_id.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_project).collect()
    }

    pub async fn delete_project(&self, id: Id) -> Result<(), Error> {
        let affected = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(Error::NotFound(format!("project {id}")));
        }
        Ok(())
    }
}
