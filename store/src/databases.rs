use platform_common::{models::*, now, Error, Id};
use sqlx::Row;

use crate::Store;

fn row_to_database(row: &sqlx::sqlite::SqliteRow) -> Result<Database, Error> {
    Ok(Database {
        id: row.try_get::<String, _>("id")?.parse().unwrap(),
        project_id: row.try_get::<String, _>("project_id")?.parse().unwrap(),
        name: row.try_get("name")?,
        engine: row.try_get("engine")?,
        size: row.try_get("size")?,
        encrypted_credentials: row.try_get("encrypted_credentials")?,
        internal_hostname: row.try_get("internal_hostname")?,
        current_runtime_handle: row.try_get("current_runtime_handle")?,
        volume_id: row
            .try_get::<Option<String>, _>("volume_id")?
            .map(|v| v.parse().unwrap()),
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    pub async fn create_database(
        &self,
        project_id: Id,
        name: &str,
        engine: DbEngine,
        size: ServiceSize,
        encrypted_credentials: Vec<u8>,
    ) -> Result<Database, Error> {
        let db = Database {
            id: Id::new(),
            project_id,
            name: name.to_string(),
            engine,
            size,
            encrypted_credentials,
            internal_hostname: None,
            current_runtime_handle: None,
            volume_id: None,
            created_at: now(),
        };

        sqlx::query(
            "INSERT INTO databases (id, project_id, name, engine, size, encrypted_credentials, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(db.id.to_string())
        .bind(db.project_id.to_string())
        .bind(&db.name)
        .bind(db.engine)
        .bind(db.size)
        .bind(&db.encrypted_credentials)
        .bind(db.created_at)
        .execute(self.pool())
        .await?;

        Ok(db)
    }

    pub async fn get_database(&self, id: Id) -> Result<Database, Error> {
        let row = sqlx::query("SELECT * FROM databases WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("database {id}")))?;
        row_to_database(&row)
    }

    pub async fn list_databases_by_project(&self, project_id: Id) -> Result<Vec<Database>, Error> {
        let rows = sqlx::query("SELECT * FROM databases WHERE project_id = ?")
            .bind(project_id.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_database).collect()
    }

    pub async fn set_database_runtime(
        &self,
        id: Id,
        internal_hostname: &str,
        runtime_handle: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            "UPDATE databases SET internal_hostname = ?, current_runtime_handle = ? WHERE id = ?",
        )
        .bind(internal_hostname)
        .bind(runtime_handle)
        .bind(id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_database(&self, id: Id) -> Result<(), Error> {
        let affected = sqlx::query("DELETE FROM databases WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(Error::NotFound(format!("database {id}")));
        }
        Ok(())
    }

    // -- Volume --

    pub async fn create_volume(&self, project_id: Id, size_gb: u32, mount_path: &str) -> Result<Volume, Error> {
        let volume = Volume {
            id: Id::new(),
            project_id,
            size_gb,
            mount_path: mount_path.to_string(),
            attached_service_id: None,
            attached_database_id: None,
            runtime_handle: None,
            created_at: now(),
        };

        sqlx::query(
            "INSERT INTO volumes (id, project_id, size_gb, mount_path, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(volume.id.to_string())
        .bind(volume.project_id.to_string())
        .bind(volume.size_gb as i64)
        .bind(&volume.mount_path)
        .bind(volume.created_at)
        .execute(self.pool())
        .await?;

        Ok(volume)
    }

    pub async fn get_volume(&self, id: Id) -> Result<Volume, Error> {
        let row = sqlx::query("SELECT * FROM volumes WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("volume {id}")))?;
        row_to_volume(&row)
    }

    /// Attaches a volume to exactly one of a Service or a Database, per §3.
    pub async fn attach_volume(
        &self,
        id: Id,
        service_id: Option<Id>,
        database_id: Option<Id>,
        runtime_handle: &str,
    ) -> Result<(), Error> {
        if service_id.is_some() == database_id.is_some() {
            return Err(Error::Invalid(
                "a volume must attach to exactly one of a service or a database".into(),
            ));
        }

        let affected = sqlx::query(
            "UPDATE volumes SET attached_service_id = ?, attached_database_id = ?, runtime_handle = ? \
             WHERE id = ? AND attached_service_id IS NULL AND attached_database_id IS NULL",
        )
        .bind(service_id.map(|id| id.to_string()))
        .bind(database_id.map(|id| id.to_string()))
        .bind(runtime_handle)
        .bind(id.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(Error::Conflict(format!("volume {id} is already attached")));
        }
        Ok(())
    }

    pub async fn detach_volume(&self, id: Id) -> Result<(), Error> {
        sqlx::query(
            "UPDATE volumes SET attached_service_id = NULL, attached_database_id = NULL, runtime_handle = NULL WHERE id = ?",
        )
        .bind(id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_volume(&self, id: Id) -> Result<(), Error> {
        let affected = sqlx::query("DELETE FROM volumes WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(Error::NotFound(format!("volume {id}")));
        }
        Ok(())
    }

    // -- EnvVar --

    pub async fn upsert_env_var(&self, service_id: Id, key: &str, value: &EnvVarValue) -> Result<EnvVar, Error> {
        let encoded = serde_json::to_value(value)
            .map_err(|err| Error::Internal(format!("encoding env var: {err}")))?;

        let env_var = EnvVar {
            id: Id::new(),
            service_id,
            key: key.to_string(),
            value: value.clone(),
            created_at: now(),
        };

        sqlx::query(
            "INSERT INTO env_vars (id, service_id, key, value, created_at) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(service_id, key) DO UPDATE SET value = excluded.value",
        )
        .bind(env_var.id.to_string())
        .bind(service_id.to_string())
        .bind(key)
        .bind(encoded)
        .bind(env_var.created_at)
        .execute(self.pool())
        .await?;

        Ok(env_var)
    }

    pub async fn list_env_vars(&self, service_id: Id) -> Result<Vec<EnvVar>, Error> {
        let rows = sqlx::query("SELECT * FROM env_vars WHERE service_id = ?")
            .bind(service_id.to_string())
            .fetch_all(self.pool())
            .await?;

        rows.into_iter()
            .map(|row| {
                let value: serde_json::Value = row.try_get("value")?;
                let value: EnvVarValue = serde_json::from_value(value)
                    .map_err(|err| Error::Internal(format!("decoding env var: {err}")))?;
                Ok(EnvVar {
                    id: row.try_get::<String, _>("id")?.parse().unwrap(),
                    service_id,
                    key: row.try_get("key")?,
                    value,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn delete_env_var(&self, service_id: Id, key: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM env_vars WHERE service_id = ? AND key = ?")
            .bind(service_id.to_string())
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

fn row_to_volume(row: &sqlx::sqlite::SqliteRow) -> Result<Volume, Error> {
    Ok(Volume {
        id: row.try_get::<String, _>("id")?.parse().unwrap(),
        project_id: row.try_get::<String, _>("project_id")?.parse().unwrap(),
        size_gb: row.try_get::<i64, _>("size_gb")? as u32,
        mount_path: row.try_get("mount_path")?,
        attached_service_id: row
            .try_get::<Option<String>, _>("attached_service_id")?
            .map(|v| v.parse().unwrap()),
        attached_database_id: row
            .try_get::<Option<String>, _>("attached_database_id")?
            .map(|v| v.parse().unwrap()),
        runtime_handle: row.try_get("runtime_handle")?,
        created_at: row.try_get("created_at")?,
    })
}
