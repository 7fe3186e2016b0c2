//! Persistence for every entity in the data model (§3), plus the
//! conditional-transition primitive every state machine in the core relies
//! on. One relational store (SQLite via `sqlx`) provides transactions and a
//! "lock a row for processing without blocking others" primitive — here
//! implemented as a conditional `UPDATE ... WHERE state = ?`, the SQLite
//! substitute for Postgres `SKIP LOCKED` per the design notes.

pub mod auth_records;
pub mod cleanup;
pub mod custom_domains;
pub mod databases;
pub mod deployments;
pub mod jobs;
pub mod orgs;
pub mod projects;
pub mod services;

use std::time::Duration;

use clap::Args;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

pub static MIGRATIONS: Migrator = sqlx::migrate!("./migrations");

/// Pool shape, configured the way the teacher's provisioner configures
/// `PgPoolOptions` — explicit construction-time values, no global state.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://platform.sqlite")]
    pub database_url: String,

    #[arg(long, env = "DB_MAX_OPEN_CONNS", default_value_t = 10)]
    pub max_open_conns: u32,

    #[arg(long, env = "DB_MAX_IDLE_CONNS", default_value_t = 5)]
    pub max_idle_conns: u32,

    #[arg(long, env = "DB_CONN_MAX_LIFETIME", default_value_t = 1800)]
    pub conn_max_lifetime_secs: u64,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(args: &StoreArgs) -> Result<Self, sqlx::Error> {
        let options: SqliteConnectOptions = args.database_url.parse::<SqliteConnectOptions>()?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(args.max_open_conns)
            .min_connections(args.max_idle_conns.min(args.max_open_conns))
            .max_lifetime(Duration::from_secs(args.conn_max_lifetime_secs))
            .connect_with(options)
            .await?;

        MIGRATIONS.run(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub async fn in_memory() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite pool");
        MIGRATIONS.run(&pool).await.expect("migrations to apply");
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Backs `GET /health`: true iff the pool can round-trip a trivial
    /// query, i.e. migrations have applied and the connection is live.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Claims a globally unique subdomain, per invariant (a) in §3.
    /// Returns `Conflict` if the name is already held.
    pub async fn acquire_name_lock(
        &self,
        name: &str,
        owner_id: platform_common::Id,
    ) -> Result<(), platform_common::Error> {
        let now = platform_common::now();
        let result = sqlx::query(
            "INSERT INTO name_locks (name, owner_id, acquired_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(owner_id.to_string())
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                platform_common::Error::Conflict(format!("name `{name}` is already taken")),
            ),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn name_lock_is_exclusive() {
        let store = Store::in_memory().await;
        let a = platform_common::Id::new();
        let b = platform_common::Id::new();

        store.acquire_name_lock("my-app-ab12cd", a).await.unwrap();
        let err = store
            .acquire_name_lock("my-app-ab12cd", b)
            .await
            .unwrap_err();
        assert!(matches!(err, platform_common::Error::Conflict(_)));
    }
}
