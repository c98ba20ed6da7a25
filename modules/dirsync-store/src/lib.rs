//! Postgres persistence for search specifications.
//!
//! One table, keyed by search id. Writes are driven by the registry and are
//! best-effort from its point of view; connection and ping failures at
//! startup are fatal for the process.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::info;

use dirsync_common::{DatabaseConfig, SearchSpec, SyncError};
use dirsync_engine::SpecStore;

pub struct SearchStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SearchRow {
    id: String,
    filter: String,
    refresh: i64,
    base_dn: Option<String>,
    oneshot: bool,
}

impl SearchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and ping the database.
    pub async fn connect(config: &DatabaseConfig, password: &str) -> Result<Self, SyncError> {
        let ssl_mode = PgSslMode::from_str(&config.sslmode)
            .map_err(|e| SyncError::Config(format!("invalid sslmode '{}': {e}", config.sslmode)))?;
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .database(&config.database)
            .password(password)
            .ssl_mode(ssl_mode);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(store_err)?;
        sqlx::query("SELECT 1").execute(&pool).await.map_err(store_err)?;
        Ok(Self::new(pool))
    }

    /// Idempotent schema creation.
    pub async fn migrate(&self) -> Result<(), SyncError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS searches (
                id          TEXT        PRIMARY KEY,
                filter      TEXT        NOT NULL,
                refresh     BIGINT      NOT NULL,
                base_dn     TEXT,
                oneshot     BOOLEAN     NOT NULL DEFAULT FALSE,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS searches_created_at_idx ON searches (created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS searches_updated_at_idx ON searches (updated_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        info!("Search store schema ready");
        Ok(())
    }
}

#[async_trait]
impl SpecStore for SearchStore {
    async fn upsert(&self, spec: &SearchSpec) -> Result<(), SyncError> {
        sqlx::query(
            r#"
            INSERT INTO searches (id, filter, refresh, base_dn, oneshot)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
                SET filter = EXCLUDED.filter,
                    refresh = EXCLUDED.refresh,
                    base_dn = EXCLUDED.base_dn,
                    oneshot = EXCLUDED.oneshot,
                    updated_at = now()
            "#,
        )
        .bind(&spec.id)
        .bind(&spec.filter)
        .bind(spec.refresh as i64)
        .bind(&spec.base_dn)
        .bind(spec.oneshot)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM searches WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<SearchSpec>, SyncError> {
        let rows: Vec<SearchRow> = sqlx::query_as(
            "SELECT id, filter, refresh, base_dn, oneshot FROM searches ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|row| SearchSpec {
                id: row.id,
                filter: row.filter,
                refresh: row.refresh.max(0) as u64,
                base_dn: row.base_dn,
                oneshot: row.oneshot,
            })
            .collect())
    }
}

fn store_err(e: sqlx::Error) -> SyncError {
    SyncError::Store(e.to_string())
}
