//! Storage backend: a single polymorphic interface over two engines — an
//! embedded SQLite file (dev / single-node) and pooled PostgreSQL
//! (production) — implemented with `sqlx::Any` so the query layer above is
//! written once against portable SQL, mirroring the teacher's
//! `r2e-data-sqlx::HasPool<DB>` abstraction generalized to runtime-selected
//! driver rather than a compile-time type parameter.

pub mod migrations;
pub mod queries;

use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;

use crate::config::{DbType, StorageConfig};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("resource not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("migration error: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StorageError::Conflict(db_err.message().to_string())
            }
            other => StorageError::Database(other.to_string()),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Holds the live connection pool plus which dialect it backs, since the
/// `Any` driver still needs to know this for a handful of dialect-sensitive
/// statements (e.g. `INSERT ... ON CONFLICT` vs `INSERT OR REPLACE`).
#[derive(Clone)]
pub struct Storage {
    pub pool: AnyPool,
    pub db_type: DbType,
}

impl Storage {
    pub async fn connect(config: &StorageConfig) -> StorageResult<Self> {
        install_default_drivers();
        let (db_type, url) = match config.db_type {
            DbType::Sqlite => (DbType::Sqlite, format!("sqlite://{}?mode=rwc", config.db_path)),
            DbType::Postgresql => {
                let conn = config
                    .connection_string
                    .clone()
                    .ok_or_else(|| StorageError::Database("postgresql connection_string is required".into()))?;
                (DbType::Postgresql, conn)
            }
        };
        let pool = AnyPoolOptions::new().max_connections(10).connect(&url).await?;
        Ok(Self { pool, db_type })
    }

    pub async fn initialize(&self) -> StorageResult<()> {
        migrations::runner(self.db_type).migrate_up(&self.pool, None).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
pub(crate) async fn test_storage() -> Storage {
    install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite pool");
    let storage = Storage { pool, db_type: DbType::Sqlite };
    storage.initialize().await.expect("migrate test db");
    storage
}
