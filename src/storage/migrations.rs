//! Forward/backward SQL migration runner. Ported from the original
//! `SQLiteMigrationRunner` (gap detection, transactional apply, static
//! validation) and generalized to the two supported engines by keeping one
//! SQL pair per engine per migration, matching the spec's storage-backend
//! abstraction.

use sqlx::AnyPool;

use crate::config::DbType;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("migration {0} cannot be applied: expected version {1}")]
    GapDetected(i64, i64),
    #[error("duplicate migration version: {0}")]
    DuplicateVersion(i64),
    #[error("database is ahead of the registered migration set (current version {0})")]
    UnknownMigration(i64),
    #[error("sql error applying migration {0}: {1}")]
    SqlError(i64, String),
    #[error("no migrations to roll back")]
    NothingToRollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: &'static str,
    pub applied: bool,
}

struct EngineSql {
    up: &'static str,
    down: &'static str,
}

struct Migration {
    version: i64,
    name: &'static str,
    sqlite: EngineSql,
    postgresql: EngineSql,
}

impl Migration {
    fn sql_for(&self, engine: DbType) -> &EngineSql {
        match engine {
            DbType::Sqlite => &self.sqlite,
            DbType::Postgresql => &self.postgresql,
        }
    }
}

pub struct MigrationRunner {
    engine: DbType,
    migrations: Vec<Migration>,
}

fn contexts_and_messages() -> Migration {
    Migration {
        version: 1,
        name: "contexts_and_messages",
        sqlite: EngineSql {
            up: "
                CREATE TABLE contexts (
                    conversation_id TEXT PRIMARY KEY,
                    project_id TEXT,
                    owner_user_id TEXT,
                    snapshot TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX idx_contexts_project_id ON contexts(project_id);
                CREATE INDEX idx_contexts_updated_at ON contexts(updated_at);
                CREATE TABLE messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    timestamp INTEGER NOT NULL
                );
                CREATE INDEX idx_messages_conversation_id ON messages(conversation_id);
                CREATE INDEX idx_messages_timestamp ON messages(timestamp);
            ",
            down: "DROP TABLE messages; DROP TABLE contexts;",
        },
        postgresql: EngineSql {
            up: "
                CREATE TABLE contexts (
                    conversation_id TEXT PRIMARY KEY,
                    project_id TEXT,
                    owner_user_id TEXT,
                    snapshot JSONB NOT NULL,
                    updated_at BIGINT NOT NULL
                );
                CREATE INDEX idx_contexts_project_id ON contexts(project_id);
                CREATE INDEX idx_contexts_updated_at ON contexts(updated_at);
                CREATE TABLE messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    timestamp BIGINT NOT NULL
                );
                CREATE INDEX idx_messages_conversation_id ON messages(conversation_id);
                CREATE INDEX idx_messages_timestamp ON messages(timestamp);
            ",
            down: "DROP TABLE messages; DROP TABLE contexts;",
        },
    }
}

fn users() -> Migration {
    Migration {
        version: 2,
        name: "users",
        sqlite: EngineSql {
            up: "
                CREATE TABLE users (
                    id TEXT PRIMARY KEY,
                    username TEXT NOT NULL UNIQUE,
                    email TEXT,
                    password_hash TEXT,
                    role TEXT NOT NULL,
                    api_key_hash TEXT,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX idx_users_username ON users(username);
                CREATE INDEX idx_users_api_key_hash ON users(api_key_hash);
            ",
            down: "DROP TABLE users;",
        },
        postgresql: EngineSql {
            up: "
                CREATE TABLE users (
                    id TEXT PRIMARY KEY,
                    username TEXT NOT NULL UNIQUE,
                    email TEXT,
                    password_hash TEXT,
                    role TEXT NOT NULL,
                    api_key_hash TEXT,
                    created_at BIGINT NOT NULL
                );
                CREATE INDEX idx_users_username ON users(username);
                CREATE INDEX idx_users_api_key_hash ON users(api_key_hash);
            ",
            down: "DROP TABLE users;",
        },
    }
}

fn api_keys() -> Migration {
    Migration {
        version: 3,
        name: "api_keys",
        sqlite: EngineSql {
            up: "
                CREATE TABLE api_keys (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    key_hash TEXT NOT NULL,
                    name TEXT,
                    expires_at INTEGER,
                    created_at INTEGER NOT NULL,
                    revoked_at INTEGER
                );
                CREATE INDEX idx_api_keys_user_id ON api_keys(user_id);
                CREATE INDEX idx_api_keys_key_hash ON api_keys(key_hash);
            ",
            down: "DROP TABLE api_keys;",
        },
        postgresql: EngineSql {
            up: "
                CREATE TABLE api_keys (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    key_hash TEXT NOT NULL,
                    name TEXT,
                    expires_at BIGINT,
                    created_at BIGINT NOT NULL,
                    revoked_at BIGINT
                );
                CREATE INDEX idx_api_keys_user_id ON api_keys(user_id);
                CREATE INDEX idx_api_keys_key_hash ON api_keys(key_hash);
            ",
            down: "DROP TABLE api_keys;",
        },
    }
}

fn audit_and_cost() -> Migration {
    Migration {
        version: 4,
        name: "audit_logs_and_cost_records",
        sqlite: EngineSql {
            up: "
                CREATE TABLE audit_logs (
                    id TEXT PRIMARY KEY,
                    event_type TEXT NOT NULL,
                    user_id TEXT,
                    resource_type TEXT,
                    resource_id TEXT,
                    ip TEXT,
                    user_agent TEXT,
                    details TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX idx_audit_logs_user_id ON audit_logs(user_id);
                CREATE INDEX idx_audit_logs_event_type ON audit_logs(event_type);
                CREATE INDEX idx_audit_logs_created_at ON audit_logs(created_at);
                CREATE TABLE cost_records (
                    id TEXT PRIMARY KEY,
                    tool TEXT NOT NULL,
                    model TEXT NOT NULL,
                    input_tokens INTEGER NOT NULL,
                    output_tokens INTEGER NOT NULL,
                    cost_micros INTEGER NOT NULL,
                    conversation_id TEXT,
                    project_id TEXT,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX idx_cost_records_tool ON cost_records(tool);
                CREATE INDEX idx_cost_records_project_id ON cost_records(project_id);
                CREATE INDEX idx_cost_records_created_at ON cost_records(created_at);
            ",
            down: "DROP TABLE cost_records; DROP TABLE audit_logs;",
        },
        postgresql: EngineSql {
            up: "
                CREATE TABLE audit_logs (
                    id TEXT PRIMARY KEY,
                    event_type TEXT NOT NULL,
                    user_id TEXT,
                    resource_type TEXT,
                    resource_id TEXT,
                    ip TEXT,
                    user_agent TEXT,
                    details JSONB NOT NULL,
                    created_at BIGINT NOT NULL
                );
                CREATE INDEX idx_audit_logs_user_id ON audit_logs(user_id);
                CREATE INDEX idx_audit_logs_event_type ON audit_logs(event_type);
                CREATE INDEX idx_audit_logs_created_at ON audit_logs(created_at);
                CREATE TABLE cost_records (
                    id TEXT PRIMARY KEY,
                    tool TEXT NOT NULL,
                    model TEXT NOT NULL,
                    input_tokens BIGINT NOT NULL,
                    output_tokens BIGINT NOT NULL,
                    cost_micros BIGINT NOT NULL,
                    conversation_id TEXT,
                    project_id TEXT,
                    created_at BIGINT NOT NULL
                );
                CREATE INDEX idx_cost_records_tool ON cost_records(tool);
                CREATE INDEX idx_cost_records_project_id ON cost_records(project_id);
                CREATE INDEX idx_cost_records_created_at ON cost_records(created_at);
            ",
            down: "DROP TABLE cost_records; DROP TABLE audit_logs;",
        },
    }
}

pub fn runner(engine: DbType) -> MigrationRunner {
    MigrationRunner::new(engine, vec![contexts_and_messages(), users(), api_keys(), audit_and_cost()])
}

impl MigrationRunner {
    fn new(engine: DbType, mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self { engine, migrations }
    }

    async fn ensure_migrations_table(&self, pool: &AnyPool) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await
        .map_err(|e| MigrationError::SqlError(0, e.to_string()))?;
        Ok(())
    }

    async fn current_version(&self, pool: &AnyPool) -> Result<i64, MigrationError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_optional(pool)
            .await
            .map_err(|e| MigrationError::SqlError(0, e.to_string()))?;
        Ok(row.map(|(v,)| v).unwrap_or(0))
    }

    async fn applied_versions(&self, pool: &AnyPool) -> Result<Vec<i64>, MigrationError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT version FROM schema_migrations ORDER BY version")
            .fetch_all(pool)
            .await
            .map_err(|e| MigrationError::SqlError(0, e.to_string()))?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    /// Apply every unapplied migration with version ≤ target (default:
    /// newest registered version), each inside its own transaction.
    pub async fn migrate_up(&self, pool: &AnyPool, target: Option<i64>) -> Result<(), MigrationError> {
        self.ensure_migrations_table(pool).await?;
        let mut current = self.current_version(pool).await?;
        let applied = self.applied_versions(pool).await?;
        let max_registered = self.migrations.iter().map(|m| m.version).max().unwrap_or(0);
        if current > max_registered {
            return Err(MigrationError::UnknownMigration(current));
        }
        let target = target.unwrap_or(max_registered);

        for migration in &self.migrations {
            if migration.version > target || applied.contains(&migration.version) {
                continue;
            }
            if migration.version != current + 1 {
                return Err(MigrationError::GapDetected(migration.version, current + 1));
            }

            let mut tx = pool.begin().await.map_err(|e| MigrationError::SqlError(migration.version, e.to_string()))?;
            let sql = migration.sql_for(self.engine);
            for stmt in split_statements(sql.up) {
                sqlx::query(stmt)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| MigrationError::SqlError(migration.version, e.to_string()))?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
                .bind(migration.version)
                .bind(migration.name)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrationError::SqlError(migration.version, e.to_string()))?;
            tx.commit().await.map_err(|e| MigrationError::SqlError(migration.version, e.to_string()))?;
            current = migration.version;
        }
        Ok(())
    }

    /// Roll every applied migration above `target` back, in reverse order.
    pub async fn migrate_down(&self, pool: &AnyPool, target: i64) -> Result<(), MigrationError> {
        self.ensure_migrations_table(pool).await?;
        let current = self.current_version(pool).await?;
        if current == 0 {
            return Err(MigrationError::NothingToRollback);
        }

        for migration in self.migrations.iter().rev() {
            if migration.version <= target || migration.version > current {
                continue;
            }
            let mut tx = pool.begin().await.map_err(|e| MigrationError::SqlError(migration.version, e.to_string()))?;
            let sql = migration.sql_for(self.engine);
            for stmt in split_statements(sql.down) {
                sqlx::query(stmt)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| MigrationError::SqlError(migration.version, e.to_string()))?;
            }
            sqlx::query("DELETE FROM schema_migrations WHERE version = ?")
                .bind(migration.version)
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrationError::SqlError(migration.version, e.to_string()))?;
            tx.commit().await.map_err(|e| MigrationError::SqlError(migration.version, e.to_string()))?;
        }
        Ok(())
    }

    pub async fn status(&self, pool: &AnyPool) -> Result<Vec<MigrationStatus>, MigrationError> {
        self.ensure_migrations_table(pool).await?;
        let applied = self.applied_versions(pool).await?;
        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationStatus { version: m.version, name: m.name, applied: applied.contains(&m.version) })
            .collect())
    }

    /// Returns the plan `migrate_up` would execute without mutating anything.
    pub async fn dry_run(&self, pool: &AnyPool, target: Option<i64>) -> Result<Vec<i64>, MigrationError> {
        self.ensure_migrations_table(pool).await?;
        let applied = self.applied_versions(pool).await?;
        let max_registered = self.migrations.iter().map(|m| m.version).max().unwrap_or(0);
        let target = target.unwrap_or(max_registered);
        Ok(self
            .migrations
            .iter()
            .filter(|m| m.version <= target && !applied.contains(&m.version))
            .map(|m| m.version)
            .collect())
    }

    /// Static validation: duplicate versions, gaps, empty SQL. Does not
    /// touch the database.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for m in &self.migrations {
            if !seen.insert(m.version) {
                errors.push(format!("duplicate migration version: {}", m.version));
            }
        }
        let mut versions: Vec<i64> = self.migrations.iter().map(|m| m.version).collect();
        versions.sort();
        for pair in versions.windows(2) {
            if pair[1] != pair[0] + 1 {
                errors.push(format!("gap in migration versions: {} -> {}", pair[0], pair[1]));
            }
        }
        for m in &self.migrations {
            for engine_sql in [&m.sqlite, &m.postgresql] {
                if let Err(reason) = validate_sql_syntax(engine_sql.up) {
                    errors.push(format!("migration {} up_sql invalid: {reason}", m.version));
                }
                if let Err(reason) = validate_sql_syntax(engine_sql.down) {
                    errors.push(format!("migration {} down_sql invalid: {reason}", m.version));
                }
            }
        }
        errors
    }
}

/// Crude sanity check ported from the original `validate_sql_syntax`:
/// recognizes a DDL/DML keyword and requires balanced parens/quotes.
fn validate_sql_syntax(sql: &str) -> Result<(), &'static str> {
    let upper = sql.to_uppercase();
    let has_keyword = ["CREATE", "ALTER", "DROP", "INSERT", "UPDATE", "DELETE", "SELECT"]
        .iter()
        .any(|kw| upper.contains(kw));
    if !has_keyword {
        return Err("does not contain a recognized SQL statement");
    }
    if sql.matches('(').count() != sql.matches(')').count() {
        return Err("unbalanced parentheses");
    }
    if sql.matches('\'').count() % 2 != 0 {
        return Err("unbalanced single quotes");
    }
    Ok(())
}

fn split_statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_storage;

    #[tokio::test]
    async fn migrate_up_then_down_round_trip() {
        let storage = test_storage().await;
        let runner = runner(DbType::Sqlite);

        runner.migrate_up(&storage.pool, None).await.unwrap();
        let status = runner.status(&storage.pool).await.unwrap();
        assert_eq!(status.iter().filter(|s| s.applied).count(), 4);

        runner.migrate_down(&storage.pool, 2).await.unwrap();
        let status = runner.status(&storage.pool).await.unwrap();
        assert_eq!(status.iter().filter(|s| s.applied).count(), 2);

        let table_exists: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='api_keys'")
                .fetch_optional(&storage.pool)
                .await
                .unwrap();
        assert!(table_exists.is_none());

        runner.migrate_up(&storage.pool, None).await.unwrap();
        let status = runner.status(&storage.pool).await.unwrap();
        assert_eq!(status.iter().filter(|s| s.applied).count(), 4);
    }

    #[test]
    fn validate_detects_no_errors_on_registered_set() {
        let runner = runner(DbType::Sqlite);
        assert!(runner.validate().is_empty());
    }

    #[test]
    fn sql_syntax_validator_rejects_unbalanced_parens() {
        assert!(validate_sql_syntax("CREATE TABLE x (id INT").is_err());
    }
}
