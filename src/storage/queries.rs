//! Entity-level CRUD against the `Storage` pool: context, message, user,
//! API-key, audit, cost. Every mutating call is a single statement or a
//! transaction; nothing here holds a transaction across an upstream call.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::{Storage, StorageError, StorageResult};
use crate::models::{ApiKey, AuditEvent, AuditEventType, CostRecord, Message, Role, User, UserRole};

impl Storage {
    // ---- Context ----------------------------------------------------

    pub async fn save_context(
        &self,
        conversation_id: &str,
        project_id: Option<&str>,
        owner_user_id: Option<&str>,
        snapshot_json: &str,
        updated_at: i64,
    ) -> StorageResult<()> {
        let existing: Option<(String,)> = sqlx::query_as("SELECT conversation_id FROM contexts WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;

        if existing.is_some() {
            sqlx::query("UPDATE contexts SET project_id = ?, owner_user_id = ?, snapshot = ?, updated_at = ? WHERE conversation_id = ?")
                .bind(project_id)
                .bind(owner_user_id)
                .bind(snapshot_json)
                .bind(updated_at)
                .bind(conversation_id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("INSERT INTO contexts (conversation_id, project_id, owner_user_id, snapshot, updated_at) VALUES (?, ?, ?, ?, ?)")
                .bind(conversation_id)
                .bind(project_id)
                .bind(owner_user_id)
                .bind(snapshot_json)
                .bind(updated_at)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn load_context(&self, conversation_id: &str) -> StorageResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT snapshot FROM contexts WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(s,)| s))
    }

    pub async fn delete_context(&self, conversation_id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM contexts WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_contexts(&self, project_id: Option<&str>, limit: i64, offset: i64) -> StorageResult<Vec<String>> {
        let rows: Vec<(String,)> = if let Some(project_id) = project_id {
            sqlx::query_as(
                "SELECT snapshot FROM contexts WHERE project_id = ? ORDER BY updated_at DESC LIMIT ? OFFSET ?",
            )
            .bind(project_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as("SELECT snapshot FROM contexts ORDER BY updated_at DESC LIMIT ? OFFSET ?")
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
        };
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    // ---- Message -----------------------------------------------------

    pub async fn add_message(&self, conversation_id: &str, role: Role, content: &str, timestamp: i64) -> StorageResult<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO messages (id, conversation_id, role, content, timestamp) VALUES (?, ?, ?, ?, ?)")
            .bind(&id)
            .bind(conversation_id)
            .bind(role.as_str())
            .bind(content)
            .bind(timestamp)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn get_messages(&self, conversation_id: &str, limit: Option<i64>, offset: i64) -> StorageResult<Vec<Message>> {
        let limit = limit.unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT role, content, timestamp FROM messages WHERE conversation_id = ? ORDER BY timestamp ASC LIMIT ? OFFSET ?",
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let role_str: String = row.try_get("role")?;
                let role: Role = role_str.parse().map_err(StorageError::Database)?;
                Ok(Message { role, content: row.try_get("content")?, timestamp: row.try_get("timestamp")? })
            })
            .collect()
    }

    // ---- Users / API keys ---------------------------------------------

    pub async fn create_user(&self, username: &str, email: Option<&str>, password_hash: Option<&str>, role: UserRole) -> StorageResult<User> {
        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(StorageError::Conflict(format!("username '{username}' already taken")));
        }

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp();
        sqlx::query("INSERT INTO users (id, username, email, password_hash, role, api_key_hash, created_at) VALUES (?, ?, ?, ?, ?, NULL, ?)")
            .bind(&id)
            .bind(username)
            .bind(email)
            .bind(password_hash)
            .bind(role.as_str())
            .bind(created_at)
            .execute(&self.pool)
            .await?;

        Ok(User { id, username: username.to_string(), email: email.map(String::from), password_hash: password_hash.map(String::from), role, api_key_hash: None, created_at })
    }

    fn user_from_row(row: sqlx::any::AnyRow) -> StorageResult<User> {
        let role_str: String = row.try_get("role")?;
        Ok(User {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            role: role_str.parse().map_err(StorageError::Database)?,
            api_key_hash: row.try_get("api_key_hash")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn get_user_by_id(&self, id: &str) -> StorageResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?").bind(id).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(Self::user_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user_by_username(&self, username: &str) -> StorageResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?").bind(username).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(Self::user_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Looks up both the legacy per-user `api_key_hash` column and the
    /// `api_keys` table, honoring revocation and expiry on the latter.
    pub async fn get_user_by_api_key_hash(&self, key_hash: &str) -> StorageResult<Option<User>> {
        if let Some(row) = sqlx::query("SELECT * FROM users WHERE api_key_hash = ?").bind(key_hash).fetch_optional(&self.pool).await? {
            return Ok(Some(Self::user_from_row(row)?));
        }

        let now = Utc::now().timestamp();
        let row = sqlx::query(
            "SELECT u.* FROM users u JOIN api_keys k ON k.user_id = u.id
             WHERE k.key_hash = ? AND k.revoked_at IS NULL AND (k.expires_at IS NULL OR k.expires_at > ?)",
        )
        .bind(key_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::user_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub async fn create_api_key(&self, user_id: &str, key_hash: &str, name: Option<&str>, expires_at: Option<i64>) -> StorageResult<ApiKey> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp();
        sqlx::query("INSERT INTO api_keys (id, user_id, key_hash, name, expires_at, created_at, revoked_at) VALUES (?, ?, ?, ?, ?, ?, NULL)")
            .bind(&id)
            .bind(user_id)
            .bind(key_hash)
            .bind(name)
            .bind(expires_at)
            .bind(created_at)
            .execute(&self.pool)
            .await?;
        Ok(ApiKey { id, user_id: user_id.to_string(), key_hash: key_hash.to_string(), name: name.map(String::from), expires_at, created_at, revoked_at: None })
    }

    pub async fn revoke_api_key(&self, key_id: &str) -> StorageResult<()> {
        let result = sqlx::query("UPDATE api_keys SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(Utc::now().timestamp())
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    pub async fn list_api_keys(&self, user_id: &str) -> StorageResult<Vec<ApiKey>> {
        let rows = sqlx::query("SELECT * FROM api_keys WHERE user_id = ? ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(ApiKey {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    key_hash: row.try_get("key_hash")?,
                    name: row.try_get("name")?,
                    expires_at: row.try_get("expires_at")?,
                    created_at: row.try_get("created_at")?,
                    revoked_at: row.try_get("revoked_at")?,
                })
            })
            .collect()
    }

    // ---- Audit ---------------------------------------------------------

    pub async fn log_audit_event(&self, event: &AuditEvent) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO audit_logs (id, event_type, user_id, resource_type, resource_id, ip, user_agent, details, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(event.event_type.as_str())
        .bind(&event.user_id)
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(event.details.to_string())
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_audit_logs(&self, user_id: Option<&str>, event_type: Option<AuditEventType>, limit: i64, offset: i64) -> StorageResult<Vec<AuditEvent>> {
        let rows = match (user_id, event_type) {
            (Some(u), Some(t)) => sqlx::query("SELECT * FROM audit_logs WHERE user_id = ? AND event_type = ? ORDER BY created_at DESC LIMIT ? OFFSET ?")
                .bind(u).bind(t.as_str()).bind(limit).bind(offset).fetch_all(&self.pool).await?,
            (Some(u), None) => sqlx::query("SELECT * FROM audit_logs WHERE user_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?")
                .bind(u).bind(limit).bind(offset).fetch_all(&self.pool).await?,
            (None, Some(t)) => sqlx::query("SELECT * FROM audit_logs WHERE event_type = ? ORDER BY created_at DESC LIMIT ? OFFSET ?")
                .bind(t.as_str()).bind(limit).bind(offset).fetch_all(&self.pool).await?,
            (None, None) => sqlx::query("SELECT * FROM audit_logs ORDER BY created_at DESC LIMIT ? OFFSET ?")
                .bind(limit).bind(offset).fetch_all(&self.pool).await?,
        };

        rows.into_iter()
            .map(|row| {
                let type_str: String = row.try_get("event_type")?;
                let details_str: String = row.try_get("details")?;
                Ok(AuditEvent {
                    id: row.try_get("id")?,
                    event_type: parse_event_type(&type_str).ok_or_else(|| StorageError::Database(format!("unknown event type {type_str}")))?,
                    user_id: row.try_get("user_id")?,
                    resource_type: row.try_get("resource_type")?,
                    resource_id: row.try_get("resource_id")?,
                    ip: row.try_get("ip")?,
                    user_agent: row.try_get("user_agent")?,
                    details: serde_json::from_str(&details_str).unwrap_or(serde_json::Value::Null),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    // ---- Cost -----------------------------------------------------------

    pub async fn record_cost(&self, record: &CostRecord) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO cost_records (id, tool, model, input_tokens, output_tokens, cost_micros, conversation_id, project_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.tool)
        .bind(&record.model)
        .bind(record.input_tokens)
        .bind(record.output_tokens)
        .bind(record.cost_micros)
        .bind(&record.conversation_id)
        .bind(&record.project_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_costs(&self, start: Option<i64>, end: Option<i64>, tool: Option<&str>, project_id: Option<&str>) -> StorageResult<Vec<CostRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM cost_records
             WHERE (? IS NULL OR created_at >= ?)
               AND (? IS NULL OR created_at <= ?)
               AND (? IS NULL OR tool = ?)
               AND (? IS NULL OR project_id = ?)
             ORDER BY created_at DESC",
        )
        .bind(start).bind(start)
        .bind(end).bind(end)
        .bind(tool).bind(tool)
        .bind(project_id).bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CostRecord {
                    id: row.try_get("id")?,
                    tool: row.try_get("tool")?,
                    model: row.try_get("model")?,
                    input_tokens: row.try_get("input_tokens")?,
                    output_tokens: row.try_get("output_tokens")?,
                    cost_micros: row.try_get("cost_micros")?,
                    conversation_id: row.try_get("conversation_id")?,
                    project_id: row.try_get("project_id")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

fn parse_event_type(s: &str) -> Option<AuditEventType> {
    use AuditEventType::*;
    Some(match s {
        "auth.success" => AuthSuccess,
        "auth.failure" => AuthFailure,
        "auth.logout" => AuthLogout,
        "permission.denied" => PermissionDenied,
        "resource.access" => ResourceAccess,
        "resource.create" => ResourceCreate,
        "resource.update" => ResourceUpdate,
        "resource.delete" => ResourceDelete,
        "config.change" => ConfigChange,
        "admin.action" => AdminAction,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_storage;

    #[tokio::test]
    async fn context_save_and_load_round_trips() {
        let storage = test_storage().await;
        storage.save_context("c1", Some("proj"), None, "{\"hello\":true}", 100).await.unwrap();
        let loaded = storage.load_context("c1").await.unwrap();
        assert_eq!(loaded, Some("{\"hello\":true}".to_string()));
    }

    #[tokio::test]
    async fn save_context_upserts() {
        let storage = test_storage().await;
        storage.save_context("c1", None, None, "v1", 1).await.unwrap();
        storage.save_context("c1", None, None, "v2", 2).await.unwrap();
        assert_eq!(storage.load_context("c1").await.unwrap(), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn messages_ordered_ascending_by_timestamp() {
        let storage = test_storage().await;
        storage.add_message("c1", Role::User, "first", 10).await.unwrap();
        storage.add_message("c1", Role::Assistant, "second", 20).await.unwrap();
        let messages = storage.get_messages("c1", None, 0).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let storage = test_storage().await;
        storage.create_user("alice", None, None, UserRole::User).await.unwrap();
        let result = storage.create_user("alice", None, None, UserRole::User).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn api_key_lookup_honors_revocation() {
        let storage = test_storage().await;
        let user = storage.create_user("bob", None, None, UserRole::User).await.unwrap();
        let key = storage.create_api_key(&user.id, "hash123", None, None).await.unwrap();
        assert!(storage.get_user_by_api_key_hash("hash123").await.unwrap().is_some());

        storage.revoke_api_key(&key.id).await.unwrap();
        assert!(storage.get_user_by_api_key_hash("hash123").await.unwrap().is_none());
    }
}
