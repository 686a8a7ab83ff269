//! Crate-level integration coverage for the storage backend and migration
//! runner against an in-memory SQLite pool, exercising them the way a real
//! binary would: through the public `Storage`/`MigrationRunner` surface
//! rather than any internal test-only helper.

use aigateway::config::DbType;
use aigateway::models::{AuditEventType, CostRecord, Role, UserRole};
use aigateway::storage::migrations::runner;
use aigateway::storage::{Storage, StorageError};
use sqlx::any::{install_default_drivers, AnyPoolOptions};

async fn fresh_storage() -> Storage {
    install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite pool");
    Storage { pool, db_type: DbType::Sqlite }
}

#[tokio::test]
async fn migrate_up_creates_dense_version_rows() {
    let storage = fresh_storage().await;
    runner(DbType::Sqlite).migrate_up(&storage.pool, None).await.expect("migrate up");

    let status = runner(DbType::Sqlite).status(&storage.pool).await.expect("status");
    assert_eq!(status.len(), 4);
    assert!(status.iter().all(|s| s.applied));
    let versions: Vec<i64> = status.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn migrate_down_then_up_round_trips_schema() {
    let storage = fresh_storage().await;
    let r = runner(DbType::Sqlite);
    r.migrate_up(&storage.pool, None).await.expect("migrate up to latest");

    r.migrate_down(&storage.pool, 2).await.expect("migrate down to 2");
    let status = r.status(&storage.pool).await.expect("status after down");
    assert_eq!(status.iter().filter(|s| s.applied).count(), 2);

    // api_keys (v3) and audit_logs/cost_records (v4) tables should be gone.
    let err = sqlx::query("SELECT * FROM api_keys").fetch_optional(&storage.pool).await;
    assert!(err.is_err());

    r.migrate_up(&storage.pool, None).await.expect("migrate back up");
    let status = r.status(&storage.pool).await.expect("status after re-up");
    assert_eq!(status.iter().filter(|s| s.applied).count(), 4);
    sqlx::query("SELECT * FROM api_keys").fetch_optional(&storage.pool).await.expect("table restored");
}

#[tokio::test]
async fn migrate_up_is_idempotent() {
    let storage = fresh_storage().await;
    let r = runner(DbType::Sqlite);
    r.migrate_up(&storage.pool, None).await.expect("first apply");
    r.migrate_up(&storage.pool, None).await.expect("second apply is a no-op, not an error");
}

#[tokio::test]
async fn validate_reports_no_errors_for_registered_migrations() {
    let r = runner(DbType::Sqlite);
    assert!(r.validate().is_empty());
}

#[tokio::test]
async fn context_save_load_round_trips() {
    let storage = fresh_storage().await;
    storage.initialize().await.expect("initialize");

    storage
        .save_context("conv-1", Some("proj-a"), None, r#"{"messages":[]}"#, 1_000)
        .await
        .expect("save");
    let loaded = storage.load_context("conv-1").await.expect("load").expect("present");
    assert_eq!(loaded, r#"{"messages":[]}"#);

    // A second save upserts rather than duplicating the row.
    storage.save_context("conv-1", Some("proj-a"), None, r#"{"messages":[1]}"#, 2_000).await.expect("re-save");
    let loaded = storage.load_context("conv-1").await.expect("load").expect("present");
    assert_eq!(loaded, r#"{"messages":[1]}"#);

    let listed = storage.list_contexts(Some("proj-a"), 10, 0).await.expect("list");
    assert_eq!(listed.len(), 1);

    storage.delete_context("conv-1").await.expect("delete");
    assert!(storage.load_context("conv-1").await.expect("load after delete").is_none());
}

#[tokio::test]
async fn messages_are_ordered_by_timestamp_ascending() {
    let storage = fresh_storage().await;
    storage.initialize().await.expect("initialize");

    storage.add_message("conv-2", Role::User, "first", 100).await.expect("add");
    storage.add_message("conv-2", Role::Assistant, "second", 200).await.expect("add");
    storage.add_message("conv-2", Role::User, "third", 50).await.expect("add");

    let messages = storage.get_messages("conv-2", None, 0).await.expect("get messages");
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["third", "first", "second"]);
}

#[tokio::test]
async fn duplicate_username_is_a_conflict() {
    let storage = fresh_storage().await;
    storage.initialize().await.expect("initialize");

    storage.create_user("alice", None, None, UserRole::User).await.expect("first create");
    let err = storage.create_user("alice", None, None, UserRole::User).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
}

#[tokio::test]
async fn api_key_validity_honors_revocation_and_expiry() {
    let storage = fresh_storage().await;
    storage.initialize().await.expect("initialize");

    let user = storage.create_user("bob", None, None, UserRole::User).await.expect("create user");
    let key = storage.create_api_key(&user.id, "hash-abc", Some("laptop"), None).await.expect("create key");
    assert!(key.revoked_at.is_none());

    let found = storage.get_user_by_api_key_hash("hash-abc").await.expect("lookup").expect("found");
    assert_eq!(found.id, user.id);

    storage.revoke_api_key(&key.id).await.expect("revoke");
    let keys = storage.list_api_keys(&user.id).await.expect("list");
    assert_eq!(keys.len(), 1);
    assert!(keys[0].revoked_at.is_some());
}

#[tokio::test]
async fn audit_and_cost_records_are_append_only_and_newest_first() {
    let storage = fresh_storage().await;
    storage.initialize().await.expect("initialize");

    let user = storage.create_user("carol", None, None, UserRole::Admin).await.expect("create user");

    let event = aigateway::models::AuditEvent {
        id: uuid::Uuid::new_v4().to_string(),
        event_type: AuditEventType::ResourceAccess,
        user_id: Some(user.id.clone()),
        resource_type: Some("conversation".into()),
        resource_id: Some("conv-9".into()),
        ip: None,
        user_agent: None,
        details: serde_json::json!({}),
        created_at: 1,
    };
    storage.log_audit_event(&event).await.expect("log event");
    let logs = storage.get_audit_logs(Some(&user.id), None, 10, 0).await.expect("get logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].event_type, AuditEventType::ResourceAccess);

    let record = CostRecord {
        id: uuid::Uuid::new_v4().to_string(),
        tool: "claude".into(),
        model: "claude-3".into(),
        input_tokens: 100,
        output_tokens: 50,
        cost_micros: 1_500,
        conversation_id: Some("conv-9".into()),
        project_id: None,
        created_at: 2,
    };
    storage.record_cost(&record).await.expect("record cost");
    let costs = storage.get_costs(None, None, Some("claude"), None).await.expect("get costs");
    assert_eq!(costs.len(), 1);
    assert_eq!(costs[0].cost_usd(), 0.0015);
}
