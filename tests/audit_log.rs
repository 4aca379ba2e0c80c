use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use taskscope::authz::GlobalRole;
use taskscope::events::{chain_hash, persist_record, AuditRecord};

mod common;
use common::{send, test_app, test_pool, token};

async fn wait_for_rows(pool: &SqlitePool, expected: i64) -> Result<i64> {
    let mut count = 0;
    for _ in 0..50 {
        count = sqlx::query_scalar("SELECT COUNT(*) FROM activity_log").fetch_one(pool).await?;
        if count >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(count)
}

#[tokio::test]
async fn mutations_reach_activity_log() -> Result<()> {
    let (_dir, pool, app) = test_app().await?;
    let owner = token(Uuid::new_v4(), GlobalRole::User);

    let (status, project) = send(&app, "POST", "/projects", Some(&owner), Some(json!({ "name": "Audited" }))).await?;
    assert_eq!(status, StatusCode::CREATED);
    let project_id = project["id"].as_str().unwrap_or_default().to_string();

    let (_, task) = send(&app, "POST", &format!("/projects/{project_id}/tasks"), Some(&owner), Some(json!({ "title": "t" }))).await?;
    let task_id = task["id"].as_str().unwrap_or_default().to_string();
    send(&app, "PUT", &format!("/tasks/{task_id}/status"), Some(&owner), Some(json!({ "status": "REVIEW" }))).await?;

    assert_eq!(wait_for_rows(&pool, 3).await?, 3);

    let row = sqlx::query("SELECT before_state, after_state, severity FROM activity_log WHERE event_name = 'task.status_changed'")
        .fetch_one(&pool)
        .await?;
    let before: String = row.try_get("before_state")?;
    let after: String = row.try_get("after_state")?;
    assert_eq!(serde_json::from_str::<serde_json::Value>(&before)?["status"], "TODO");
    assert_eq!(serde_json::from_str::<serde_json::Value>(&after)?["status"], "REVIEW");

    let severity: String = sqlx::query_scalar("SELECT severity FROM activity_log WHERE event_name = 'project.created'")
        .fetch_one(&pool)
        .await?;
    assert_eq!(severity, "critical");

    Ok(())
}

#[tokio::test]
async fn event_store_is_hash_chained() -> Result<()> {
    let (_dir, pool) = test_pool().await?;
    let actor = Uuid::new_v4();

    for action in ["created", "updated", "deleted"] {
        persist_record(&pool, &AuditRecord::new(actor, "task", Uuid::new_v4(), action)).await?;
    }

    let rows = sqlx::query("SELECT payload, prev_hash, hash FROM event_store ORDER BY seq")
        .fetch_all(&pool)
        .await?;
    assert_eq!(rows.len(), 3);

    let mut prev: Option<String> = None;
    for row in rows {
        let payload: String = row.try_get("payload")?;
        let prev_hash: Option<String> = row.try_get("prev_hash")?;
        let hash: String = row.try_get("hash")?;

        assert_eq!(prev_hash, prev);
        assert_eq!(hash, chain_hash(prev.as_deref(), &payload));
        prev = Some(hash);
    }

    Ok(())
}
