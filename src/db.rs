use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::info;

use crate::error::StoreError;
use crate::models::{HttpMethod, OutgoingRequest, PendingRequest};

pub async fn init_db_pool(database_url: &str) -> Result<Pool<Sqlite>, StoreError> {
    info!("Initializing database connection pool");
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

pub async fn get_value(pool: &Pool<Sqlite>, key: &str) -> Result<Option<String>, StoreError> {
    let row = sqlx::query("SELECT value FROM key_value WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.get("value")))
}

pub async fn put_value(pool: &Pool<Sqlite>, key: &str, value: &str) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO key_value (key, value, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn insert_pending_request(
    pool: &Pool<Sqlite>,
    request: &OutgoingRequest,
) -> Result<i64, StoreError> {
    let body = request
        .body
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO pending_requests (endpoint, method, body, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&request.endpoint)
    .bind(request.method.as_str())
    .bind(body)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// All queued requests, oldest first.
pub async fn get_pending_requests(pool: &Pool<Sqlite>) -> Result<Vec<PendingRequest>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, endpoint, method, body, created_at
        FROM pending_requests
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let method: String = row.try_get("method")?;
            let method = HttpMethod::from_str(&method)
                .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
            let created_at: DateTime<Utc> = row.try_get("created_at")?;
            Ok(PendingRequest {
                id: row.try_get("id")?,
                endpoint: row.try_get("endpoint")?,
                method,
                body: row.try_get("body")?,
                created_at,
            })
        })
        .collect()
}

pub async fn delete_pending_request(pool: &Pool<Sqlite>, id: i64) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM pending_requests WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count_pending_requests(pool: &Pool<Sqlite>) -> Result<i64, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS pending FROM pending_requests")
        .fetch_one(pool)
        .await?;

    Ok(row.try_get("pending")?)
}

#[cfg(test)]
pub async fn init_memory_pool() -> Pool<Sqlite> {
    // A single connection that never recycles, otherwise the in-memory
    // database disappears with it.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post(endpoint: &str, body: serde_json::Value) -> OutgoingRequest {
        OutgoingRequest {
            endpoint: endpoint.to_string(),
            method: HttpMethod::Post,
            body: Some(body),
        }
    }

    #[tokio::test]
    async fn test_key_value_roundtrip_and_overwrite() {
        let pool = init_memory_pool().await;

        assert_eq!(get_value(&pool, "missing").await.unwrap(), None);

        put_value(&pool, "k", "one").await.unwrap();
        put_value(&pool, "k", "two").await.unwrap();
        assert_eq!(get_value(&pool, "k").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_pending_requests_listed_oldest_first() {
        let pool = init_memory_pool().await;

        let first = insert_pending_request(&pool, &post("/feelings", json!({"mood": 3})))
            .await
            .unwrap();
        let second = insert_pending_request(
            &pool,
            &OutgoingRequest {
                endpoint: "/goals/7".to_string(),
                method: HttpMethod::Delete,
                body: None,
            },
        )
        .await
        .unwrap();
        assert!(second > first);

        let pending = get_pending_requests(&pool).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[0].method, HttpMethod::Post);
        assert_eq!(
            pending[0].to_outgoing().unwrap().body,
            Some(json!({"mood": 3}))
        );
        assert_eq!(pending[1].endpoint, "/goals/7");
        assert_eq!(pending[1].body, None);
    }

    #[tokio::test]
    async fn test_delete_pending_request() {
        let pool = init_memory_pool().await;
        let id = insert_pending_request(&pool, &post("/journal", json!({"text": "hi"})))
            .await
            .unwrap();

        assert!(delete_pending_request(&pool, id).await.unwrap());
        assert!(!delete_pending_request(&pool, id).await.unwrap());
        assert_eq!(count_pending_requests(&pool).await.unwrap(), 0);
    }
}
