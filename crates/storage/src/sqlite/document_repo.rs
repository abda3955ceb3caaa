use async_trait::async_trait;
use chrono::Utc;
use quant_core::model::{UserId, deep_merge_into};
use serde_json::{Map, Value};
use sqlx::Row;

use super::SqliteRepository;
use crate::repository::{DocumentStore, StorageError};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn decode_body(raw: &str) -> Result<Map<String, Value>, StorageError> {
    match serde_json::from_str::<Value>(raw).map_err(ser)? {
        Value::Object(map) => Ok(map),
        other => Err(StorageError::Serialization(format!(
            "document body is not an object: {other}"
        ))),
    }
}

#[async_trait]
impl DocumentStore for SqliteRepository {
    async fn read_document(
        &self,
        user: &UserId,
    ) -> Result<Option<Map<String, Value>>, StorageError> {
        let row = sqlx::query("SELECT body FROM user_documents WHERE user_id = ?1")
            .bind(user.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let body: String = row.try_get("body").map_err(ser)?;
        decode_body(&body).map(Some)
    }

    async fn merge_write(
        &self,
        user: &UserId,
        partial: Map<String, Value>,
    ) -> Result<(), StorageError> {
        // Read, merge and write back within a single transaction.
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let row = sqlx::query("SELECT body FROM user_documents WHERE user_id = ?1")
            .bind(user.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;

        let mut document = match row {
            Some(row) => decode_body(&row.try_get::<String, _>("body").map_err(ser)?)?,
            None => Map::new(),
        };
        deep_merge_into(&mut document, &partial);
        let body = serde_json::to_string(&Value::Object(document)).map_err(ser)?;
        let now = Utc::now();

        sqlx::query(
            r"
            INSERT INTO user_documents (user_id, body, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user.as_str())
        .bind(body)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}
