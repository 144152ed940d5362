use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use trip_services::{Collection, RecordStore, StoreError};

/// Record store keeping every collection in a single JSONB table.
///
/// Each document is one row, so single-document writes are atomic while a
/// procedure spanning collections is not.
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Creates a new instance of `PgRecordStore` with the provided connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the `records` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                body JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (collection, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(())
    }
}

fn persistence(e: sqlx::Error) -> StoreError {
    StoreError::Persistence(e.to_string())
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT body FROM records WHERE collection = $1 AND key = $2")
            .bind(collection.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;

        row.map(|row| row.try_get("body").map_err(persistence))
            .transpose()
    }

    async fn put(
        &self,
        collection: Collection,
        key: &str,
        document: Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO records (collection, key, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, key)
            DO UPDATE SET body = EXCLUDED.body, updated_at = NOW()
            "#,
        )
        .bind(collection.as_str())
        .bind(key)
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM records WHERE collection = $1 AND key = $2")
            .bind(collection.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;

        Ok(())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let rows = sqlx::query("SELECT body FROM records WHERE collection = $1 ORDER BY key")
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;

        rows.iter()
            .map(|row| row.try_get("body").map_err(persistence))
            .collect()
    }
}
