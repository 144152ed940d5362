use log::info;
use sqlx::{PgPool, Row};

/// Default connection string when `DATABASE_URL` is not set.
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/campsite_tracker";

/// Creates a connection pool to the PostgreSQL database at `database_url`.
pub async fn create_connection_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPool::connect(database_url).await
}

/// Tests the database connection by executing a simple query.
pub async fn test_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    let row = sqlx::query("SELECT 1 as test").fetch_one(pool).await?;

    let test_value: i32 = row.get("test");
    info!("Database connection successful (test value: {})", test_value);

    Ok(())
}
