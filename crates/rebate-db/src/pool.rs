use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::map_sqlx_err;
use rebate_types::TypeError;

/// Opens the history-database connection pool. A single pool is shared
/// across the process and kept open for its lifetime, per the original
/// `database/sql` handle's documented usage.
pub async fn connect(database_url: &str) -> Result<PgPool, TypeError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(map_sqlx_err)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), TypeError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| TypeError::Fatal(e.to_string()))
}
