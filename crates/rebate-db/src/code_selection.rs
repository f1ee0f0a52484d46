use chrono::{DateTime, Utc};
use rebate_types::TypeError;
use sqlx::PgPool;

use crate::error::map_sqlx_err;
use crate::models::CodeSelectionRow;

/// The trader's currently valid selection, if any (`valid_from <= now < valid_to`).
pub async fn current(
    pool: &PgPool,
    broker_id: &str,
    trader_addr: &str,
    now: DateTime<Utc>,
) -> Result<Option<CodeSelectionRow>, TypeError> {
    sqlx::query_as::<_, CodeSelectionRow>(
        "SELECT trader_addr, code, broker_id, valid_from, valid_to
         FROM referral_code_selection
         WHERE trader_addr = $1 AND broker_id = $2 AND valid_from <= $3 AND valid_to > $3",
    )
    .bind(trader_addr)
    .bind(broker_id)
    .bind(now)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_err)
}

/// Closes the trader's open selection (if any) and inserts a new one,
/// matching §4.1 `select_code`'s close-then-insert semantics.
pub async fn switch(
    pool: &PgPool,
    broker_id: &str,
    trader_addr: &str,
    new_code: &str,
    now: DateTime<Utc>,
) -> Result<(), TypeError> {
    let mut tx = pool.begin().await.map_err(map_sqlx_err)?;

    sqlx::query(
        "UPDATE referral_code_selection SET valid_to = $1
         WHERE trader_addr = $2 AND broker_id = $3 AND valid_from <= $1 AND valid_to > $1",
    )
    .bind(now)
    .bind(trader_addr)
    .bind(broker_id)
    .execute(&mut *tx)
    .await
    .map_err(map_sqlx_err)?;

    sqlx::query(
        "INSERT INTO referral_code_selection (trader_addr, code, broker_id, valid_from)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(trader_addr)
    .bind(new_code)
    .bind(broker_id)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(map_sqlx_err)?;

    tx.commit().await.map_err(map_sqlx_err)
}
