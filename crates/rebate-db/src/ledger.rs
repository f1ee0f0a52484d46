use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use rebate_types::TypeError;
use sqlx::PgPool;

use crate::error::map_sqlx_err;

/// Inserts a row fresh from a submitted batch, `tx_confirmed = false`
/// (§4.2 `pay_batch` step 7).
#[allow(clippy::too_many_arguments)]
pub async fn insert_unconfirmed(
    pool: &PgPool,
    broker_id: &str,
    trader_addr: &str,
    payee_addr: &str,
    code: &str,
    level: i32,
    pool_id: i32,
    batch_ts: DateTime<Utc>,
    paid_amount_cc: BigDecimal,
    tx_hash: &str,
) -> Result<(), TypeError> {
    sqlx::query(
        "INSERT INTO referral_payment
            (trader_addr, payee_addr, code, level, pool_id, batch_ts, broker_id, paid_amount_cc, tx_hash, tx_confirmed)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, false)",
    )
    .bind(trader_addr)
    .bind(payee_addr)
    .bind(code)
    .bind(level)
    .bind(pool_id)
    .bind(batch_ts)
    .bind(broker_id)
    .bind(paid_amount_cc)
    .bind(tx_hash)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;
    Ok(())
}

/// The reconciliation upsert (§4.4 step 4): looks up the row by its key,
/// inserts a fully-formed confirmed row if missing, flips an existing
/// unconfirmed row to confirmed, or no-ops if already confirmed.
#[allow(clippy::too_many_arguments)]
pub async fn reconcile_row(
    pool: &PgPool,
    broker_id: &str,
    trader_addr: &str,
    payee_addr: &str,
    code: &str,
    level: i32,
    pool_id: i32,
    batch_ts: DateTime<Utc>,
    paid_amount_cc: BigDecimal,
    tx_hash: &str,
    block_nr: i64,
    block_ts: DateTime<Utc>,
) -> Result<(), TypeError> {
    let existing: Option<(bool,)> = sqlx::query_as(
        "SELECT tx_confirmed FROM referral_payment
         WHERE trader_addr = $1 AND payee_addr = $2 AND pool_id = $3 AND batch_ts = $4
           AND level = $5 AND broker_id = $6",
    )
    .bind(trader_addr)
    .bind(payee_addr)
    .bind(pool_id)
    .bind(batch_ts)
    .bind(level)
    .bind(broker_id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_err)?;

    match existing {
        None => {
            sqlx::query(
                "INSERT INTO referral_payment
                    (trader_addr, payee_addr, code, level, pool_id, batch_ts, broker_id,
                     paid_amount_cc, tx_hash, block_nr, block_ts, tx_confirmed)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, true)",
            )
            .bind(trader_addr)
            .bind(payee_addr)
            .bind(code)
            .bind(level)
            .bind(pool_id)
            .bind(batch_ts)
            .bind(broker_id)
            .bind(paid_amount_cc)
            .bind(tx_hash)
            .bind(block_nr)
            .bind(block_ts)
            .execute(pool)
            .await
            .map_err(map_sqlx_err)?;
        }
        Some((false,)) => {
            sqlx::query(
                "UPDATE referral_payment SET tx_confirmed = true, block_nr = $1, block_ts = $2
                 WHERE trader_addr = $3 AND payee_addr = $4 AND pool_id = $5 AND batch_ts = $6
                   AND level = $7 AND broker_id = $8",
            )
            .bind(block_nr)
            .bind(block_ts)
            .bind(trader_addr)
            .bind(payee_addr)
            .bind(pool_id)
            .bind(batch_ts)
            .bind(level)
            .bind(broker_id)
            .execute(pool)
            .await
            .map_err(map_sqlx_err)?;
        }
        Some((true,)) => {}
    }
    Ok(())
}

/// Distinct `tx_hash`es still unconfirmed in the latest batch, per §4.8
/// step 1 of the confirmation sweep.
pub async fn unconfirmed_tx_hashes_for_latest_batch(
    pool: &PgPool,
    broker_id: &str,
) -> Result<Vec<String>, TypeError> {
    sqlx::query_scalar(
        "SELECT DISTINCT tx_hash FROM referral_payment
         WHERE broker_id = $1 AND tx_confirmed = false
           AND batch_ts = (SELECT max(batch_ts) FROM referral_payment WHERE broker_id = $1)",
    )
    .bind(broker_id)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)
}

pub async fn mark_confirmed(pool: &PgPool, broker_id: &str, tx_hash: &str) -> Result<(), TypeError> {
    sqlx::query("UPDATE referral_payment SET tx_confirmed = true WHERE broker_id = $1 AND tx_hash = $2")
        .bind(broker_id)
        .bind(tx_hash)
        .execute(pool)
        .await
        .map_err(map_sqlx_err)?;
    Ok(())
}

/// Moves every unconfirmed row with this `tx_hash` into quarantine, per
/// §4.8 step 3 (both the `FAILED` and aged-out `NOT_FOUND` cases).
pub async fn quarantine(pool: &PgPool, broker_id: &str, tx_hash: &str) -> Result<(), TypeError> {
    let mut tx = pool.begin().await.map_err(map_sqlx_err)?;

    sqlx::query(
        "INSERT INTO referral_failed_payment
            (trader_addr, payee_addr, code, level, pool_id, batch_ts, broker_id,
             paid_amount_cc, tx_hash, block_nr, block_ts)
         SELECT trader_addr, payee_addr, code, level, pool_id, batch_ts, broker_id,
                paid_amount_cc, tx_hash, block_nr, block_ts
         FROM referral_payment
         WHERE broker_id = $1 AND tx_hash = $2 AND tx_confirmed = false",
    )
    .bind(broker_id)
    .bind(tx_hash)
    .execute(&mut *tx)
    .await
    .map_err(map_sqlx_err)?;

    sqlx::query("DELETE FROM referral_payment WHERE broker_id = $1 AND tx_hash = $2 AND tx_confirmed = false")
        .bind(broker_id)
        .bind(tx_hash)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

    tx.commit().await.map_err(map_sqlx_err)
}

pub async fn batch_ts_of_tx(
    pool: &PgPool,
    broker_id: &str,
    tx_hash: &str,
) -> Result<Option<DateTime<Utc>>, TypeError> {
    sqlx::query_scalar(
        "SELECT batch_ts FROM referral_payment WHERE broker_id = $1 AND tx_hash = $2 LIMIT 1",
    )
    .bind(broker_id)
    .bind(tx_hash)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_err)
}
