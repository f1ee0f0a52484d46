use chrono::{DateTime, Utc};
use rebate_types::TypeError;
use sqlx::PgPool;

use crate::error::map_sqlx_err;
use crate::models::ReferralCodeRow;

/// Fetches a code's row, if present and unexpired at `now`.
pub async fn get_unexpired(
    pool: &PgPool,
    broker_id: &str,
    code: &str,
    now: DateTime<Utc>,
) -> Result<Option<ReferralCodeRow>, TypeError> {
    sqlx::query_as::<_, ReferralCodeRow>(
        "SELECT code, broker_id, referrer_addr, trader_rebate_perc, created_on, expiry
         FROM referral_code
         WHERE code = $1 AND broker_id = $2 AND (expiry IS NULL OR expiry > $3)",
    )
    .bind(code)
    .bind(broker_id)
    .bind(now)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_err)
}

pub async fn get(
    pool: &PgPool,
    broker_id: &str,
    code: &str,
) -> Result<Option<ReferralCodeRow>, TypeError> {
    sqlx::query_as::<_, ReferralCodeRow>(
        "SELECT code, broker_id, referrer_addr, trader_rebate_perc, created_on, expiry
         FROM referral_code WHERE code = $1 AND broker_id = $2",
    )
    .bind(code)
    .bind(broker_id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_err)
}

/// Every code for `broker_id`, used to rebuild the in-memory code registry
/// at startup. Expired codes are included: expiry only gates `select_code`,
/// not a code's continued use for chain resolution in already-open batches.
pub async fn all_codes(pool: &PgPool, broker_id: &str) -> Result<Vec<ReferralCodeRow>, TypeError> {
    sqlx::query_as::<_, ReferralCodeRow>(
        "SELECT code, broker_id, referrer_addr, trader_rebate_perc, created_on, expiry
         FROM referral_code WHERE broker_id = $1",
    )
    .bind(broker_id)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)
}

/// Inserts a new code. Callers must have already verified the code doesn't
/// exist (§4.1 `upsert_code`'s insert branch).
pub async fn insert(
    pool: &PgPool,
    broker_id: &str,
    code: &str,
    referrer_addr: &str,
    trader_rebate_perc: i32,
    expiry: Option<DateTime<Utc>>,
) -> Result<(), TypeError> {
    sqlx::query(
        "INSERT INTO referral_code (code, broker_id, referrer_addr, trader_rebate_perc, expiry)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(code)
    .bind(broker_id)
    .bind(referrer_addr)
    .bind(trader_rebate_perc)
    .bind(expiry)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;
    Ok(())
}

/// Updates only `trader_rebate_perc`, the one mutable field per §4.1.
pub async fn update_trader_rebate_perc(
    pool: &PgPool,
    broker_id: &str,
    code: &str,
    trader_rebate_perc: i32,
) -> Result<(), TypeError> {
    sqlx::query(
        "UPDATE referral_code SET trader_rebate_perc = $1
         WHERE code = $2 AND broker_id = $3",
    )
    .bind(trader_rebate_perc)
    .bind(code)
    .bind(broker_id)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;
    Ok(())
}
