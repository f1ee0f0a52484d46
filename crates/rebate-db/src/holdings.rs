use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use rebate_types::TypeError;
use sqlx::PgPool;

use crate::error::map_sqlx_err;
use crate::models::{CutTierRow, TokenHoldingsRow};

pub async fn get(
    pool: &PgPool,
    broker_id: &str,
    referrer_addr: &str,
    token_addr: &str,
) -> Result<Option<TokenHoldingsRow>, TypeError> {
    sqlx::query_as::<_, TokenHoldingsRow>(
        "SELECT referrer_addr, token_addr, broker_id, holding_amount_dec_n, last_updated
         FROM referral_token_holdings
         WHERE referrer_addr = $1 AND token_addr = $2 AND broker_id = $3",
    )
    .bind(referrer_addr)
    .bind(token_addr)
    .bind(broker_id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_err)
}

/// Refreshes a referrer's cached balance, per §3's
/// `REFERRER_TOKENX_BAL_FREQ_H`-gated refresh.
pub async fn upsert(
    pool: &PgPool,
    broker_id: &str,
    referrer_addr: &str,
    token_addr: &str,
    holding_amount_dec_n: BigDecimal,
    now: DateTime<Utc>,
) -> Result<(), TypeError> {
    sqlx::query(
        "INSERT INTO referral_token_holdings (referrer_addr, token_addr, broker_id, holding_amount_dec_n, last_updated)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (referrer_addr, token_addr, broker_id)
         DO UPDATE SET holding_amount_dec_n = EXCLUDED.holding_amount_dec_n, last_updated = EXCLUDED.last_updated",
    )
    .bind(referrer_addr)
    .bind(token_addr)
    .bind(broker_id)
    .bind(holding_amount_dec_n)
    .bind(now)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;
    Ok(())
}

/// All cut tiers for a token, ascending by threshold — the caller picks the
/// highest tier whose threshold the referrer's balance clears.
pub async fn cut_tiers(
    pool: &PgPool,
    broker_id: &str,
    token_addr: &str,
) -> Result<Vec<CutTierRow>, TypeError> {
    sqlx::query_as::<_, CutTierRow>(
        "SELECT broker_id, token_addr, holding_amount_dec_n, cut_perc
         FROM referral_cut_tier
         WHERE broker_id = $1 AND token_addr = $2
         ORDER BY holding_amount_dec_n ASC",
    )
    .bind(broker_id)
    .bind(token_addr)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)
}
