use rebate_types::TypeError;
use sqlx::PgPool;

use crate::error::map_sqlx_err;

pub async fn set(pool: &PgPool, broker_id: &str, property: &str, value: &str) -> Result<(), TypeError> {
    sqlx::query(
        "INSERT INTO referral_settings (property, broker_id, value)
         VALUES ($1, $2, $3)
         ON CONFLICT (property, broker_id) DO UPDATE SET value = EXCLUDED.value",
    )
    .bind(property)
    .bind(broker_id)
    .bind(value)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;
    Ok(())
}

pub async fn get(pool: &PgPool, broker_id: &str, property: &str) -> Result<Option<String>, TypeError> {
    sqlx::query_scalar("SELECT value FROM referral_settings WHERE property = $1 AND broker_id = $2")
        .bind(property)
        .bind(broker_id)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx_err)
}

/// §11 `SettingsToDB`: idempotently upserts the two config-derived settings
/// the original bootstraps on every startup.
pub async fn bootstrap_on_startup(
    pool: &PgPool,
    broker_id: &str,
    payment_max_lookback_days: u32,
    broker_addr: &str,
) -> Result<(), TypeError> {
    set(pool, broker_id, "payment_max_lookback_days", &payment_max_lookback_days.to_string()).await?;
    set(pool, broker_id, "broker_addr", broker_addr).await?;
    Ok(())
}

/// The batch state machine's two distinguished keys (§4.2): the currently
/// open batch's timestamp and whether its critical section has finished.
pub async fn batch_state(
    pool: &PgPool,
    broker_id: &str,
) -> Result<(Option<String>, bool), TypeError> {
    let batch_ts = get(pool, broker_id, "batch_timestamp").await?;
    let finished = get(pool, broker_id, "batch_finished")
        .await?
        .map(|v| v == "true")
        .unwrap_or(true);
    Ok((batch_ts, finished))
}
