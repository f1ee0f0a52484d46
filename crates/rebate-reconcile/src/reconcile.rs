use std::collections::HashMap;

use alloy_primitives::Address;
use alloy_provider::Provider;
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use rebate_chain::{find_block_with_ts, BlockTimeSource, PaymentLog, ProviderBlockSource};
use rebate_db::ledger;
use sqlx::PgPool;
use tracing::{instrument, warn};

use crate::error::ReconcileError;

const INITIAL_WINDOW: u64 = 32_768;
const MAX_WINDOW_RETRIES: u32 = 7;
const WINDOW_RETRY_WAIT_SECS: u64 = 5;
const TIMESTAMP_PROXY_SLACK_SECS: i64 = 300;

/// Walks the multi-pay event log from `start_ts` to the chain head and
/// upserts every decoded event into the ledger (§4.4), shrinking the scan
/// window on RPC error rather than failing the whole sweep.
#[instrument(skip(provider, pool))]
pub async fn save_payments<P: Provider + Sync>(
    provider: &P,
    pool: &PgPool,
    broker_id: &str,
    multipay: Address,
    lookback_days: u32,
    batch_ts: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), ReconcileError> {
    let start_ts = now.timestamp() - i64::from(lookback_days) * 86_400;
    let source = ProviderBlockSource(provider);
    let (start_block, _) = find_block_with_ts(&source, start_ts.max(0) as u64).await?;
    let (head_block, _) = source.head().await?;

    let mut block_ts_cache: HashMap<u64, DateTime<Utc>> = HashMap::new();
    let mut from_block = start_block;
    let window = INITIAL_WINDOW;

    while from_block <= head_block {
        let to_block = (from_block + window).min(head_block);
        let logs = match fetch_window(provider, multipay, from_block, to_block, window).await {
            Some(logs) => logs,
            None => {
                return Err(ReconcileError::Transient(format!(
                    "could not fetch Payment logs for blocks {from_block}..={to_block} after {MAX_WINDOW_RETRIES} retries"
                )));
            }
        };

        for log in logs {
            let block_ts = match block_ts_cache.get(&log.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = match source.timestamp_of(log.block_number).await {
                        Ok(ts) => Utc.timestamp_opt(ts as i64, 0).single().unwrap_or(now),
                        Err(e) => {
                            warn!(error = %e, block_number = log.block_number, "proxying unretrievable block timestamp");
                            batch_ts + chrono::Duration::seconds(TIMESTAMP_PROXY_SLACK_SECS)
                        }
                    };
                    block_ts_cache.insert(log.block_number, ts);
                    ts
                }
            };
            upsert_log(pool, broker_id, &log, block_ts).await?;
        }

        from_block = to_block + 1;
    }

    Ok(())
}

/// Fetches one window of `Payment` logs, halving the range on error up to
/// [`MAX_WINDOW_RETRIES`] times with a fixed wait between attempts.
async fn fetch_window<P: Provider>(
    provider: &P,
    multipay: Address,
    from_block: u64,
    to_block: u64,
    mut window: u64,
) -> Option<Vec<PaymentLog>> {
    let mut attempt = 0;
    let mut hi = to_block;
    loop {
        match rebate_chain::fetch_payment_logs(provider, multipay, from_block, hi).await {
            Ok(logs) => return Some(logs),
            Err(e) => {
                attempt += 1;
                if attempt > MAX_WINDOW_RETRIES {
                    warn!(error = %e, from_block, to_block = hi, "giving up on Payment log window");
                    return None;
                }
                window = (window / 2).max(1);
                hi = (from_block + window).min(to_block);
                warn!(error = %e, attempt, new_window = window, "halving Payment log window after RPC error");
                tokio::time::sleep(std::time::Duration::from_secs(WINDOW_RETRY_WAIT_SECS)).await;
            }
        }
    }
}

async fn upsert_log(
    pool: &PgPool,
    broker_id: &str,
    log: &PaymentLog,
    block_ts: DateTime<Utc>,
) -> Result<(), ReconcileError> {
    let batch_ts = Utc
        .timestamp_opt(log.batch_ts as i64, 0)
        .single()
        .ok_or_else(|| ReconcileError::Fatal(format!("invalid batch_ts in memo: {}", log.batch_ts)))?;
    let trader_addr = format!("{:#x}", log.from);
    let block_nr = log.block_number as i64;

    let tx_hash = format!("{:#x}", log.tx_hash);
    for (k, (payee, amount)) in log.payees.iter().zip(log.amounts.iter()).enumerate() {
        if amount.is_zero() {
            continue;
        }
        let payee_addr = format!("{payee:#x}");
        let paid_amount_cc = BigDecimal::from(u128::try_from(*amount).unwrap_or(u128::MAX));
        ledger::reconcile_row(
            pool,
            broker_id,
            &trader_addr,
            &payee_addr,
            &log.code,
            k as i32,
            log.pool_id as i32,
            batch_ts,
            paid_amount_cc,
            &tx_hash,
            block_nr,
            block_ts,
        )
        .await?;
    }
    Ok(())
}
