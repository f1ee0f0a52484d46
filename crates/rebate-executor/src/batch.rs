use std::str::FromStr;

use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::Provider;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use rebate_chain::{erc20::balance_of, submit_delegated_pay, PayPayload, TokenBucket};
use rebate_codec::encode_payment_info;
use rebate_db::{holdings, ledger, settings};
use rebate_fixed::Abdk;
use rebate_graph::{CodeRegistry, Graph};
use rebate_types::{Code, Fraction, TypeError, REFERRER_TOKENX_BAL_FREQ_H};
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::distribution::build_payout;
use crate::error::ExecutorError;
use crate::scaling::{scaling_factor, PoolFeeTotal};
use crate::signing::{PaySummary, RemoteBrokerClient};

/// One row of the external, read-only `referral_aggr_fees_per_trader`
/// aggregation view (§6) — the upstream history service's contribution to
/// a batch. `broker_fee_abdk` is the 64.64 fixed-point fee owed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AggregatedFeeRow {
    pub pool_id: i32,
    pub trader_addr: String,
    pub code: String,
    pub broker_fee_abdk: BigDecimal,
}

/// One row of the external, read-only `margin_token_info` view.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MarginTokenInfo {
    pub pool_id: i32,
    pub token_addr: String,
    pub token_decimals: i16,
}

pub async fn fetch_aggregated_fees(
    pool: &PgPool,
    broker_id: &str,
) -> Result<Vec<AggregatedFeeRow>, TypeError> {
    sqlx::query_as::<_, AggregatedFeeRow>(
        "SELECT pool_id, trader_addr, code, broker_fee_cc AS broker_fee_abdk
         FROM referral_aggr_fees_per_trader WHERE broker_id = $1",
    )
    .bind(broker_id)
    .fetch_all(pool)
    .await
    .map_err(rebate_db::error::map_sqlx_err)
}

pub async fn fetch_margin_token_info(
    pool: &PgPool,
    pool_id: i32,
) -> Result<Option<MarginTokenInfo>, TypeError> {
    sqlx::query_as::<_, MarginTokenInfo>(
        "SELECT pool_id, token_addr, token_decimals FROM margin_token_info WHERE pool_id = $1",
    )
    .bind(pool_id)
    .fetch_optional(pool)
    .await
    .map_err(rebate_db::error::map_sqlx_err)
}

/// What `decide_batch` (the §4.2 state-machine branch) chose to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchDecision {
    ResumeOpen(DateTime<Utc>),
    StartNew(DateTime<Utc>),
    Reschedule,
}

/// Pure decision logic for §4.2 step 2, split out of `manage_payments` so it
/// can be tested without a database: resume an unfinished batch, start a
/// fresh one once the cron tick has moved past the last stored timestamp,
/// or reschedule if neither applies.
pub fn decide_batch(
    stored_ts: Option<DateTime<Utc>>,
    finished: bool,
    prev_cron_tick: DateTime<Utc>,
    now: DateTime<Utc>,
) -> BatchDecision {
    if !finished {
        if let Some(ts) = stored_ts {
            return BatchDecision::ResumeOpen(ts);
        }
    }
    match stored_ts {
        Some(ts) if prev_cron_tick > ts => BatchDecision::StartNew(now),
        None => BatchDecision::StartNew(now),
        Some(_) => BatchDecision::Reschedule,
    }
}

/// Configuration fixed for the lifetime of an executor (§6's chain-indexed
/// config array, one entry's worth).
pub struct ExecutorConfig {
    pub broker_id: String,
    pub broker_addr: Address,
    pub broker_payout_addr: Address,
    pub executor_addr: Address,
    pub executor_key: alloy_primitives::B256,
    pub chain_id: u64,
    pub multi_pay_contract: Address,
    pub remote_broker: RemoteBrokerClient,
    /// The tokenX whose holdings size a referrer's cut tier (§3).
    pub token_x: Address,
    pub token_x_decimals: u8,
}

fn dec_n_to_i128(v: &BigDecimal, decimals: i16) -> i128 {
    let scaled = v * BigDecimal::from(10i128.pow(decimals.max(0) as u32));
    scaled.to_i128().unwrap_or(0)
}

/// `pay_batch` (§4.2): builds the payout for one aggregated-fee row,
/// acquires the remote broker's counter-signature, and submits
/// `delegatedPay`. Returns the payout actually submitted so the caller can
/// insert ledger rows.
#[instrument(skip(provider, db_pool, cfg, chain, token_bucket), fields(trader = %row.trader_addr, code = %row.code))]
#[allow(clippy::too_many_arguments)]
pub async fn pay_batch<P: Provider>(
    provider: &P,
    db_pool: &PgPool,
    cfg: &ExecutorConfig,
    row: &AggregatedFeeRow,
    trader_addr: Address,
    chain: &[rebate_graph::ChainLevel],
    token: Address,
    token_decimals: u8,
    scaling: f64,
    batch_ts: DateTime<Utc>,
    payment_id: u64,
    token_bucket: &TokenBucket,
) -> Result<(), ExecutorError> {
    let broker_fee_abdk: Abdk = dec_n_to_i128(&row.broker_fee_abdk, 0);
    let payout = build_payout(
        broker_fee_abdk,
        token_decimals,
        scaling,
        chain,
        trader_addr,
        cfg.broker_payout_addr,
    );
    if payout.total <= 0 {
        return Ok(());
    }

    let memo = encode_payment_info(batch_ts.timestamp() as u64, &row.code, row.pool_id as u32);

    let summary = PaySummary {
        payer: cfg.broker_addr,
        executor: cfg.executor_addr,
        token,
        timestamp: batch_ts.timestamp() as u64,
        id: payment_id,
        total_amount: U256::from(payout.total as u128),
        chain_id: cfg.chain_id,
        multi_pay_contract: cfg.multi_pay_contract,
    };

    token_bucket.wait_for_token().await;
    let broker_signature = cfg.remote_broker.sign_payment(&summary, &cfg.executor_key).await?;
    let sig_bytes = Bytes::from(
        hex::decode(broker_signature.trim_start_matches("0x"))
            .map_err(|e| ExecutorError::SignatureInvalid(format!("malformed hex signature: {e}")))?,
    );

    let payload = PayPayload {
        payer: cfg.broker_addr,
        executor: cfg.executor_addr,
        token,
        timestamp: U256::from(summary.timestamp),
        id: U256::from(payment_id),
        totalAmount: summary.total_amount,
    };

    let (payees, amounts): (Vec<Address>, Vec<U256>) = payout
        .non_zero_rows()
        .map(|(_, addr, amt)| (addr, U256::from(amt as u128)))
        .unzip();

    token_bucket.wait_for_token().await;
    let tx_hash = submit_delegated_pay(
        provider,
        cfg.multi_pay_contract,
        payload,
        sig_bytes,
        amounts,
        payees.clone(),
        memo,
    )
    .await?;

    for (level, payee, amount) in payout.non_zero_rows() {
        ledger::insert_unconfirmed(
            db_pool,
            &cfg.broker_id,
            &trader_addr.to_string(),
            &payee.to_string(),
            &row.code,
            level as i32,
            row.pool_id,
            batch_ts,
            BigDecimal::from(amount),
            &tx_hash.to_string(),
        )
        .await?;
    }

    info!(tx = %tx_hash, total = payout.total, "submitted delegatedPay");
    Ok(())
}

/// `process_payments` (§4.2 step 3): computes the per-pool scaling factor
/// and drives `pay_batch` for every aggregated-fee row, resolving each row's
/// chain from the in-memory graph and code registry. Each row's own
/// referrer-cut tier is looked up from its cached token-holdings balance
/// (§3), falling back to `referrer_cut` when no cached balance or tier
/// applies. Aborts the remaining rows (but does not reset batch state) on
/// the first `insufficient funds`.
#[instrument(skip_all)]
#[allow(clippy::too_many_arguments)]
pub async fn process_payments<P: Provider>(
    provider: &P,
    db_pool: &PgPool,
    cfg: &ExecutorConfig,
    graph: &Graph,
    codes: &CodeRegistry,
    referrer_cut: Fraction,
    batch_ts: DateTime<Utc>,
    token_bucket: &TokenBucket,
) -> Result<(), ExecutorError> {
    let rows = fetch_aggregated_fees(db_pool, &cfg.broker_id).await?;

    let mut pool_totals: std::collections::HashMap<i32, i128> = std::collections::HashMap::new();
    for row in &rows {
        let amount = dec_n_to_i128(&row.broker_fee_abdk, 0);
        *pool_totals.entry(row.pool_id).or_insert(0) += amount;
    }

    let mut scaling_by_pool: std::collections::HashMap<i32, f64> = std::collections::HashMap::new();
    let mut token_by_pool: std::collections::HashMap<i32, (Address, u8)> = std::collections::HashMap::new();
    for (pool_id, total) in pool_totals {
        let Some(info) = fetch_margin_token_info(db_pool, pool_id).await? else {
            warn!(pool_id, "no margin_token_info row, skipping pool");
            continue;
        };
        let token: Address = info
            .token_addr
            .parse()
            .map_err(|_| ExecutorError::Fatal(format!("bad token address for pool {pool_id}")))?;
        let decimals = info.token_decimals.max(0) as u8;
        token_bucket.wait_for_token().await;
        let scale = scaling_factor(
            provider,
            cfg.broker_addr,
            &PoolFeeTotal { pool_id: pool_id as u32, token, decimals, total_fee_dec_n: total },
        )
        .await?;
        scaling_by_pool.insert(pool_id, scale);
        token_by_pool.insert(pool_id, (token, decimals));
    }

    for (idx, row) in rows.iter().enumerate() {
        let Some(&(token, decimals)) = token_by_pool.get(&row.pool_id) else { continue };
        let scale = *scaling_by_pool.get(&row.pool_id).unwrap_or(&1.0);

        let trader_addr: Address = match row.trader_addr.parse() {
            Ok(a) => a,
            Err(_) => {
                warn!(trader = %row.trader_addr, "skipping row with unparseable trader address");
                continue;
            }
        };
        let code = Code::from_stored(row.code.clone());
        let row_referrer_cut = match codes.get(&code) {
            Some(info) => {
                resolve_referrer_cut(
                    db_pool,
                    &cfg.broker_id,
                    info.referrer_addr,
                    cfg.token_x,
                    referrer_cut,
                )
                .await
            }
            None => referrer_cut,
        };
        let mut chain = match codes.chain_for_code(graph, &code, row_referrer_cut) {
            Ok(c) => c,
            Err(e) => {
                warn!(code = %row.code, error = %e, "skipping row, chain resolution failed");
                continue;
            }
        };
        if let Some(last) = chain.last_mut() {
            last.child = trader_addr;
        }

        match pay_batch(
            provider,
            db_pool,
            cfg,
            row,
            trader_addr,
            &chain,
            token,
            decimals,
            scale,
            batch_ts,
            idx as u64,
            token_bucket,
        )
        .await
        {
            Ok(()) => {}
            Err(ExecutorError::InsufficientFunds) => {
                warn!("insufficient funds, aborting remaining rows in batch");
                break;
            }
            Err(e) => {
                // Preserved per the spec's own documented open question: any
                // other per-row failure is logged and the batch continues.
                warn!(error = %e, "row failed, continuing batch");
            }
        }
    }

    Ok(())
}

/// `manage_payments` (§4.2) entry-point: reconcile, decide, execute. The
/// caller supplies an already-reconciled state (reconciliation is
/// `rebate-reconcile`'s responsibility) and the previous cron tick.
#[instrument(skip_all)]
#[allow(clippy::too_many_arguments)]
pub async fn manage_payments<P: Provider>(
    provider: &P,
    db_pool: &PgPool,
    cfg: &ExecutorConfig,
    graph: &Graph,
    codes: &CodeRegistry,
    referrer_cut: Fraction,
    prev_cron_tick: DateTime<Utc>,
    now: DateTime<Utc>,
    token_bucket: &TokenBucket,
) -> Result<(), ExecutorError> {
    let (stored_ts, finished) = settings::batch_state(db_pool, &cfg.broker_id).await?;
    let stored_ts = stored_ts.and_then(|s| s.parse::<i64>().ok()).and_then(|ts| {
        DateTime::from_timestamp(ts, 0)
    });

    let batch_ts = match decide_batch(stored_ts, finished, prev_cron_tick, now) {
        BatchDecision::Reschedule => {
            info!("no batch due, rescheduling");
            return Ok(());
        }
        BatchDecision::ResumeOpen(ts) => ts,
        BatchDecision::StartNew(ts) => {
            settings::set(db_pool, &cfg.broker_id, "batch_timestamp", &ts.timestamp().to_string())
                .await?;
            settings::set(db_pool, &cfg.broker_id, "batch_finished", "false").await?;
            ts
        }
    };

    refresh_stale_holdings(provider, db_pool, &cfg.broker_id, graph, cfg.token_x, cfg.token_x_decimals)
        .await?;

    process_payments(provider, db_pool, cfg, graph, codes, referrer_cut, batch_ts, token_bucket)
        .await?;

    settings::set(db_pool, &cfg.broker_id, "batch_finished", "true").await?;
    Ok(())
}

fn u256_to_holding_bigdecimal(balance: U256, decimals: u8) -> BigDecimal {
    let raw = BigDecimal::from_str(&balance.to_string()).unwrap_or_else(|_| BigDecimal::from(0));
    raw / BigDecimal::from(10i128.pow(decimals as u32))
}

/// §4.2 step 3a: refreshes every active referrer's cached tokenX balance
/// whose cache is missing or older than [`REFERRER_TOKENX_BAL_FREQ_H`]
/// hours, reading the live balance via `eth_call`.
async fn refresh_stale_holdings<P: Provider>(
    provider: &P,
    db_pool: &PgPool,
    broker_id: &str,
    graph: &Graph,
    token_x: Address,
    token_x_decimals: u8,
) -> Result<(), ExecutorError> {
    let token_addr = format!("{token_x:#x}");
    let now = Utc::now();
    let max_age = chrono::Duration::hours(REFERRER_TOKENX_BAL_FREQ_H);

    for referrer in graph.agent_addresses() {
        let referrer_addr = format!("{referrer:#x}");
        let stale = match holdings::get(db_pool, broker_id, &referrer_addr, &token_addr).await? {
            Some(row) => now.signed_duration_since(row.last_updated) >= max_age,
            None => true,
        };
        if !stale {
            continue;
        }

        let balance = balance_of(provider, token_x, referrer).await?;
        let balance_dec_n = u256_to_holding_bigdecimal(balance, token_x_decimals);
        holdings::upsert(db_pool, broker_id, &referrer_addr, &token_addr, balance_dec_n, now).await?;
    }
    Ok(())
}

/// Looks up `referrer_addr`'s own cut tier (§3) from its cached tokenX
/// balance: the highest tier whose threshold the balance clears. Falls back
/// to `fallback` when no cached balance or no tiers are configured.
async fn resolve_referrer_cut(
    db_pool: &PgPool,
    broker_id: &str,
    referrer_addr: Address,
    token_x: Address,
    fallback: Fraction,
) -> Fraction {
    let token_addr = format!("{token_x:#x}");
    let referrer_addr = format!("{referrer_addr:#x}");

    let Ok(Some(row)) = holdings::get(db_pool, broker_id, &referrer_addr, &token_addr).await else {
        return fallback;
    };
    let Ok(tiers) = holdings::cut_tiers(db_pool, broker_id, &token_addr).await else {
        return fallback;
    };

    let mut cut = fallback;
    for tier in tiers {
        if row.holding_amount_dec_n >= tier.holding_amount_dec_n {
            if let Ok(pct) = Fraction::from_percent(tier.cut_perc as f64) {
                cut = pct;
            }
        }
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn resumes_an_unfinished_batch_regardless_of_cron_tick() {
        let decision = decide_batch(Some(ts(100)), false, ts(50), ts(200));
        assert_eq!(decision, BatchDecision::ResumeOpen(ts(100)));
    }

    #[test]
    fn starts_a_new_batch_once_cron_tick_passes_stored_timestamp() {
        let decision = decide_batch(Some(ts(100)), true, ts(150), ts(200));
        assert_eq!(decision, BatchDecision::StartNew(ts(200)));
    }

    #[test]
    fn reschedules_when_cron_tick_has_not_advanced() {
        let decision = decide_batch(Some(ts(100)), true, ts(50), ts(200));
        assert_eq!(decision, BatchDecision::Reschedule);
    }

    #[test]
    fn starts_a_new_batch_when_none_stored_yet() {
        let decision = decide_batch(None, true, ts(50), ts(200));
        assert_eq!(decision, BatchDecision::StartNew(ts(200)));
    }
}
