mod bootstrap;
mod config;
mod keyfile;

use std::str::FromStr;

use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rebate_chain::{ChainClient, TokenBucket};
use rebate_executor::{manage_payments, ExecutorConfig, RemoteBrokerClient};
use rebate_reconcile::{confirm_payment_txs, parse_schedule, prev_tick, save_payments};
use tracing_subscriber::EnvFilter;

use crate::config::Cli;

const MULTIPAY_RATE_LIMIT_CAPACITY: u32 = 5;
const MULTIPAY_RATE_LIMIT_PER_SEC: f64 = 2.0;
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
/// §4.2 step 1: reconciliation gets up to this many attempts, rotating RPC
/// endpoints and backing off `60*attempt` seconds between them, before a
/// batch is allowed to run this tick.
const MAX_RECONCILE_RETRIES: u32 = 5;
const RECONCILE_BACKOFF_UNIT: std::time::Duration = std::time::Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let db_pool = rebate_db::connect(&cli.database_dsn_history).await?;
    rebate_db::run_migrations(&db_pool).await?;

    let chain_configs = config::load_chain_configs(&cli.config_path)?;
    let chain_cfg = config::chain_config_for(&chain_configs, cli.chain_id)?.clone();
    let rpc_endpoints = config::load_rpc_endpoints(&cli.rpc_url_path, cli.chain_id)?;

    let aes_key: [u8; 32] = {
        let bytes = hex::decode(cli.broker_key.trim_start_matches("0x"))
            .context("BROKER_KEY must be a hex-encoded 32-byte AES-256 key")?;
        bytes.try_into().map_err(|_| anyhow::anyhow!("BROKER_KEY must decode to exactly 32 bytes"))?
    };
    let executor_key_hex = keyfile::load_from_file(&cli.keyfile_path, &aes_key)?;
    let executor_key = B256::from_str(executor_key_hex.trim_start_matches("0x"))
        .context("decrypted executor key is not a valid 32-byte hex value")?;

    let mut chain_client = ChainClient::connect(rpc_endpoints).await?;

    let remote_broker = RemoteBrokerClient::new(cli.remote_broker_http.clone());
    let broker_addr = remote_broker.broker_address().await?;
    let executor_addr = {
        let signing_key = k256::ecdsa::SigningKey::from_bytes(executor_key.as_slice().into())
            .context("invalid executor signing key")?;
        Address::from_public_key(signing_key.verifying_key())
    };

    rebate_db::settings::bootstrap_on_startup(
        &db_pool,
        &chain_cfg.broker_id,
        chain_cfg.payment_max_look_back_days,
        &format!("{broker_addr:#x}"),
    )
    .await?;

    let multi_pay_contract: Address = std::env::var("MULTIPAY_CONTRACT_ADDR")
        .context("MULTIPAY_CONTRACT_ADDR must be set to the deployed multi-pay contract address")?
        .parse()
        .context("MULTIPAY_CONTRACT_ADDR is not a valid address")?;

    let exec_cfg = ExecutorConfig {
        broker_id: chain_cfg.broker_id.clone(),
        broker_addr,
        broker_payout_addr: chain_cfg.broker_payout_addr,
        executor_addr,
        executor_key,
        chain_id: chain_cfg.chain_id,
        multi_pay_contract,
        remote_broker,
        token_x: chain_cfg.token_x.address,
        token_x_decimals: chain_cfg.token_x.decimals,
    };

    // Floor cut applied when a referrer has no cached tokenX balance yet or
    // clears no configured tier; `refresh_stale_holdings` keeps the cache
    // real per-referrer cuts are resolved against.
    let referrer_cut = chain_cfg
        .referrer_cut_percent_for_token_x_holding
        .iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(cut_pct, _)| rebate_types::Fraction::from_percent(*cut_pct))
        .transpose()?
        .unwrap_or(rebate_types::Fraction::ZERO);

    let schedule = parse_schedule(&chain_cfg.payment_schedule_cron)?;
    let token_bucket = TokenBucket::new(MULTIPAY_RATE_LIMIT_CAPACITY, MULTIPAY_RATE_LIMIT_PER_SEC);

    tracing::info!(
        broker_id = %chain_cfg.broker_id,
        broker_addr = %broker_addr,
        token_x = %chain_cfg.token_x.address,
        token_x_decimals = chain_cfg.token_x.decimals,
        "rebate-engine starting"
    );

    loop {
        let now = Utc::now();

        // §4.2 step 1: reconciliation must complete (or fail terminally)
        // before a batch is allowed to run this tick, or a trade whose
        // payout event failed to ingest could get paid twice.
        let mut reconciled = false;
        for attempt in 1..=MAX_RECONCILE_RETRIES {
            let provider = chain_client.provider();
            match save_payments(
                provider,
                &db_pool,
                &chain_cfg.broker_id,
                multi_pay_contract,
                chain_cfg.payment_max_look_back_days,
                now,
                now,
            )
            .await
            {
                Ok(()) => {
                    reconciled = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "payment log reconciliation failed this tick");
                    if attempt == MAX_RECONCILE_RETRIES {
                        break;
                    }
                    if let Err(e) = chain_client.rotate().await {
                        tracing::warn!(error = %e, "rpc rotation failed during reconciliation retry");
                    }
                    tokio::time::sleep(RECONCILE_BACKOFF_UNIT * attempt).await;
                }
            }
        }

        if !reconciled {
            tracing::warn!("reconciliation failed persistently this tick, skipping batch and rescheduling");
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        let provider = chain_client.provider();
        if let Err(e) = confirm_payment_txs(provider, &db_pool, &chain_cfg.broker_id, &token_bucket).await {
            tracing::warn!(error = %e, "payment confirmation sweep failed this tick");
        }

        let (graph, codes) =
            bootstrap::load_graph_and_codes(&db_pool, &chain_cfg.broker_id, broker_addr).await?;

        if let Some(prev_tick_at) = prev_tick(&schedule, now) {
            let provider = chain_client.provider();
            if let Err(e) = manage_payments(
                provider,
                &db_pool,
                &exec_cfg,
                &graph,
                &codes,
                referrer_cut,
                prev_tick_at,
                now,
                &token_bucket,
            )
            .await
            {
                tracing::warn!(error = %e, "batch execution failed this tick");
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
