use std::time::Duration;

use alloy_primitives::TxHash;
use alloy_provider::Provider;
use chrono::Utc;
use rebate_chain::{classify_tx, TokenBucket, TxStatus};
use rebate_db::ledger;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::error::ReconcileError;

const RETRY_SLEEP: Duration = Duration::from_secs(3_600);
const QUARANTINE_AGE_SECS: i64 = (2 * 86_400) / 3;

/// Polls every unconfirmed `tx_hash` in the latest batch until every one is
/// settled (§4.8): confirmed rows are marked, `NOT_FOUND` rows older than
/// two-thirds of a day are quarantined, otherwise the sweep sleeps an hour
/// and retries.
#[instrument(skip(provider, pool, bucket))]
pub async fn confirm_payment_txs<P: Provider>(
    provider: &P,
    pool: &PgPool,
    broker_id: &str,
    bucket: &TokenBucket,
) -> Result<(), ReconcileError> {
    loop {
        let hashes = ledger::unconfirmed_tx_hashes_for_latest_batch(pool, broker_id).await?;
        if hashes.is_empty() {
            return Ok(());
        }

        let mut any_not_found = false;
        for hash in &hashes {
            let tx_hash: TxHash = hash
                .parse()
                .map_err(|_| ReconcileError::Fatal(format!("malformed tx_hash in ledger: {hash}")))?;

            bucket.wait_for_token().await;
            match classify_tx(provider, tx_hash).await {
                Ok(TxStatus::Confirmed) => {
                    ledger::mark_confirmed(pool, broker_id, hash).await?;
                }
                Ok(TxStatus::Failed) => {
                    ledger::quarantine(pool, broker_id, hash).await?;
                }
                Ok(TxStatus::NotFound) => {
                    any_not_found = true;
                    if is_stale(pool, broker_id, hash).await? {
                        warn!(tx_hash = %hash, "quarantining stale not-found payment tx");
                        ledger::quarantine(pool, broker_id, hash).await?;
                    }
                }
                Err(e) => {
                    warn!(error = %e, tx_hash = %hash, "transient failure classifying payment tx");
                    any_not_found = true;
                }
            }
        }

        if !any_not_found {
            return Ok(());
        }
        info!("payment txs still unsettled, sleeping before retry");
        tokio::time::sleep(RETRY_SLEEP).await;
    }
}

async fn is_stale(pool: &PgPool, broker_id: &str, tx_hash: &str) -> Result<bool, ReconcileError> {
    let batch_ts = ledger::batch_ts_of_tx(pool, broker_id, tx_hash).await?;
    Ok(match batch_ts {
        Some(ts) => (Utc::now() - ts).num_seconds() > QUARANTINE_AGE_SECS,
        None => false,
    })
}
