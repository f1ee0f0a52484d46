use alloy_primitives::TxHash;
use alloy_provider::Provider;

use crate::error::ChainError;

/// The three-way classification §4.8's confirmation sweep drives off of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed,
    Failed,
    NotFound,
}

/// Classifies a transaction by hash: absent receipt is `NotFound` (still
/// pending or dropped), `status == 0` is `Failed`, anything else `Confirmed`.
pub async fn classify_tx<P: Provider>(provider: &P, tx_hash: TxHash) -> Result<TxStatus, ChainError> {
    let receipt = provider.get_transaction_receipt(tx_hash).await?;
    Ok(match receipt {
        None => TxStatus::NotFound,
        Some(r) if r.status() => TxStatus::Confirmed,
        Some(_) => TxStatus::Failed,
    })
}
