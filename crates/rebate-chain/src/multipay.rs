use alloy_network::TransactionBuilder;
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_provider::Provider;
use alloy_rpc_types_eth::{Filter, TransactionRequest};
use alloy_sol_macro::sol;
use alloy_sol_types::{SolCall, SolEvent};
use rebate_codec::decode_payment_info;
use tracing::{instrument, warn};

use crate::error::ChainError;

/// Hard gas limit on `delegatedPay` submissions (§4.2 `pay_batch` step 6);
/// fixed rather than estimated so a misbehaving node can't blow the budget.
pub const DELEGATED_PAY_GAS_LIMIT: u64 = 5_000_000;

sol! {
    #[derive(Debug)]
    event Payment(address indexed from, uint32 indexed id, address indexed token, uint256[] amounts, address[] payees, string message);

    #[derive(Debug)]
    struct PayPayload {
        address payer;
        address executor;
        address token;
        uint256 timestamp;
        uint256 id;
        uint256 totalAmount;
    }

    interface IMultiPay {
        function delegatedPay(PayPayload payload, bytes signature, uint256[] amounts, address[] payees, string message) external;
    }
}

/// A decoded `Payment` event joined with its memo fields, ready for §4.4
/// reconciliation. `payees[0]` is always the trader (the invariant
/// `pay_batch` establishes when it submits the batch).
#[derive(Debug, Clone)]
pub struct PaymentLog {
    pub batch_ts: u64,
    pub code: String,
    pub pool_id: u32,
    pub from: Address,
    pub token: Address,
    pub payees: Vec<Address>,
    pub amounts: Vec<U256>,
    pub block_number: u64,
    pub tx_hash: TxHash,
}

/// Fetches `Payment` logs for `multipay` in `[from_block, to_block]` and
/// decodes each event's memo, skipping (not failing) events whose message
/// doesn't parse — matches §4.4 step 3.
#[instrument(skip(provider))]
pub async fn fetch_payment_logs<P: Provider>(
    provider: &P,
    multipay: Address,
    from_block: u64,
    to_block: u64,
) -> Result<Vec<PaymentLog>, ChainError> {
    let filter = Filter::new()
        .address(multipay)
        .event_signature(Payment::SIGNATURE_HASH)
        .from_block(from_block)
        .to_block(to_block);
    let logs = provider.get_logs(&filter).await?;

    let mut out = Vec::with_capacity(logs.len());
    for log in logs {
        let block_number = match log.block_number {
            Some(n) => n,
            None => continue,
        };
        let tx_hash = match log.transaction_hash {
            Some(h) => h,
            None => continue,
        };
        let decoded = match Payment::decode_log(&log.inner, true) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "skipping undecodable Payment log");
                continue;
            }
        };
        let memo = match decode_payment_info(&decoded.message) {
            Some(m) => m,
            None => {
                warn!(message = %decoded.message, "skipping Payment log with unparseable memo");
                continue;
            }
        };
        let (batch_ts, pool_id) = match (memo.batch_ts().parse(), memo.pool_id().parse()) {
            (Ok(ts), Ok(pid)) => (ts, pid),
            _ => continue,
        };
        out.push(PaymentLog {
            batch_ts,
            code: memo.code().to_string(),
            pool_id,
            from: decoded.from,
            token: decoded.token,
            payees: decoded.payees.clone(),
            amounts: decoded.amounts.clone(),
            block_number,
            tx_hash,
        });
    }
    Ok(out)
}

/// Submits a `delegatedPay` transaction (§4.2 `pay_batch` step 6) at the
/// fixed [`DELEGATED_PAY_GAS_LIMIT`]. `provider` must already carry a
/// signer filler (the executor's own key) capable of producing a signed
/// transaction, not just `eth_call`s.
#[instrument(skip(provider, signature, amounts, payees))]
pub async fn submit_delegated_pay<P: Provider>(
    provider: &P,
    multipay: Address,
    payload: PayPayload,
    signature: Bytes,
    amounts: Vec<U256>,
    payees: Vec<Address>,
    message: String,
) -> Result<TxHash, ChainError> {
    let call = IMultiPay::delegatedPayCall { payload, signature, amounts, payees, message };
    let tx = TransactionRequest::default()
        .with_to(multipay)
        .with_input(call.abi_encode())
        .with_gas_limit(DELEGATED_PAY_GAS_LIMIT);
    let pending = provider.send_transaction(tx).await?;
    Ok(*pending.tx_hash())
}
