use alloy_network::TransactionBuilder;
use alloy_primitives::{Address, U256};
use alloy_provider::Provider;
use alloy_rpc_types_eth::TransactionRequest;
use alloy_sol_macro::sol;
use alloy_sol_types::SolCall;

use crate::error::ChainError;

sol! {
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// Queries an ERC-20 token balance via `eth_call`, used to size the §4.3.1
/// scaling factor against the broker's on-chain holdings.
pub async fn balance_of<P: Provider>(
    provider: &P,
    token: Address,
    holder: Address,
) -> Result<U256, ChainError> {
    let call = IERC20::balanceOfCall { owner: holder };
    let tx = TransactionRequest::default()
        .with_to(token)
        .with_input(call.abi_encode());
    let raw = provider.call(&tx).await?;
    IERC20::balanceOfCall::abi_decode_returns(&raw, true)
        .map(|r| r._0)
        .map_err(|e| ChainError::Fatal(format!("decoding balanceOf return: {e}")))
}
