use alloy_primitives::{Address, U256};
use alloy_provider::Provider;
use rebate_chain::erc20::balance_of;
use rebate_fixed::ratio;

use crate::error::ExecutorError;

/// A pool's collateral token plus the total fee owed to the broker across
/// every row in this batch (§4.3.1), already expressed decimal-N.
pub struct PoolFeeTotal {
    pub pool_id: u32,
    pub token: Address,
    pub decimals: u8,
    pub total_fee_dec_n: i128,
}

fn u256_to_dec_n(balance: U256, decimals: u8) -> i128 {
    let divisor = U256::from(10u64).pow(U256::from(decimals));
    // `balance` may exceed i128 in principle; any realistic ERC-20 supply
    // at a token's own decimals fits comfortably, so a saturating cast is
    // the practical choice over propagating a conversion error here.
    let scaled = balance / divisor.max(U256::from(1));
    i128::try_from(scaled).unwrap_or(i128::MAX)
}

/// Computes the §4.3.1 scaling factor for one pool: `1.0` if the broker's
/// on-chain balance covers the pool's total outstanding fees, else the
/// ratio `holdings / fees` used to downscale every row's payout.
pub async fn scaling_factor<P: Provider>(
    provider: &P,
    broker_addr: Address,
    pool: &PoolFeeTotal,
) -> Result<f64, ExecutorError> {
    if pool.total_fee_dec_n <= 0 {
        return Ok(1.0);
    }
    let balance = balance_of(provider, pool.token, broker_addr).await?;
    let balance_dec_n = u256_to_dec_n(balance, pool.decimals);
    if balance_dec_n < pool.total_fee_dec_n {
        Ok(ratio(balance_dec_n, pool.total_fee_dec_n))
    } else {
        Ok(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_to_dec_n_applies_decimals() {
        let balance = U256::from(1_500_000u64);
        assert_eq!(u256_to_dec_n(balance, 6), 1);
    }

    #[test]
    fn zero_fees_never_scale_down() {
        // scaling_factor short-circuits before touching the provider when
        // total_fee_dec_n <= 0, so this is exercised indirectly by pay_batch
        // tests in distribution.rs; this module only covers the pure helper.
        assert_eq!(u256_to_dec_n(U256::ZERO, 6), 0);
    }
}
