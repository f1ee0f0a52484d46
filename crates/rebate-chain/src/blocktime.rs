use alloy_eips::BlockNumberOrTag;
use alloy_provider::Provider;
use async_trait::async_trait;

use crate::error::ChainError;

/// Abstracts "what block is at the head, and what's the timestamp of block
/// N" so [`find_block_with_ts`] can be exercised without a live node.
#[async_trait]
pub trait BlockTimeSource {
    async fn head(&self) -> Result<(u64, u64), ChainError>;
    async fn timestamp_of(&self, block_number: u64) -> Result<u64, ChainError>;
}

/// Adapts any [`Provider`] into a [`BlockTimeSource`] by reading
/// `eth_blockNumber`/`eth_getBlockByNumber` directly.
pub struct ProviderBlockSource<'a, P>(pub &'a P);

#[async_trait]
impl<P: Provider + Sync> BlockTimeSource for ProviderBlockSource<'_, P> {
    async fn head(&self) -> Result<(u64, u64), ChainError> {
        let number = self.0.get_block_number().await?;
        let ts = self.timestamp_of(number).await?;
        Ok((number, ts))
    }

    async fn timestamp_of(&self, block_number: u64) -> Result<u64, ChainError> {
        let block = self
            .0
            .get_block_by_number(BlockNumberOrTag::Number(block_number), false)
            .await?
            .ok_or_else(|| ChainError::Transient(format!("block {block_number} not found")))?;
        Ok(block.header.timestamp)
    }
}

/// Finds the block number/timestamp pair closest to (but not after) `ts`,
/// per §4.5: an exponential-backoff walk to bracket `ts` between two
/// observed blocks, then bisection down to a 2-block window.
pub async fn find_block_with_ts<S: BlockTimeSource + Sync>(
    source: &S,
    ts: u64,
) -> Result<(u64, u64), ChainError> {
    let (num_b_head, ts_b_head) = source.head().await?;
    if ts_b_head <= ts {
        return Ok((num_b_head, ts_b_head));
    }

    let mut num_b = num_b_head;
    let mut ts_b = ts_b_head;
    let mut time_est: u64 = 10;
    let (mut num_a, mut ts_a);

    loop {
        let t_diff = ts_b - ts;
        let time_back = (t_diff / time_est).max(1);
        if time_back >= num_b {
            return Err(ChainError::Fatal(
                "genesis block reached, timestamp search failed".into(),
            ));
        }
        num_a = num_b - time_back;
        ts_a = source.timestamp_of(num_a).await?;

        if ts_a < ts {
            break;
        }
        time_est = ((ts_b - ts_a) / (num_b - num_a)).max(1);
        ts_b = ts_a;
        num_b = num_a;
    }

    bisect(source, num_a, num_b, ts).await
}

async fn bisect<S: BlockTimeSource + Sync>(
    source: &S,
    mut num_a: u64,
    mut num_b: u64,
    ts: u64,
) -> Result<(u64, u64), ChainError> {
    loop {
        let num_p = (num_a + num_b) / 2;
        let ts_p = source.timestamp_of(num_p).await?;
        if ts_p < ts {
            num_a = num_p;
        } else {
            num_b = num_p;
        }
        if num_b <= num_a + 2 {
            return Ok((num_p, ts_p));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// A synthetic chain with 1 block/10s starting at genesis timestamp 0,
    /// plus a call counter to confirm the algorithm doesn't over-fetch.
    struct FakeChain {
        head_number: u64,
        seconds_per_block: u64,
        calls: Mutex<u64>,
    }

    #[async_trait]
    impl BlockTimeSource for FakeChain {
        async fn head(&self) -> Result<(u64, u64), ChainError> {
            *self.calls.lock().unwrap() += 1;
            Ok((self.head_number, self.head_number * self.seconds_per_block))
        }

        async fn timestamp_of(&self, block_number: u64) -> Result<u64, ChainError> {
            *self.calls.lock().unwrap() += 1;
            Ok(block_number * self.seconds_per_block)
        }
    }

    #[tokio::test]
    async fn returns_head_when_target_is_in_the_future() {
        let chain = FakeChain { head_number: 1000, seconds_per_block: 12, calls: Mutex::new(0) };
        let (num, ts) = find_block_with_ts(&chain, 1_000_000_000_000).await.unwrap();
        assert_eq!(num, 1000);
        assert_eq!(ts, 12000);
    }

    #[tokio::test]
    async fn locates_a_block_within_one_step_of_the_target() {
        let chain = FakeChain { head_number: 100_000, seconds_per_block: 12, calls: Mutex::new(0) };
        let target_ts = 500_000;
        let (num, ts) = find_block_with_ts(&chain, target_ts).await.unwrap();
        // the bisection window has narrowed to <= 2 blocks either side of the target
        assert!(target_ts.abs_diff(ts) <= 2 * chain.seconds_per_block);
        // block N's timestamp is exactly N * 12 in this fake chain
        assert_eq!(ts, num * chain.seconds_per_block);
        assert!(*chain.calls.lock().unwrap() < 40, "search should converge in a handful of calls");
    }

    #[tokio::test]
    async fn fails_when_target_predates_genesis() {
        let chain = FakeChain { head_number: 100, seconds_per_block: 12, calls: Mutex::new(0) };
        assert!(find_block_with_ts(&chain, 0).await.is_err());
    }
}
