//! On-chain access: RPC client bring-up, block-time location, ERC-20
//! balance queries, multi-pay event decoding, transaction-receipt
//! classification, and the RPC rate limiter shared across all of them.

pub mod blocktime;
pub mod client;
pub mod erc20;
pub mod error;
pub mod multipay;
pub mod receipt;
pub mod token_bucket;

pub use blocktime::{find_block_with_ts, BlockTimeSource, ProviderBlockSource};
pub use client::ChainClient;
pub use erc20::balance_of;
pub use error::ChainError;
pub use multipay::{fetch_payment_logs, submit_delegated_pay, PayPayload, PaymentLog};
pub use receipt::{classify_tx, TxStatus};
pub use token_bucket::TokenBucket;
