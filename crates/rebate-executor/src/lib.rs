//! The payment executor (§4.2, §4.3): the batch state machine, per-row
//! distribution, the §4.3.1 scaling factor, and the §4.3.2 remote-signature
//! HTTP client.

pub mod batch;
pub mod distribution;
pub mod error;
pub mod scaling;
pub mod signing;

pub use batch::{decide_batch, manage_payments, pay_batch, process_payments, BatchDecision, ExecutorConfig};
pub use distribution::{build_payout, Payout};
pub use error::ExecutorError;
pub use signing::{PaySummary, RemoteBrokerClient};
