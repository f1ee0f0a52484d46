//! On-chain event reconciliation (§4.4), the block-time locator's live
//! callers, the confirmation sweep (§4.8), and cron-schedule parsing (§6).

pub mod confirm;
pub mod error;
pub mod reconcile;
pub mod scheduler;

pub use confirm::confirm_payment_txs;
pub use error::ReconcileError;
pub use reconcile::save_payments;
pub use scheduler::{parse_schedule, prev_tick};
