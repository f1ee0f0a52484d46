//! Persistence for the referral graph, code registry, payment ledger, and
//! settings (§3): a thin `sqlx`-backed layer, one module per entity group.

pub mod code_selection;
pub mod error;
pub mod holdings;
pub mod ledger;
pub mod models;
pub mod pool;
pub mod referral_chain;
pub mod referral_code;
pub mod settings;

pub use pool::{connect, run_migrations};
pub use sqlx::PgPool;
