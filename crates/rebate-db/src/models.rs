use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct ReferralCodeRow {
    pub code: String,
    pub broker_id: String,
    pub referrer_addr: String,
    pub trader_rebate_perc: i32,
    pub created_on: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReferralChainEdgeRow {
    pub parent: String,
    pub child: String,
    pub broker_id: String,
    pub pass_on: f32,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CodeSelectionRow {
    pub trader_addr: String,
    pub code: String,
    pub broker_id: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TokenHoldingsRow {
    pub referrer_addr: String,
    pub token_addr: String,
    pub broker_id: String,
    pub holding_amount_dec_n: sqlx::types::BigDecimal,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CutTierRow {
    pub broker_id: String,
    pub token_addr: String,
    pub holding_amount_dec_n: sqlx::types::BigDecimal,
    pub cut_perc: f32,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentLedgerRow {
    pub trader_addr: String,
    pub payee_addr: String,
    pub code: String,
    pub level: i32,
    pub pool_id: i32,
    pub batch_ts: DateTime<Utc>,
    pub broker_id: String,
    pub paid_amount_cc: sqlx::types::BigDecimal,
    pub tx_hash: String,
    pub block_nr: Option<i64>,
    pub block_ts: Option<DateTime<Utc>>,
    pub tx_confirmed: bool,
}
