//! The in-memory referral graph and code registry (§10 Design Note 9):
//! chain resolution and cut-percentage arithmetic, plus the mutation
//! validators for `refer` and `upsert_code` (§4.1).

pub mod chain;
pub mod codes;
pub mod mutations;
pub mod preview;

pub use chain::{ChainLevel, Graph};
pub use codes::{CodeInfo, CodeRegistry};
pub use mutations::{apply_refer, validate_refer, validate_select_code};
pub use preview::{open_pay_preview, OpenPayRow};
