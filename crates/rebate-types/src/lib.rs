//! Domain types shared across the referral rebate engine: addresses,
//! percentages, codes, and the common error taxonomy (§7 of the
//! specification).

use std::fmt;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reserved code meaning "no referral" — the entire fee accrues to the
/// broker and the trader receives no rebate.
pub const DEFAULT_CODE: &str = "DEFAULT";

/// Maximum number of hops from a leaf agency up to the broker root.
pub const MAX_REFERRAL_CHAIN_LEN: usize = 5;

/// Hours between refreshes of a single referrer's token-holding cache.
pub const REFERRER_TOKENX_BAL_FREQ_H: i64 = 120;

/// A fraction in `[0, 1]`, the unified internal representation for every
/// percent-like quantity (pass-on, trader rebate, referrer cut). Boundary
/// code marshals to/from the wire representations (percent, or percent*100).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Fraction(f64);

impl Fraction {
    pub const ZERO: Fraction = Fraction(0.0);
    pub const ONE: Fraction = Fraction(1.0);

    /// Builds a fraction from a percent value in `[0, 100]`.
    pub fn from_percent(pct: f64) -> Result<Self, TypeError> {
        if !(0.0..=100.0).contains(&pct) {
            return Err(TypeError::InputInvalid(format!(
                "percent {pct} out of range [0, 100]"
            )));
        }
        Ok(Fraction(pct / 100.0))
    }

    /// Builds a fraction from a two-decimal-precision percent integer
    /// (percent * 100), the wire format for `trader_rebate_perc` and
    /// `pass_on_perc_tdf`. Valid range is `[0, 10000)`.
    pub fn from_percent_tdf(tdf: u32) -> Result<Self, TypeError> {
        if tdf >= 10000 {
            return Err(TypeError::InputInvalid(format!(
                "pass-on/rebate percent {tdf} (x100) must be < 10000"
            )));
        }
        Ok(Fraction(tdf as f64 / 10000.0))
    }

    /// Builds a fraction directly from a raw `[0, 1]` value, clamping any
    /// out-of-range input from accumulated floating-point arithmetic.
    pub fn from_f64(v: f64) -> Self {
        Fraction(v.clamp(0.0, 1.0))
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }

    pub fn as_percent(self) -> f64 {
        self.0 * 100.0
    }

    pub fn clamp01(self) -> Fraction {
        Fraction(self.0.clamp(0.0, 1.0))
    }
}

impl std::ops::Mul for Fraction {
    type Output = Fraction;

    fn mul(self, rhs: Fraction) -> Fraction {
        Fraction(self.0 * rhs.0)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

/// A normalized referral code: uppercase alphanumeric plus `_`/`-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Code(String);

impl Code {
    /// Normalizes raw user input: strips everything outside
    /// `[A-Za-z0-9_-]` and uppercases the remainder. Rejects the reserved
    /// sentinel `DEFAULT` and the empty string.
    pub fn normalize(raw: &str) -> Result<Self, TypeError> {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if cleaned.is_empty() {
            return Err(TypeError::InputInvalid("empty code".into()));
        }
        if cleaned == DEFAULT_CODE {
            return Err(TypeError::InputInvalid(
                "DEFAULT is a reserved code".into(),
            ));
        }
        Ok(Code(cleaned))
    }

    /// Wraps an already-normalized code from storage without re-validating
    /// against the reserved-word rule (the `DEFAULT` sentinel is a valid
    /// stored value used internally by the chain-resolution synthetic edge).
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Code(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_CODE
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validates and lowercases an EVM address string per the `^0x[0-9a-fA-F]{40}$`
/// rule in §4.7.
pub fn parse_address(raw: &str) -> Result<Address, TypeError> {
    if raw.len() != 42 || !raw.starts_with("0x") || !raw[2..].chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(TypeError::InputInvalid(format!("invalid EVM address: {raw}")));
    }
    raw.parse()
        .map_err(|_| TypeError::InputInvalid(format!("invalid EVM address: {raw}")))
}

/// The common error taxonomy from §7. Each downstream crate wraps this (or
/// re-exports it directly) rather than inventing parallel variants.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("input invalid: {0}")]
    InputInvalid(String),
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("data inconsistent: {0}")]
    DataInconsistent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_normalizes_and_uppercases() {
        let c = Code::normalize("  hello-123_ !!").unwrap();
        assert_eq!(c.as_str(), "HELLO-123_");
    }

    #[test]
    fn code_rejects_default() {
        assert!(Code::normalize("default").is_err());
    }

    #[test]
    fn code_rejects_empty() {
        assert!(Code::normalize("!!!").is_err());
    }

    #[test]
    fn fraction_from_percent_tdf() {
        let f = Fraction::from_percent_tdf(5000).unwrap();
        assert_eq!(f.as_f64(), 0.5);
        assert!(Fraction::from_percent_tdf(10000).is_err());
    }

    #[test]
    fn address_parsing() {
        assert!(parse_address("0x0ab6C6134A1C0bf0C583Fb4DF8A01FC376F8738c").is_ok());
        assert!(parse_address("not-an-address").is_err());
        assert!(parse_address("0xdeadbeef").is_err());
    }
}
