//! The on-chain memo codec (spec §4.6): a deterministic substitution cipher
//! over the 38-symbol alphabet `A-Z0-9-_`, plus the versioned
//! `batchTs.code.poolId.version` wire format and the v0 legacy format.
//!
//! The substitution table is a *pinned* permutation, not one regenerated
//! from a PRNG at build time: changing the permutation algorithm would
//! silently break decoding of every memo emitted by an older binary, so the
//! table below is wire-stable data, checked in verbatim.

use once_cell::sync::Lazy;
use regex::Regex;

pub const ENCODING_VERSION: u32 = 1;

const ALPHABET: [char; 38] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S',
    'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '-', '_',
];

/// `ALPHABET[i]` obfuscates to `SHUFFLED[i]`. Pinned permutation of the
/// alphabet above (seed 42, fixed forever — see module docs).
const SHUFFLED: [char; 38] = [
    'L', '7', 'K', '6', '8', '3', 'M', 'F', 'Z', '4', '1', 'E', 'J', 'T', 'D', 'Y', 'U', 'W', 'Q',
    '_', '5', '0', 'A', '-', 'N', 'S', 'C', '9', '2', 'X', 'V', 'G', 'I', 'O', 'P', 'R', 'B', 'H',
];

fn alphabet_index(c: char) -> Option<usize> {
    ALPHABET.iter().position(|&a| a == c)
}

fn shuffled_index(c: char) -> Option<usize> {
    SHUFFLED.iter().position(|&s| s == c)
}

/// Index of `-` in `ALPHABET`, used as the fallback obfuscated symbol for
/// any input character outside the alphabet.
fn fallback_obstructed() -> char {
    let dash_idx = alphabet_index('-').expect("'-' is in the alphabet");
    SHUFFLED[dash_idx]
}

fn obstruct_char(c: char) -> char {
    match alphabet_index(c) {
        Some(idx) => SHUFFLED[idx],
        None => fallback_obstructed(),
    }
}

fn deobstruct_char(c: char) -> char {
    match shuffled_index(c) {
        Some(idx) => ALPHABET[idx],
        None => c,
    }
}

/// Obfuscates a code consisting of `[A-Z0-9_-]` characters.
pub fn obstruct_code(code: &str) -> String {
    code.chars().map(obstruct_char).collect()
}

/// Reverses [`obstruct_code`].
pub fn deobstruct_code(obstructed: &str) -> String {
    obstructed.chars().map(deobstruct_char).collect()
}

/// Encodes `batchTs.code.poolId.version` — only the code segment is run
/// through the cipher; the dots and numeric fields are left as literal
/// punctuation.
pub fn encode_payment_info(batch_ts: u64, code: &str, pool_id: u32) -> String {
    format!(
        "{batch_ts}.{}.{pool_id}.{ENCODING_VERSION}",
        obstruct_code(code)
    )
}

/// A memo decoded off-chain, either in the current versioned format or the
/// legacy v0 format (no obfuscation, no version field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMemo {
    V0 {
        batch_ts: String,
        code: String,
        pool_id: String,
    },
    V1 {
        batch_ts: String,
        code: String,
        pool_id: String,
        version: String,
    },
}

impl DecodedMemo {
    pub fn code(&self) -> &str {
        match self {
            DecodedMemo::V0 { code, .. } | DecodedMemo::V1 { code, .. } => code,
        }
    }

    pub fn batch_ts(&self) -> &str {
        match self {
            DecodedMemo::V0 { batch_ts, .. } | DecodedMemo::V1 { batch_ts, .. } => batch_ts,
        }
    }

    pub fn pool_id(&self) -> &str {
        match self {
            DecodedMemo::V0 { pool_id, .. } | DecodedMemo::V1 { pool_id, .. } => pool_id,
        }
    }
}

static V1_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.[A-Z0-9_-]+\.\d+\.\d+$").unwrap());
static V0_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.[A-Z0-9_-]+\.\d+$").unwrap());

fn is_msg_version_current(msg: &str) -> bool {
    msg.rsplit('.')
        .next()
        .and_then(|v| v.parse::<u32>().ok())
        .is_some_and(|v| v == ENCODING_VERSION)
}

/// Decodes an on-chain memo, trying the current v1 (obfuscated, versioned)
/// format first and falling back to the v0 legacy format. Returns `None` for
/// anything that matches neither.
pub fn decode_payment_info(msg: &str) -> Option<DecodedMemo> {
    if V1_PATTERN.is_match(msg) && is_msg_version_current(msg) {
        let parts: Vec<&str> = msg.split('.').collect();
        let code = deobstruct_code(parts[1]);
        return Some(DecodedMemo::V1 {
            batch_ts: parts[0].to_string(),
            code,
            pool_id: parts[2].to_string(),
            version: parts[3].to_string(),
        });
    }
    if V0_PATTERN.is_match(msg) {
        let parts: Vec<&str> = msg.split('.').collect();
        return Some(DecodedMemo::V0 {
            batch_ts: parts[0].to_string(),
            code: parts[1].to_string(),
            pool_id: parts[2].to_string(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permutation_is_a_bijection() {
        let mut seen = [false; 38];
        for &c in SHUFFLED.iter() {
            let idx = alphabet_index(c).expect("shuffled symbol must be in alphabet");
            assert!(!seen[idx], "duplicate mapping for {c}");
            seen[idx] = true;
        }
    }

    #[test]
    fn obstruct_round_trips_every_alphabet_char() {
        for &c in ALPHABET.iter() {
            assert_eq!(deobstruct_char(obstruct_char(c)), c);
        }
    }

    #[test]
    fn encode_then_decode_v1() {
        let encoded = encode_payment_info(1699702424, "HELLO-123_", 1);
        let decoded = decode_payment_info(&encoded).expect("should decode");
        assert_eq!(
            decoded,
            DecodedMemo::V1 {
                batch_ts: "1699702424".into(),
                code: "HELLO-123_".into(),
                pool_id: "1".into(),
                version: "1".into(),
            }
        );
    }

    #[test]
    fn decodes_v0_legacy_format_untransformed() {
        let decoded = decode_payment_info("1699702424.HELLO.1").unwrap();
        assert_eq!(
            decoded,
            DecodedMemo::V0 {
                batch_ts: "1699702424".into(),
                code: "HELLO".into(),
                pool_id: "1".into(),
            }
        );
    }

    #[test]
    fn unknown_version_is_rejected_as_v1_but_not_v0() {
        assert!(decode_payment_info("123.CODE.1.99").is_none());
    }

    #[test]
    fn garbage_decodes_to_none() {
        assert!(decode_payment_info("not-a-memo").is_none());
    }

    proptest::proptest! {
        #[test]
        fn round_trip_over_full_alphabet(
            code in "[A-Z0-9_-]{1,20}",
            batch_ts in 0u64..10_000_000_000,
            pool_id in 0u32..1000,
        ) {
            let encoded = encode_payment_info(batch_ts, &code, pool_id);
            let decoded = decode_payment_info(&encoded).unwrap();
            proptest::prop_assert_eq!(decoded.code(), code);
            proptest::prop_assert_eq!(decoded.batch_ts(), batch_ts.to_string());
            proptest::prop_assert_eq!(decoded.pool_id(), pool_id.to_string());
        }
    }
}
