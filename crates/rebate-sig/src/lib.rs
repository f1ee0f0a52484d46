//! EIP-712/EIP-191 signature verification for the three graph mutation
//! payloads (§4.7) and the executor's own remote-signature payload
//! (§4.3.2).
//!
//! Verification recovers the EIP-712 typed-data signer first; if that
//! doesn't match the claimed address it falls back to recovering an EIP-191
//! personal-message signer over the same ABI-encoded fields — most wallets
//! sign EIP-191, not raw EIP-712 domains, so the fallback is the common path
//! in practice, not a rare edge case.

use alloy_primitives::{eip191_hash_message, keccak256, Address, PrimitiveSignature, B256, U256};
use alloy_sol_macro::sol;
use alloy_sol_types::{eip712_domain, Eip712Domain, SolStruct};
use chrono::Utc;
use rebate_types::TypeError;
use thiserror::Error;

pub const REFERRAL_DOMAIN: Eip712Domain = eip712_domain!(name: "Referral System",);

/// Window around "now" within which a payload's `created_on` is accepted.
pub const TIMESTAMP_SKEW_SECS: i64 = 300;

sol! {
    #[derive(Debug)]
    struct CodeSelect {
        string code;
        address traderAddr;
        uint256 createdOn;
    }

    #[derive(Debug)]
    struct NewReferral {
        address parentAddr;
        address referToAddr;
        uint32 passOnPercTdf;
        uint256 createdOn;
    }

    #[derive(Debug)]
    struct NewCode {
        string code;
        address referrerAddr;
        uint32 passOnPercTdf;
        uint256 createdOn;
    }

    #[derive(Debug)]
    struct PaySummary {
        address payer;
        address executor;
        address token;
        uint256 timestamp;
        uint256 id;
        uint256 totalAmount;
        uint256 chainId;
        address multiPayContract;
    }
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("recovered signer does not match the claimed address")]
    AddressMismatch,
}

impl From<SignatureError> for TypeError {
    fn from(e: SignatureError) -> Self {
        TypeError::SignatureInvalid(e.to_string())
    }
}

/// `true` if `created_on` (unix seconds) is within [`TIMESTAMP_SKEW_SECS`] of
/// the current time, matching the broker's freshness check on every
/// graph-mutating payload.
pub fn is_current_timestamp(created_on: i64) -> bool {
    let now = Utc::now().timestamp();
    (now - TIMESTAMP_SKEW_SECS..now + TIMESTAMP_SKEW_SECS).contains(&created_on)
}

fn parse_signature(sig_hex: &str) -> Result<PrimitiveSignature, SignatureError> {
    let trimmed = sig_hex.trim_start_matches("0x");
    let bytes = hex::decode(trimmed)
        .map_err(|e| SignatureError::Malformed(format!("not valid hex: {e}")))?;
    PrimitiveSignature::from_raw(&bytes).map_err(|e| SignatureError::Malformed(e.to_string()))
}

/// Recovers the EIP-712 typed-data signer of `hash` — used directly by the
/// executor to check a remote-signed `PaySummary` (§4.3.2), which has no
/// EIP-191 fallback since the executor produces that signature itself.
pub fn recover_eip712_address(hash: B256, signature: &str) -> Result<Address, SignatureError> {
    let sig = parse_signature(signature)?;
    sig.recover_address_from_prehash(&hash)
        .map_err(|e| SignatureError::Malformed(e.to_string()))
}

/// Verifies `eip712_hash`/`eip191_digest` were signed by `claimed` per §4.7's
/// three-step recovery: accept on an EIP-712 match, else recompute the
/// EIP-191 personal-message hash of `eip191_digest` and accept on that
/// match, else reject.
fn verify(
    eip712_hash: B256,
    eip191_digest: B256,
    signature: &str,
    claimed: Address,
) -> Result<(), SignatureError> {
    let sig = parse_signature(signature)?;
    if let Ok(addr) = sig.recover_address_from_prehash(&eip712_hash) {
        if addr == claimed {
            return Ok(());
        }
    }
    let wrapped = eip191_hash_message(eip191_digest.as_slice());
    match sig.recover_address_from_prehash(&wrapped) {
        Ok(addr) if addr == claimed => Ok(()),
        _ => Err(SignatureError::AddressMismatch),
    }
}

fn abi_word_address(addr: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_slice());
    word
}

fn abi_word_uint(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

/// ABI-encodes a tuple whose only dynamic member is a leading `string`,
/// followed by `static_words` already-encoded static words — matches
/// `abi.Arguments.Pack` for `(string, ...statics)`.
fn abi_encode_string_then_statics(s: &str, static_words: &[[u8; 32]]) -> Vec<u8> {
    let head_words = 1 + static_words.len();
    let string_offset = U256::from(head_words * 32);

    let mut out = Vec::new();
    out.extend_from_slice(&abi_word_uint(string_offset));
    for w in static_words {
        out.extend_from_slice(w);
    }

    out.extend_from_slice(&abi_word_uint(U256::from(s.len())));
    out.extend_from_slice(s.as_bytes());
    let padding = (32 - (s.len() % 32)) % 32;
    out.extend(std::iter::repeat_n(0u8, padding));
    out
}

fn code_select_digest(code: &str, trader_addr: Address, created_on: U256) -> B256 {
    let encoded = abi_encode_string_then_statics(
        code,
        &[abi_word_address(trader_addr), abi_word_uint(created_on)],
    );
    keccak256(encoded)
}

fn referral_digest(
    parent_addr: Address,
    refer_to_addr: Address,
    pass_on_perc_tdf: u32,
    created_on: U256,
) -> B256 {
    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(&abi_word_address(parent_addr));
    buf.extend_from_slice(&abi_word_address(refer_to_addr));
    buf.extend_from_slice(&abi_word_uint(U256::from(pass_on_perc_tdf)));
    buf.extend_from_slice(&abi_word_uint(created_on));
    keccak256(buf)
}

fn code_digest(code: &str, referrer_addr: Address, pass_on_perc_tdf: u32, created_on: U256) -> B256 {
    let encoded = abi_encode_string_then_statics(
        code,
        &[
            abi_word_address(referrer_addr),
            abi_word_uint(U256::from(pass_on_perc_tdf)),
            abi_word_uint(created_on),
        ],
    );
    keccak256(encoded)
}

/// Verifies a trader's code-selection payload was signed by `claimed`.
pub fn verify_code_select_sig(
    code: &str,
    trader_addr: Address,
    created_on: u64,
    signature: &str,
    claimed: Address,
) -> Result<(), SignatureError> {
    let created_on_u256 = U256::from(created_on);
    let payload = CodeSelect {
        code: code.to_string(),
        traderAddr: trader_addr,
        createdOn: created_on_u256,
    };
    verify(
        payload.eip712_signing_hash(&REFERRAL_DOMAIN),
        code_select_digest(code, trader_addr, created_on_u256),
        signature,
        claimed,
    )
}

/// Verifies a referral (pass-on) payload was signed by `claimed`.
pub fn verify_referral_sig(
    parent_addr: Address,
    refer_to_addr: Address,
    pass_on_perc_tdf: u32,
    created_on: u64,
    signature: &str,
    claimed: Address,
) -> Result<(), SignatureError> {
    let created_on_u256 = U256::from(created_on);
    let payload = NewReferral {
        parentAddr: parent_addr,
        referToAddr: refer_to_addr,
        passOnPercTdf: pass_on_perc_tdf,
        createdOn: created_on_u256,
    };
    verify(
        payload.eip712_signing_hash(&REFERRAL_DOMAIN),
        referral_digest(parent_addr, refer_to_addr, pass_on_perc_tdf, created_on_u256),
        signature,
        claimed,
    )
}

/// Verifies a code-creation (upsert) payload was signed by `claimed`.
pub fn verify_code_sig(
    code: &str,
    referrer_addr: Address,
    pass_on_perc_tdf: u32,
    created_on: u64,
    signature: &str,
    claimed: Address,
) -> Result<(), SignatureError> {
    let created_on_u256 = U256::from(created_on);
    let payload = NewCode {
        code: code.to_string(),
        referrerAddr: referrer_addr,
        passOnPercTdf: pass_on_perc_tdf,
        createdOn: created_on_u256,
    };
    verify(
        payload.eip712_signing_hash(&REFERRAL_DOMAIN),
        code_digest(code, referrer_addr, pass_on_perc_tdf, created_on_u256),
        signature,
        claimed,
    )
}

/// Builds the EIP-712 signing hash for the executor's own remote-signature
/// request (§4.3.2).
#[allow(clippy::too_many_arguments)]
pub fn pay_summary_signing_hash(
    payer: Address,
    executor: Address,
    token: Address,
    timestamp: u64,
    id: u64,
    total_amount: U256,
    chain_id: u64,
    multi_pay_contract: Address,
) -> B256 {
    let payload = PaySummary {
        payer,
        executor,
        token,
        timestamp: U256::from(timestamp),
        id: U256::from(id),
        totalAmount: total_amount,
        chainId: U256::from(chain_id),
        multiPayContract: multi_pay_contract,
    };
    payload.eip712_signing_hash(&REFERRAL_DOMAIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    // Self-generated test fixtures, not on-chain keys or data.
    fn address_of(signing_key: &B256) -> Address {
        let key = k256::ecdsa::SigningKey::from_bytes(signing_key.as_slice().into()).unwrap();
        Address::from_public_key(key.verifying_key())
    }

    fn sign_prehash(hash: B256, signing_key: &B256) -> String {
        let key = k256::ecdsa::SigningKey::from_bytes(signing_key.as_slice().into()).unwrap();
        let (sig, recid) = key.sign_prehash_recoverable(hash.as_slice()).unwrap();
        let sig = PrimitiveSignature::from_signature_and_parity(sig, recid.is_y_odd());
        format!("0x{}", hex::encode(sig.as_bytes()))
    }

    #[test]
    fn accepts_eip712_signed_code_select() {
        let sk = B256::repeat_byte(0x11);
        let signer = address_of(&sk);
        let trader = address!("0000000000000000000000000000000000000001");
        let payload = CodeSelect {
            code: "ABC".to_string(),
            traderAddr: trader,
            createdOn: U256::from(1_700_000_000u64),
        };
        let hash = payload.eip712_signing_hash(&REFERRAL_DOMAIN);
        let sig = sign_prehash(hash, &sk);
        assert!(verify_code_select_sig("ABC", trader, 1_700_000_000, &sig, signer).is_ok());
    }

    #[test]
    fn falls_back_to_eip191_for_referral_when_eip712_signer_mismatches() {
        let sk = B256::repeat_byte(0x22);
        let signer = address_of(&sk);
        let parent = address!("0000000000000000000000000000000000000002");
        let child = address!("0000000000000000000000000000000000000003");
        let digest = referral_digest(parent, child, 5000, U256::from(1_700_000_000u64));
        let wrapped = eip191_hash_message(digest.as_slice());
        let sig = sign_prehash(wrapped, &sk);
        assert!(verify_referral_sig(parent, child, 5000, 1_700_000_000, &sig, signer).is_ok());
    }

    #[test]
    fn falls_back_to_eip191_for_code_with_dynamic_string() {
        let sk = B256::repeat_byte(0x33);
        let signer = address_of(&sk);
        let referrer = address!("0000000000000000000000000000000000000004");
        let digest = code_digest("REFCODE", referrer, 1234, U256::from(1_700_000_000u64));
        let wrapped = eip191_hash_message(digest.as_slice());
        let sig = sign_prehash(wrapped, &sk);
        assert!(verify_code_sig("REFCODE", referrer, 1234, 1_700_000_000, &sig, signer).is_ok());
    }

    #[test]
    fn rejects_signature_from_the_wrong_signer() {
        let sk = B256::repeat_byte(0x44);
        let trader = address!("0000000000000000000000000000000000000001");
        let payload = CodeSelect {
            code: "ABC".to_string(),
            traderAddr: trader,
            createdOn: U256::from(1_700_000_000u64),
        };
        let hash = payload.eip712_signing_hash(&REFERRAL_DOMAIN);
        let sig = sign_prehash(hash, &sk);
        let someone_else = address!("0000000000000000000000000000000000000099");
        assert!(verify_code_select_sig("ABC", trader, 1_700_000_000, &sig, someone_else).is_err());
    }

    #[test]
    fn rejects_garbage_signature() {
        assert!(verify_code_select_sig(
            "ABC",
            address!("0000000000000000000000000000000000000001"),
            1_700_000_000,
            "0xdeadbeef",
            address!("0000000000000000000000000000000000000001"),
        )
        .is_err());
    }

    #[test]
    fn timestamp_freshness_window() {
        let now = Utc::now().timestamp();
        assert!(is_current_timestamp(now));
        assert!(!is_current_timestamp(now - 3600));
        assert!(!is_current_timestamp(now + 3600));
    }
}
