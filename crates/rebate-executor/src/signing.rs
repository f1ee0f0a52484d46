use alloy_primitives::{Address, PrimitiveSignature, B256, U256};
use rebate_sig::pay_summary_signing_hash;
use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;

/// The `PaySummary` payload the executor signs locally and forwards to the
/// remote broker for counter-signature (§4.3.2).
#[derive(Debug, Clone, Serialize)]
pub struct PaySummary {
    pub payer: Address,
    pub executor: Address,
    pub token: Address,
    pub timestamp: u64,
    pub id: u64,
    pub total_amount: U256,
    pub chain_id: u64,
    pub multi_pay_contract: Address,
}

impl PaySummary {
    fn signing_hash(&self) -> B256 {
        pay_summary_signing_hash(
            self.payer,
            self.executor,
            self.token,
            self.timestamp,
            self.id,
            self.total_amount,
            self.chain_id,
            self.multi_pay_contract,
        )
    }
}

#[derive(Debug, Serialize)]
struct SignPaymentRequest<'a> {
    payment: &'a PaySummary,
    executor_signature: String,
}

#[derive(Debug, Deserialize)]
struct SignPaymentResponse {
    broker_signature: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BrokerAddressResponse {
    broker_addr: Address,
}

/// Signs `hash` with `signing_key` using the low-level `k256` recoverable
/// ECDSA API, returning the 65-byte `0x`-prefixed signature the chain's
/// `ecrecover`-compatible verifiers expect.
fn sign_prehash(hash: B256, signing_key: &B256) -> Result<String, ExecutorError> {
    let key = k256::ecdsa::SigningKey::from_bytes(signing_key.as_slice().into())
        .map_err(|e| ExecutorError::Fatal(format!("invalid executor signing key: {e}")))?;
    let (sig, recid) = key
        .sign_prehash_recoverable(hash.as_slice())
        .map_err(|e| ExecutorError::Fatal(format!("signing failed: {e}")))?;
    let sig = PrimitiveSignature::from_signature_and_parity(sig, recid.is_y_odd());
    Ok(format!("0x{}", hex::encode(sig.as_bytes())))
}

/// HTTP client for the remote broker collaborator (§6): `GET
/// /broker-address` and `POST /sign-payment`.
pub struct RemoteBrokerClient {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteBrokerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    pub async fn broker_address(&self) -> Result<Address, ExecutorError> {
        let resp = self
            .http
            .get(format!("{}/broker-address", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        let body: BrokerAddressResponse = resp.json().await?;
        Ok(body.broker_addr)
    }

    /// Acquires the broker's counter-signature over `payment`, signing it
    /// locally with `executor_key` first. Verifies the recovered signer on
    /// the broker's response equals `payment.payer` before returning it —
    /// a non-200 status, a non-empty `error` field, or a mismatched
    /// recovered signer all abort the row (§4.3.2).
    pub async fn sign_payment(
        &self,
        payment: &PaySummary,
        executor_key: &B256,
    ) -> Result<String, ExecutorError> {
        let executor_signature = sign_prehash(payment.signing_hash(), executor_key)?;
        let resp = self
            .http
            .post(format!("{}/sign-payment", self.base_url))
            .json(&SignPaymentRequest { payment, executor_signature })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ExecutorError::RemoteBrokerRejected(format!(
                "remote broker returned status {}",
                resp.status()
            )));
        }
        let body: SignPaymentResponse = resp.json().await?;
        if let Some(err) = body.error.filter(|e| !e.is_empty()) {
            return Err(ExecutorError::RemoteBrokerRejected(err));
        }
        let broker_signature = body
            .broker_signature
            .ok_or_else(|| ExecutorError::RemoteBrokerRejected("missing broker_signature".into()))?;

        let recovered = rebate_sig::recover_eip712_address(payment.signing_hash(), &broker_signature)
            .map_err(|e| ExecutorError::SignatureInvalid(e.to_string()))?;
        if recovered != payment.payer {
            return Err(ExecutorError::SignatureInvalid(
                "broker signature does not recover to the payer address".into(),
            ));
        }
        Ok(broker_signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address as Addr;

    #[test]
    fn sign_prehash_round_trips_with_recovery() {
        let sk = B256::repeat_byte(0x42);
        let key = k256::ecdsa::SigningKey::from_bytes(sk.as_slice().into()).unwrap();
        let signer = Addr::from_public_key(key.verifying_key());
        let hash = B256::repeat_byte(0x7);
        let sig_hex = sign_prehash(hash, &sk).unwrap();
        let recovered = rebate_sig::recover_eip712_address(hash, &sig_hex).unwrap();
        assert_eq!(recovered, signer);
    }
}
