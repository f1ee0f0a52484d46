use std::time::Duration;

use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use alloy_transport::BoxTransport;
use rand::Rng;
use tracing::{info, instrument};

use crate::error::ChainError;

const MAX_DIAL_RETRIES: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// A connected JSON-RPC provider plus the endpoint list it was dialed from,
/// used to rotate to a different node on repeated transient failure. The
/// transport is boxed so callers can stay generic over plain `Provider`
/// rather than a concrete `Http<Client>` transport.
#[derive(Clone)]
pub struct ChainClient {
    provider: RootProvider<BoxTransport>,
    endpoints: Vec<String>,
}

impl ChainClient {
    /// Dials a random endpoint from `endpoints`, retrying the remaining list
    /// on failure up to [`MAX_DIAL_RETRIES`] times with a fixed backoff —
    /// mirrors the broker's own RPC-client bring-up.
    #[instrument(skip(endpoints))]
    pub async fn connect(endpoints: Vec<String>) -> Result<Self, ChainError> {
        if endpoints.is_empty() {
            return Err(ChainError::InputInvalid("no RPC endpoints configured".into()));
        }
        let mut last_err = None;
        for trial in 0..=MAX_DIAL_RETRIES {
            let idx = rand::thread_rng().gen_range(0..endpoints.len());
            let url = &endpoints[idx];
            match url.parse() {
                Ok(parsed) => {
                    let provider = ProviderBuilder::new().on_http(parsed).boxed();
                    match provider.get_chain_id().await {
                        Ok(_) => {
                            return Ok(Self { provider, endpoints });
                        }
                        Err(e) => last_err = Some(e.to_string()),
                    }
                }
                Err(e) => last_err = Some(e.to_string()),
            }
            if trial == MAX_DIAL_RETRIES {
                break;
            }
            info!(attempt = trial, error = ?last_err, "rpc dial failed, retrying");
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
        Err(ChainError::Fatal(format!(
            "could not dial any RPC endpoint after {MAX_DIAL_RETRIES} retries: {}",
            last_err.unwrap_or_default()
        )))
    }

    /// Rotates to a new randomly chosen endpoint from the same pool —
    /// called when a batch's RPC calls start failing mid-flight.
    pub async fn rotate(&mut self) -> Result<(), ChainError> {
        *self = Self::connect(self.endpoints.clone()).await?;
        Ok(())
    }

    pub fn provider(&self) -> &RootProvider<BoxTransport> {
        &self.provider
    }
}
