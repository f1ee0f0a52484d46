use thiserror::Error;

/// The chain-access error taxonomy (§7): transient RPC hiccups are retried
/// by the caller, fatal ones are not.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("input invalid: {0}")]
    InputInvalid(String),
    #[error("transient RPC failure: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<alloy_transport::TransportError> for ChainError {
    fn from(e: alloy_transport::TransportError) -> Self {
        ChainError::Transient(e.to_string())
    }
}
