use rebate_chain::ChainError;
use rebate_types::TypeError;
use thiserror::Error;

/// The executor's own error taxonomy (§7), layering on top of the chain and
/// type-level error kinds it consumes.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("input invalid: {0}")]
    InputInvalid(String),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("remote broker rejected the payment: {0}")]
    RemoteBrokerRejected(String),
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<TypeError> for ExecutorError {
    fn from(e: TypeError) -> Self {
        match e {
            TypeError::InputInvalid(m) => ExecutorError::InputInvalid(m),
            TypeError::SignatureInvalid(m) => ExecutorError::SignatureInvalid(m),
            TypeError::Transient(m) => ExecutorError::Transient(m),
            other => ExecutorError::Fatal(other.to_string()),
        }
    }
}

impl From<ChainError> for ExecutorError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::InputInvalid(m) => ExecutorError::InputInvalid(m),
            ChainError::Transient(m) => ExecutorError::Transient(m),
            ChainError::Fatal(m) => ExecutorError::Fatal(m),
        }
    }
}

impl From<reqwest::Error> for ExecutorError {
    fn from(e: reqwest::Error) -> Self {
        ExecutorError::Transient(e.to_string())
    }
}
