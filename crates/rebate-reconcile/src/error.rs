use rebate_chain::ChainError;
use rebate_types::TypeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<TypeError> for ReconcileError {
    fn from(e: TypeError) -> Self {
        match e {
            TypeError::Transient(m) => ReconcileError::Transient(m),
            other => ReconcileError::Fatal(other.to_string()),
        }
    }
}

impl From<ChainError> for ReconcileError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Transient(m) => ReconcileError::Transient(m),
            other => ReconcileError::Fatal(other.to_string()),
        }
    }
}
