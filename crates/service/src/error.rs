use poet_crypto::MerkleError;
use poet_prover::ProverError;
use poet_storage::StorageError;
use poet_types::{RoundId, WireError};

/// Service errors
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    /// The submission raced a round boundary. Retry against `open_round`.
    #[error("round already closed (open round: {open_round:?})")]
    AlreadyClosed { open_round: Option<RoundId> },
    #[error("service not started")]
    NotStarted,
    #[error("service already started")]
    AlreadyStarted,
    #[error("shutdown requested")]
    ShutdownRequested,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),
    #[error("prover error: {0}")]
    Prover(ProverError),
    #[error("statement commitment failed: {0}")]
    Statement(#[from] MerkleError),
    #[error("proof message encoding failed: {0}")]
    Wire(#[from] WireError),
    #[error("broadcast failed: {0}")]
    Broadcast(#[from] BroadcastError),
    #[error("execution task failed: {0}")]
    Task(String),
}

impl From<ProverError> for ServiceError {
    fn from(err: ProverError) -> Self {
        match err {
            ProverError::ShutdownRequested => ServiceError::ShutdownRequested,
            other => ServiceError::Prover(other),
        }
    }
}

/// Broadcaster errors
#[derive(thiserror::Error, Debug)]
pub enum BroadcastError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("target responded with status {0}")]
    Status(u16),
    #[error("target did not acknowledge the proof: {0:?}")]
    Rejected(String),
    #[error("{0}")]
    Other(String),
}
