use poet_storage::StorageError;
use std::path::PathBuf;

/// Prover errors
#[derive(thiserror::Error, Debug)]
pub enum ProverError {
    /// Cooperative cancellation. The label store is left resumable.
    #[error("shutdown requested")]
    ShutdownRequested,
    #[error("DAG not ready: {stored} of {required} labels computed")]
    DagNotReady { stored: u64, required: u64 },
    #[error("label store {} no longer exists", path.display())]
    StoreMissing { path: PathBuf },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("challenge index {index} out of range ({leaves} leaves)")]
    InvalidChallenge { index: u64, leaves: u64 },
    #[error("label store error: {0}")]
    Store(StorageError),
}

impl From<StorageError> for ProverError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::StoreMissing { path } => ProverError::StoreMissing { path },
            other => ProverError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProverError>;
