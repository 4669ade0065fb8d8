use poet_crypto::HashKind;
use poet_prover::{Params, DEFAULT_CHALLENGE_COUNT, MAX_N};
use poet_types::RoundId;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ServiceError;

/// Configuration consumed by the round manager.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Security parameter of every round's DAG.
    pub n: u32,
    pub hash: HashKind,
    pub round_duration: Duration,
    pub challenge_count: usize,
    /// Holds the round database and one label store per executing round.
    pub data_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            n: 3,
            hash: HashKind::Sha256,
            round_duration: Duration::from_secs(30),
            challenge_count: DEFAULT_CHALLENGE_COUNT,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.n == 0 || self.n > MAX_N {
            return Err(ServiceError::InvalidConfig(format!(
                "n must be between 1 and {MAX_N}, got {}",
                self.n
            )));
        }
        if self.round_duration.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "round duration must be positive".into(),
            ));
        }
        if self.challenge_count == 0 {
            return Err(ServiceError::InvalidConfig(
                "challenge_count must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn params(&self) -> Params {
        Params::new(self.n, self.hash).with_challenge_count(self.challenge_count)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    pub fn labels_dir(&self) -> PathBuf {
        self.data_dir.join("labels")
    }

    pub fn label_path(&self, round: RoundId) -> PathBuf {
        self.labels_dir().join(format!("round-{round}.labels"))
    }

    pub fn round_duration_ms(&self) -> u64 {
        u64::try_from(self.round_duration.as_millis()).unwrap_or(u64::MAX)
    }
}
