use poet_types::{Label, RoundId};
use std::sync::Arc;

use crate::error::ServiceError;

/// Notifications published by the round manager.
///
/// An executing round either reaches `ExecutionEnded` or fails with
/// `RoundFailed`. After `ExecutionEnded` the round ends with
/// `ProofBroadcast`, or with `RoundFailed` when delivery fails and is left
/// for the next start. `RoundFailed` is also published for an open round
/// whose successor could not be created; that round stays open.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    RoundOpened { round: RoundId, deadline_ms: u64 },
    ExecutionStarted { round: RoundId, statement: Label },
    ExecutionEnded { round: RoundId, phi: Label },
    ProofBroadcast { round: RoundId },
    RoundFailed { round: RoundId, error: Arc<ServiceError> },
}

impl ServiceEvent {
    pub fn round(&self) -> RoundId {
        match self {
            ServiceEvent::RoundOpened { round, .. }
            | ServiceEvent::ExecutionStarted { round, .. }
            | ServiceEvent::ExecutionEnded { round, .. }
            | ServiceEvent::ProofBroadcast { round }
            | ServiceEvent::RoundFailed { round, .. } => *round,
        }
    }
}
