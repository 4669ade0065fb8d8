//! PoET round service
//!
//! [`RoundManager`] batches client challenges into fixed-duration rounds.
//! When a round closes its members are committed to a Merkle root (the
//! round statement) and a prover computes the sequential-work DAG over it
//! in the background. The finished [`PoetProofMessage`](poet_types::PoetProofMessage)
//! is persisted and handed to a [`Broadcaster`].

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
mod round;
mod service;

pub use broadcaster::{
    from_target, Broadcaster, HttpBroadcaster, NoopBroadcaster, DEFAULT_BROADCAST_TIMEOUT,
    NO_BROADCAST,
};
pub use config::ServiceConfig;
pub use error::{BroadcastError, ServiceError};
pub use events::ServiceEvent;
pub use service::{RoundManager, ServiceInfo};
