//! PoET shared types
//!
//! Plain data shared by the prover, the storage layer and the round
//! service. Nothing in here performs hashing or I/O apart from the
//! versioned [`PoetProofMessage`] codec.

pub mod label;
pub mod proof;
pub mod round;

pub use label::{label_from_slice, short_hex, Label, LABEL_SIZE};
pub use proof::{Challenge, Opening, PoetProofMessage, Proof, WireError, WIRE_VERSION};
pub use round::RoundId;

#[cfg(test)]
mod tests;
