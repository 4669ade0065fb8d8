//! Cryptographic primitives for the PoET service.
//!
//! The hash primitive is pluggable: every label, statement and challenge
//! derivation goes through [`HashKind`], selected by the configured hash
//! function identifier.

pub mod hash_functions;
pub mod merkle_trees;

pub use hash_functions::{HashFunction, HashKind, LabelHasher, UnknownHashFunction};
pub use merkle_trees::{MerkleError, MerkleProof, MerkleTree};
