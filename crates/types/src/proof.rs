//! Proof artifacts and the outward proof message.

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::label::Label;
use crate::round::RoundId;

/// Version byte prepended to every encoded [`PoetProofMessage`].
pub const WIRE_VERSION: u8 = 1;

/// Upper bound on an encoded proof message accepted by the decoder.
const MAX_MESSAGE_BYTES: u64 = 64 * 1024 * 1024;

/// Wire codec errors
#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("empty proof message")]
    Empty,
    #[error("unsupported proof message version {found} (expected {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },
    #[error("proof message codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// A set of sampled leaf indices, kept sorted and free of duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    indices: Vec<u64>,
}

impl Challenge {
    pub fn new<I: IntoIterator<Item = u64>>(indices: I) -> Self {
        let set: BTreeSet<u64> = indices.into_iter().collect();
        Self {
            indices: set.into_iter().collect(),
        }
    }

    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, index: u64) -> bool {
        self.indices.binary_search(&index).is_ok()
    }
}

impl FromIterator<u64> for Challenge {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        Challenge::new(iter)
    }
}

/// Opening of a single sampled leaf.
///
/// `parent_labels` are the leaf's declared parents, root side first.
/// `merkle_path` holds the sibling labels from the leaf level up to the
/// children of the root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opening {
    pub index: u64,
    pub label: Label,
    pub parent_labels: Vec<Label>,
    pub merkle_path: Vec<Label>,
}

/// Root label plus the openings for one challenge.
///
/// A proof carries no statement of its own; it is only meaningful next to
/// the statement it was computed against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub phi: Label,
    pub openings: Vec<Opening>,
}

impl Proof {
    /// Indices opened by this proof, in the order they appear.
    pub fn indices(&self) -> impl Iterator<Item = u64> + '_ {
        self.openings.iter().map(|opening| opening.index)
    }
}

/// Externally visible artifact of a finished round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoetProofMessage {
    pub round_id: String,
    pub statement: Label,
    pub members: Vec<Vec<u8>>,
    pub proof: Proof,
}

impl PoetProofMessage {
    pub fn new(round: RoundId, statement: Label, members: Vec<Vec<u8>>, proof: Proof) -> Self {
        Self {
            round_id: round.to_string(),
            statement,
            members,
            proof,
        }
    }

    /// Encode as `[WIRE_VERSION] || bincode(message)`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let body = codec().serialize(self)?;
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(WIRE_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let (version, body) = bytes.split_first().ok_or(WireError::Empty)?;
        if *version != WIRE_VERSION {
            return Err(WireError::UnsupportedVersion {
                found: *version,
                expected: WIRE_VERSION,
            });
        }
        Ok(codec().deserialize(body)?)
    }
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_MESSAGE_BYTES)
}
