//! Hash functions for PoET
//!
//! Provides the SHA256 and Blake3 primitives behind a common trait, plus an
//! incremental [`LabelHasher`] used on the hot path of DAG computation.

use poet_types::{Label, LABEL_SIZE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Trait for hash functions
pub trait HashFunction {
    /// Hash input data and return the result
    fn hash(&self, data: &[u8]) -> Vec<u8>;

    /// Hash the concatenation of `parts` into a fixed-size label
    fn hash_parts(&self, parts: &[&[u8]]) -> Label;

    /// Get the output size of the hash function
    fn output_size(&self) -> usize;

    /// Get the name of the hash function
    fn name(&self) -> &'static str;
}

/// Hash function identifier accepted in configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    #[default]
    Sha256,
    Blake3,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown hash function '{0}' (expected sha256 or blake3)")]
pub struct UnknownHashFunction(pub String);

impl HashKind {
    /// Start an incremental hash computation.
    pub fn hasher(self) -> LabelHasher {
        match self {
            HashKind::Sha256 => LabelHasher::Sha256(Sha256::new()),
            HashKind::Blake3 => LabelHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl HashFunction for HashKind {
    fn hash(&self, data: &[u8]) -> Vec<u8> {
        self.hash_parts(&[data]).to_vec()
    }

    fn hash_parts(&self, parts: &[&[u8]]) -> Label {
        let mut hasher = self.hasher();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize()
    }

    fn output_size(&self) -> usize {
        LABEL_SIZE
    }

    fn name(&self) -> &'static str {
        match self {
            HashKind::Sha256 => "sha256",
            HashKind::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashKind {
    type Err = UnknownHashFunction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashKind::Sha256),
            "blake3" => Ok(HashKind::Blake3),
            other => Err(UnknownHashFunction(other.to_string())),
        }
    }
}

/// Incremental hasher producing a 32-byte label.
pub enum LabelHasher {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl LabelHasher {
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        match self {
            LabelHasher::Sha256(h) => h.update(data),
            LabelHasher::Blake3(h) => {
                h.update(data);
            }
        }
        self
    }

    pub fn finalize(self) -> Label {
        match self {
            LabelHasher::Sha256(h) => {
                let mut label = [0u8; LABEL_SIZE];
                label.copy_from_slice(&h.finalize());
                label
            }
            LabelHasher::Blake3(h) => *h.finalize().as_bytes(),
        }
    }
}
