//! Spot-check verification of a proof against its statement.

use poet_crypto::HashKind;
use poet_types::{Challenge, Label, Opening, Proof};
use rand::Rng;
use std::collections::BTreeSet;
use tracing::debug;

use crate::dag::{node_label, DagShape};
use crate::Params;

/// Domain separator for Fiat-Shamir challenge derivation.
pub const NIP_DOMAIN: &[u8] = b"poet-nip-challenge-v1";

/// Verifies proofs computed against one statement.
#[derive(Clone, Debug)]
pub struct Verifier {
    statement: Label,
    params: Params,
    shape: DagShape,
}

impl Verifier {
    pub fn new(statement: Label, params: Params) -> crate::Result<Self> {
        let shape = params.shape()?;
        Ok(Self {
            statement,
            params,
            shape,
        })
    }

    pub fn statement(&self) -> &Label {
        &self.statement
    }

    /// A fresh uniformly random challenge for an interactive audit.
    pub fn random_challenge(&self) -> Challenge {
        random_challenge(self.shape, self.params.challenge_count)
    }

    /// The challenge any party holding `(statement, phi)` derives.
    pub fn noninteractive_challenge(&self, phi: &Label) -> Challenge {
        noninteractive_challenge(
            self.params.hash,
            self.shape,
            self.params.challenge_count,
            &self.statement,
            phi,
        )
    }

    /// Accept only if every opening matches `challenge` and passes both the
    /// label recomputation and the path-to-phi check.
    pub fn verify(&self, challenge: &Challenge, proof: &Proof) -> bool {
        if challenge.is_empty() || challenge.len() != proof.openings.len() {
            debug!(
                challenged = challenge.len(),
                opened = proof.openings.len(),
                "opening count does not match challenge"
            );
            return false;
        }
        challenge
            .indices()
            .iter()
            .zip(&proof.openings)
            .all(|(&index, opening)| opening.index == index && self.verify_opening(&proof.phi, opening))
    }

    /// Verify a non-interactive proof using the challenge derived from its phi.
    pub fn verify_nip(&self, proof: &Proof) -> bool {
        let challenge = self.noninteractive_challenge(&proof.phi);
        self.verify(&challenge, proof)
    }

    fn verify_opening(&self, phi: &Label, opening: &Opening) -> bool {
        if opening.index >= self.shape.leaf_count()
            || opening.merkle_path.len() != self.shape.n() as usize
        {
            return false;
        }
        let path = self.shape.leaf_path(opening.index);

        let mut expected_parents: Vec<Label> = path
            .iter()
            .zip(&opening.merkle_path)
            .filter(|(step, _)| step.sibling_is_left)
            .map(|(_, label)| *label)
            .collect();
        expected_parents.reverse();
        if expected_parents != opening.parent_labels {
            debug!(index = opening.index, "parent labels disagree with the path");
            return false;
        }

        let hash = self.params.hash;
        let position = self.shape.leaf_position(opening.index);
        if node_label(hash, &self.statement, position, &opening.parent_labels) != opening.label {
            debug!(index = opening.index, "leaf label does not recompute");
            return false;
        }

        let mut current = opening.label;
        for (step, sibling) in path.iter().zip(&opening.merkle_path) {
            let children = if step.sibling_is_left {
                [*sibling, current]
            } else {
                [current, *sibling]
            };
            current = node_label(hash, &self.statement, step.parent, &children);
        }
        if current != *phi {
            debug!(index = opening.index, "path does not lead to phi");
            return false;
        }
        true
    }
}

/// Sample `min(count, 2^n)` distinct leaves uniformly at random.
pub fn random_challenge(shape: DagShape, count: usize) -> Challenge {
    let target = challenge_size(shape, count);
    let mut rng = rand::thread_rng();
    let mut indices = BTreeSet::new();
    while indices.len() < target {
        indices.insert(rng.gen_range(0..shape.leaf_count()));
    }
    Challenge::new(indices)
}

/// Fiat-Shamir derivation of the challenge from `(statement, phi)`.
pub fn noninteractive_challenge(
    hash: HashKind,
    shape: DagShape,
    count: usize,
    statement: &Label,
    phi: &Label,
) -> Challenge {
    let target = challenge_size(shape, count);
    let mut indices = BTreeSet::new();
    let mut counter = 0u64;
    while indices.len() < target {
        let mut hasher = hash.hasher();
        hasher
            .update(NIP_DOMAIN)
            .update(statement)
            .update(phi)
            .update(&counter.to_be_bytes());
        let digest = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        indices.insert(u64::from_be_bytes(word) % shape.leaf_count());
        counter += 1;
    }
    Challenge::new(indices)
}

fn challenge_size(shape: DagShape, count: usize) -> usize {
    let leaves = usize::try_from(shape.leaf_count()).unwrap_or(usize::MAX);
    count.min(leaves)
}
