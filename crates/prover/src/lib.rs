//! PoET prover
//!
//! Computes the sequential-work DAG for a statement into a durable
//! [`LabelStore`], extracts openings for sampled leaves, and verifies them.
//! See [`dag`] for the dependency schedule.

use poet_crypto::HashKind;
use poet_storage::LabelStore;
use poet_types::{Challenge, Label, Proof};
use std::path::Path;

pub mod dag;
pub mod engine;
pub mod error;
pub mod proof;
pub mod signal;
pub mod verifier;

pub use dag::{node_label, DagShape, PathStep, MAX_N};
pub use engine::{DagEngine, CHECKPOINT_INTERVAL};
pub use error::{ProverError, Result};
pub use proof::ProofExtractor;
pub use signal::ShutdownSignal;
pub use verifier::{noninteractive_challenge, random_challenge, Verifier, NIP_DOMAIN};

/// Default number of leaves opened per proof.
pub const DEFAULT_CHALLENGE_COUNT: usize = 150;

/// Parameters shared by prover and verifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Params {
    /// Security parameter: the DAG has `2^(n+1) - 1` nodes.
    pub n: u32,
    pub hash: HashKind,
    /// Leaves opened per challenge (capped at `2^n`).
    pub challenge_count: usize,
}

impl Params {
    pub fn new(n: u32, hash: HashKind) -> Self {
        Self {
            n,
            hash,
            challenge_count: DEFAULT_CHALLENGE_COUNT,
        }
    }

    pub fn with_challenge_count(mut self, challenge_count: usize) -> Self {
        self.challenge_count = challenge_count;
        self
    }

    pub fn shape(&self) -> Result<DagShape> {
        if self.challenge_count == 0 {
            return Err(ProverError::InvalidParameter(
                "challenge_count must be at least 1".into(),
            ));
        }
        DagShape::new(self.n)
    }
}

/// A statement bound to its label store.
pub struct Prover {
    statement: Label,
    params: Params,
    shape: DagShape,
    engine: DagEngine,
    store: LabelStore,
}

impl Prover {
    pub fn new(statement: Label, params: Params, store: LabelStore) -> Result<Self> {
        let shape = params.shape()?;
        Ok(Self {
            statement,
            params,
            shape,
            engine: DagEngine::new(statement, shape, params.hash),
            store,
        })
    }

    /// Open (or create) the label store at `path` and bind it to `statement`.
    pub fn open<P: AsRef<Path>>(statement: Label, params: Params, path: P) -> Result<Self> {
        let store = LabelStore::open(path)?;
        Self::new(statement, params, store)
    }

    pub fn statement(&self) -> &Label {
        &self.statement
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn shape(&self) -> DagShape {
        self.shape
    }

    pub fn stored_labels(&self) -> u64 {
        self.store.len()
    }

    pub fn is_complete(&self) -> bool {
        self.store.len() >= self.shape.node_count()
    }

    /// Compute (or finish computing) the DAG and return phi.
    pub fn compute(&mut self, signal: &ShutdownSignal) -> Result<Label> {
        self.engine.compute(&mut self.store, signal)
    }

    pub fn phi(&self) -> Result<Label> {
        if self.store.is_deleted() {
            return Err(ProverError::StoreMissing {
                path: self.store.path().to_path_buf(),
            });
        }
        if !self.is_complete() {
            return Err(ProverError::DagNotReady {
                stored: self.store.len(),
                required: self.shape.node_count(),
            });
        }
        Ok(self.store.read(self.shape.root_position())?)
    }

    /// Openings for an interactively supplied challenge.
    pub fn proof(&self, challenge: &Challenge) -> Result<Proof> {
        ProofExtractor::new(&self.store, self.shape).extract(challenge)
    }

    /// Non-interactive proof: the challenge is derived from `(statement, phi)`.
    pub fn nip(&self) -> Result<(Challenge, Proof)> {
        let phi = self.phi()?;
        let challenge = noninteractive_challenge(
            self.params.hash,
            self.shape,
            self.params.challenge_count,
            &self.statement,
            &phi,
        );
        let proof = self.proof(&challenge)?;
        Ok((challenge, proof))
    }

    /// Delete the label store. Further proof requests fail with `StoreMissing`.
    pub fn clean(&mut self) -> Result<()> {
        self.store.delete()?;
        Ok(())
    }
}
