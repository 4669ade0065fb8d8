use poet_storage::LabelStore;
use poet_types::{Challenge, Label, Opening, Proof};

use crate::dag::DagShape;
use crate::error::{ProverError, Result};

/// Opens sampled leaves of a completed DAG.
pub struct ProofExtractor<'a> {
    store: &'a LabelStore,
    shape: DagShape,
}

impl<'a> ProofExtractor<'a> {
    pub fn new(store: &'a LabelStore, shape: DagShape) -> Self {
        Self { store, shape }
    }

    /// Build the openings for every index of `challenge`, in ascending order.
    pub fn extract(&self, challenge: &Challenge) -> Result<Proof> {
        if self.store.is_deleted() {
            return Err(ProverError::StoreMissing {
                path: self.store.path().to_path_buf(),
            });
        }
        let required = self.shape.node_count();
        let stored = self.store.len();
        if stored < required {
            return Err(ProverError::DagNotReady { stored, required });
        }

        let openings = challenge
            .indices()
            .iter()
            .map(|&index| self.open(index))
            .collect::<Result<Vec<_>>>()?;

        Ok(Proof {
            phi: self.store.read(self.shape.root_position())?,
            openings,
        })
    }

    fn open(&self, index: u64) -> Result<Opening> {
        let leaves = self.shape.leaf_count();
        if index >= leaves {
            return Err(ProverError::InvalidChallenge { index, leaves });
        }

        let path = self.shape.leaf_path(index);
        let mut merkle_path = Vec::with_capacity(path.len());
        let mut parent_labels: Vec<Label> = Vec::new();
        for step in &path {
            let sibling = self.store.read(step.sibling)?;
            if step.sibling_is_left {
                parent_labels.push(sibling);
            }
            merkle_path.push(sibling);
        }
        parent_labels.reverse();

        Ok(Opening {
            index,
            label: self.store.read(self.shape.leaf_position(index))?,
            parent_labels,
            merkle_path,
        })
    }
}
