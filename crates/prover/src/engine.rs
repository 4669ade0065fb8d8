use poet_crypto::HashKind;
use poet_storage::LabelStore;
use poet_types::{short_hex, Label};
use tracing::{debug, info, warn};

use crate::dag::{node_label, DagShape};
use crate::error::{ProverError, Result};
use crate::signal::ShutdownSignal;

/// Labels produced between two durability checkpoints. The shutdown signal
/// is polled at the same granularity.
pub const CHECKPOINT_INTERVAL: u64 = 4096;

/// Sequential label computation for one statement.
#[derive(Clone, Debug)]
pub struct DagEngine {
    statement: Label,
    shape: DagShape,
    hash: HashKind,
}

impl DagEngine {
    pub fn new(statement: Label, shape: DagShape, hash: HashKind) -> Self {
        Self {
            statement,
            shape,
            hash,
        }
    }

    /// Produce the remaining labels into `store` and return phi.
    ///
    /// Whatever `store` already holds is trusted as a verified prefix and
    /// computation continues after it. On shutdown the store is synced and
    /// [`ProverError::ShutdownRequested`] is returned; calling `compute`
    /// again later resumes from the same point.
    pub fn compute(&self, store: &mut LabelStore, signal: &ShutdownSignal) -> Result<Label> {
        let total = self.shape.node_count();
        if store.len() > total {
            warn!(
                stored = store.len(),
                total,
                "label store longer than the DAG, truncating"
            );
            store.truncate(total)?;
        }

        let resumed = store.len();
        if signal.is_shutdown_requested() && resumed < total {
            return Err(ProverError::ShutdownRequested);
        }
        let mut stack: Vec<(u32, Label)> = self
            .shape
            .frontier(resumed)
            .into_iter()
            .map(|(height, position)| Ok((height, store.read(position)?)))
            .collect::<Result<_>>()?;

        if resumed > 0 {
            info!(
                statement = %short_hex(&self.statement),
                resumed,
                total,
                "resuming DAG computation"
            );
        } else {
            debug!(statement = %short_hex(&self.statement), total, "starting DAG computation");
        }

        let mut since_checkpoint = 0u64;
        loop {
            if let [.., (left_h, left), (right_h, right)] = stack.as_slice() {
                if left_h == right_h {
                    let height = left_h + 1;
                    let label = node_label(self.hash, &self.statement, store.len(), &[*left, *right]);
                    stack.truncate(stack.len() - 2);
                    stack.push((height, label));
                    store.append(&label)?;
                    since_checkpoint += 1;
                    self.checkpoint(store, signal, &mut since_checkpoint)?;
                    continue;
                }
            }

            if let [(height, phi)] = stack.as_slice() {
                if *height == self.shape.n() {
                    let phi = *phi;
                    store.sync()?;
                    debug_assert_eq!(store.len(), total);
                    info!(
                        statement = %short_hex(&self.statement),
                        phi = %short_hex(&phi),
                        "DAG computation complete"
                    );
                    return Ok(phi);
                }
            }

            let parents: Vec<Label> = stack.iter().map(|(_, label)| *label).collect();
            let label = node_label(self.hash, &self.statement, store.len(), &parents);
            stack.push((0, label));
            store.append(&label)?;
            since_checkpoint += 1;
            self.checkpoint(store, signal, &mut since_checkpoint)?;
        }
    }

    fn checkpoint(
        &self,
        store: &mut LabelStore,
        signal: &ShutdownSignal,
        since_checkpoint: &mut u64,
    ) -> Result<()> {
        if *since_checkpoint < CHECKPOINT_INTERVAL {
            return Ok(());
        }
        *since_checkpoint = 0;
        store.sync()?;
        if signal.is_shutdown_requested() {
            info!(
                statement = %short_hex(&self.statement),
                stored = store.len(),
                "DAG computation interrupted by shutdown"
            );
            return Err(ProverError::ShutdownRequested);
        }
        Ok(())
    }
}
