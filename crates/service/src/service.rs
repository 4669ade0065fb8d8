//! Round manager: batches submissions into rounds, drives one prover per
//! closed round, persists every transition and recovers after a restart.

use parking_lot::Mutex;
use poet_crypto::MerkleTree;
use poet_prover::{Params, Prover, ProverError, ShutdownSignal};
use poet_storage::{LabelStore, RoundPhase, RoundRecord, RoundStore};
use poet_types::{short_hex, Label, PoetProofMessage, Proof, RoundId};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::broadcaster::Broadcaster;
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::events::ServiceEvent;
use crate::metrics;
use crate::round::{now_ms, OpenRound};

const EVENT_CAPACITY: usize = 256;

/// Delay before closing a round again after its successor could not be created.
const CLOSE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Snapshot returned by [`RoundManager::info`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    pub open_round_id: Option<RoundId>,
    pub executing_round_ids: Vec<RoundId>,
}

/// Owns the open round and the set of executing rounds.
///
/// Cloning yields another handle to the same service.
#[derive(Clone)]
pub struct RoundManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServiceConfig,
    params: Params,
    store: Arc<dyn RoundStore>,
    broadcaster: Arc<dyn Broadcaster>,
    signal: ShutdownSignal,
    registry: Mutex<Registry>,
    events: broadcast::Sender<ServiceEvent>,
    started: AtomicBool,
}

#[derive(Default)]
struct Registry {
    open: Option<Arc<OpenRound>>,
    executing: BTreeSet<RoundId>,
}

impl RoundManager {
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn RoundStore>,
        broadcaster: Arc<dyn Broadcaster>,
        signal: ShutdownSignal,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let params = config.params();
        params.shape()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                params,
                store,
                broadcaster,
                signal,
                registry: Mutex::new(Registry::default()),
                events,
                started: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn signal(&self) -> &ShutdownSignal {
        &self.inner.signal
    }

    /// Receive lifecycle events, including failures of background executions.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.inner.events.subscribe()
    }

    /// Recover persisted rounds and open the live round.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), ServiceError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ServiceError::AlreadyStarted);
        }
        metrics::describe();
        self.inner.recover()
    }

    /// Add `challenge` to the open round and return that round's ID.
    ///
    /// The member is durable when this returns. Submitting the same bytes
    /// twice to one round is accepted and stored once.
    pub fn submit(&self, challenge: &[u8]) -> Result<RoundId, ServiceError> {
        let inner = &self.inner;
        if !inner.started.load(Ordering::Acquire) {
            return Err(ServiceError::NotStarted);
        }
        if inner.signal.is_shutdown_requested() {
            return Err(ServiceError::ShutdownRequested);
        }

        let round = inner.registry.lock().open.clone();
        let round = round.ok_or(ServiceError::AlreadyClosed { open_round: None })?;
        let id = round.id();

        match round.admit(|| inner.store.append_member(id, challenge)) {
            Some(appended) => {
                if appended? {
                    metrics::increment(metrics::CHALLENGES_SUBMITTED);
                } else {
                    debug!(round = %id, "duplicate challenge ignored");
                }
                Ok(id)
            }
            None => Err(ServiceError::AlreadyClosed {
                open_round: inner.open_round_id(),
            }),
        }
    }

    pub fn info(&self) -> ServiceInfo {
        let registry = self.inner.registry.lock();
        ServiceInfo {
            open_round_id: registry.open.as_ref().map(|round| round.id()),
            executing_round_ids: registry.executing.iter().copied().collect(),
        }
    }

    /// Trip the shutdown signal: timers stop, executions checkpoint and stop.
    pub fn shutdown(&self) {
        info!("round manager shutting down");
        self.inner.signal.request_shutdown();
    }
}

impl Inner {
    fn open_round_id(&self) -> Option<RoundId> {
        self.registry.lock().open.as_ref().map(|round| round.id())
    }

    fn emit(&self, event: ServiceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn recover(self: &Arc<Self>) -> Result<(), ServiceError> {
        let mut open = Vec::new();
        for record in self.store.list_rounds()? {
            let id = record.id;
            let phase = record.phase();
            let Some(statement) = record.statement else {
                open.push(record);
                continue;
            };

            if phase == RoundPhase::Finished {
                if let Some(message) = self.store.get_proof(id)? {
                    info!(round = %id, "re-broadcasting unacknowledged proof");
                    self.spawn_broadcast(id, message);
                    continue;
                }
                warn!(round = %id, "finished round has no stored proof, executing again");
            } else {
                info!(round = %id, statement = %short_hex(&statement), "resuming round execution");
            }
            self.register_executing(id);
            self.spawn_execution(id, statement);
        }

        let live = open.pop();
        for stale in open {
            info!(round = %stale.id, "closing stale open round");
            self.register_executing(stale.id);
            let inner = Arc::clone(self);
            let round = Arc::new(OpenRound::new(stale));
            tokio::spawn(async move { inner.close_round(round, false).await });
        }

        let live = match live {
            Some(record) => {
                info!(round = %record.id, "restoring open round");
                Arc::new(OpenRound::new(record))
            }
            None => self.create_round()?,
        };
        self.registry.lock().open = Some(Arc::clone(&live));
        self.announce(live);
        Ok(())
    }

    fn create_round(&self) -> Result<Arc<OpenRound>, ServiceError> {
        let id = self.store.next_round_id()?;
        let record = RoundRecord::new(id, now_ms(), self.config.round_duration_ms());
        self.store.put_round(&record)?;
        metrics::increment(metrics::ROUNDS_OPENED);
        Ok(Arc::new(OpenRound::new(record)))
    }

    fn announce(self: &Arc<Self>, round: Arc<OpenRound>) {
        let deadline_ms = round.record().deadline_ms();
        info!(round = %round.id(), deadline_ms, "round opened");
        self.emit(ServiceEvent::RoundOpened {
            round: round.id(),
            deadline_ms,
        });
        let wait = round.remaining(now_ms());
        self.schedule_close(round, wait);
    }

    fn schedule_close(self: &Arc<Self>, round: Arc<OpenRound>, wait: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(wait) => inner.close_round(round, true).await,
                _ = inner.signal.requested() => {
                    debug!(round = %round.id(), "round timer cancelled by shutdown");
                }
            }
        });
    }

    /// Run blocking store work off the async workers.
    async fn blocking<T, F>(self: &Arc<Self>, work: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, ServiceError> + Send + 'static,
    {
        let inner = Arc::clone(self);
        tokio::task::spawn_blocking(move || work(&*inner))
            .await
            .map_err(|err| ServiceError::Task(err.to_string()))?
    }

    /// Open -> Executing. With `open_next`, the replacement round is swapped
    /// in under the same lock that registers this one as executing.
    ///
    /// If the replacement cannot be persisted the round stays open, the
    /// failure is published and the close is retried after
    /// [`CLOSE_RETRY_DELAY`].
    async fn close_round(self: &Arc<Self>, round: Arc<OpenRound>, open_next: bool) {
        let id = round.id();
        let next = if open_next && !self.signal.is_shutdown_requested() {
            match self.blocking(|inner| inner.create_round()).await {
                Ok(next) => Some(next),
                Err(err) => {
                    error!(round = %id, "failed to open the next round, keeping this one open: {}", err);
                    self.emit(ServiceEvent::RoundFailed {
                        round: id,
                        error: Arc::new(err),
                    });
                    self.schedule_close(round, CLOSE_RETRY_DELAY);
                    return;
                }
            }
        } else {
            None
        };

        {
            let mut registry = self.registry.lock();
            if registry.open.as_ref().map(|open| open.id()) == Some(id) {
                registry.open = next.clone();
            }
            registry.executing.insert(id);
            metrics::set_executing(registry.executing.len());
        }
        round.seal();
        if let Some(next) = next {
            self.announce(next);
        }

        let sealed = Arc::clone(&round);
        match self
            .blocking(move |inner| inner.commit_statement(&sealed))
            .await
        {
            Ok(Some(statement)) => self.spawn_execution(id, statement),
            Ok(None) => {
                info!(round = %id, "round closed without members, discarding");
                self.finish_execution(id);
            }
            Err(err) => {
                self.finish_execution(id);
                self.report_failure(id, err);
            }
        }
    }

    /// Fix the statement over the sealed member set and persist it.
    fn commit_statement(&self, round: &OpenRound) -> Result<Option<Label>, ServiceError> {
        let id = round.id();
        let members = self.store.members(id)?;
        if members.is_empty() {
            self.store.remove_round(id)?;
            return Ok(None);
        }

        let statement = MerkleTree::root_of(self.params.hash, &members)?;
        let mut record = round.record().clone();
        record.statement = Some(statement);
        self.store.put_round(&record)?;
        info!(
            round = %id,
            members = members.len(),
            statement = %short_hex(&statement),
            "round closed"
        );
        Ok(Some(statement))
    }

    fn register_executing(&self, id: RoundId) {
        let mut registry = self.registry.lock();
        registry.executing.insert(id);
        metrics::set_executing(registry.executing.len());
    }

    fn finish_execution(&self, id: RoundId) {
        let mut registry = self.registry.lock();
        registry.executing.remove(&id);
        metrics::set_executing(registry.executing.len());
    }

    fn spawn_execution(self: &Arc<Self>, id: RoundId, statement: Label) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = inner.execute(id, statement).await;
            inner.finish_execution(id);
            match outcome {
                Ok(message) => inner.broadcast(id, message).await,
                Err(err) => inner.report_failure(id, err),
            }
        });
    }

    /// Executing -> Finished: compute (or resume) the DAG, extract the
    /// non-interactive proof and persist the encoded message.
    async fn execute(&self, id: RoundId, statement: Label) -> Result<Vec<u8>, ServiceError> {
        self.emit(ServiceEvent::ExecutionStarted {
            round: id,
            statement,
        });

        let path = self.config.label_path(id);
        let params = self.params;
        let signal = self.signal.clone();
        let proof = tokio::task::spawn_blocking(move || -> Result<Proof, ProverError> {
            let mut prover = Prover::open(statement, params, &path)?;
            prover.compute(&signal)?;
            let (_, proof) = prover.nip()?;
            Ok(proof)
        })
        .await
        .map_err(|err| ServiceError::Task(err.to_string()))??;

        let phi = proof.phi;
        let members = self.store.members(id)?;
        let message = PoetProofMessage::new(id, statement, members, proof).to_bytes()?;
        self.store.put_proof(id, &message)?;
        // The persisted message is all that rebroadcasting needs.
        LabelStore::remove(self.config.label_path(id))?;

        info!(round = %id, phi = %short_hex(&phi), bytes = message.len(), "round execution finished");
        self.emit(ServiceEvent::ExecutionEnded { round: id, phi });
        Ok(message)
    }

    fn spawn_broadcast(self: &Arc<Self>, id: RoundId, message: Vec<u8>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.broadcast(id, message).await });
    }

    async fn broadcast(&self, id: RoundId, message: Vec<u8>) {
        if let Err(err) = self.broadcaster.broadcast(&message).await {
            metrics::increment(metrics::BROADCAST_FAILURES);
            warn!(round = %id, "proof broadcast failed, will retry on restart: {}", err);
            self.report_failure(id, err.into());
            return;
        }

        // Normally gone already; a crash right after persisting the proof
        // leaves it behind.
        if let Err(err) = LabelStore::remove(self.config.label_path(id)) {
            warn!(round = %id, "failed to remove label store: {}", err);
        }
        if let Err(err) = self.store.remove_round(id) {
            self.report_failure(id, err.into());
            return;
        }
        metrics::increment(metrics::PROOFS_BROADCAST);
        info!(round = %id, "proof broadcast");
        self.emit(ServiceEvent::ProofBroadcast { round: id });
    }

    fn report_failure(&self, id: RoundId, err: ServiceError) {
        match err {
            ServiceError::ShutdownRequested => {
                info!(round = %id, "round execution stopped by shutdown")
            }
            ServiceError::Broadcast(_) => {}
            ref other => error!(round = %id, "round failed: {}", other),
        }
        self.emit(ServiceEvent::RoundFailed {
            round: id,
            error: Arc::new(err),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::NoopBroadcaster;
    use poet_storage::MemoryRoundStore;
    use std::time::Duration;

    fn manager(dir: &tempfile::TempDir) -> RoundManager {
        let config = ServiceConfig {
            n: 3,
            round_duration: Duration::from_secs(60),
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        RoundManager::new(
            config,
            Arc::new(MemoryRoundStore::default()),
            Arc::new(NoopBroadcaster),
            ShutdownSignal::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn late_submission_reports_already_closed_then_retry_succeeds() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.start().unwrap();
        let first = manager.submit(b"on time").unwrap();

        // Seal without swapping: the instant between sealing and the swap.
        let round = manager.inner.registry.lock().open.clone().unwrap();
        round.seal();
        match manager.submit(b"late") {
            Err(ServiceError::AlreadyClosed { open_round }) => {
                assert_eq!(open_round, Some(first))
            }
            other => panic!("expected AlreadyClosed, got {other:?}"),
        }

        manager.inner.close_round(round, true).await;
        let info = manager.info();
        let second = info.open_round_id.unwrap();
        assert!(second > first);
        assert_ne!(info.open_round_id, Some(first));
        assert_eq!(manager.submit(b"late").unwrap(), second);
        manager.shutdown();
    }

    #[tokio::test]
    async fn empty_round_is_discarded() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.start().unwrap();

        let round = manager.inner.registry.lock().open.clone().unwrap();
        let id = round.id();
        manager.inner.close_round(round, true).await;

        let info = manager.info();
        assert!(!info.executing_round_ids.contains(&id));
        assert_ne!(info.open_round_id, Some(id));
        assert!(manager.inner.store.get_round(id).unwrap().is_none());
        manager.shutdown();
    }
}
