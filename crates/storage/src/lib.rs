//! Persistence for the PoET service.
//!
//! Two kinds of state survive restarts: the per-round [`LabelStore`] holding
//! DAG labels, and round records (phase, statement, members, proof message)
//! behind the [`RoundStore`] trait.

use parking_lot::{Mutex, RwLock};
use poet_types::{Label, RoundId};
use serde::{Deserialize, Serialize};
use sled::{Batch, Db, Tree};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub mod label_store;

pub use label_store::{LabelStore, RECORD_SIZE, TAIL_VERIFY_WINDOW};

/// Current schema of a persisted [`RoundRecord`].
pub const ROUND_SCHEMA_VERSION: u16 = 1;

const NEXT_ROUND_KEY: &[u8] = b"next_round_id";

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("label {index} not found (store holds {len})")]
    NotFound { index: u64, len: u64 },
    #[error("label store {} has been deleted", path.display())]
    StoreMissing { path: PathBuf },
    #[error("label {index} failed its checksum")]
    Corrupted { index: u64 },
    #[error("round {0} not found")]
    RoundNotFound(RoundId),
    #[error("unsupported round record schema {found} (expected {expected})")]
    UnsupportedSchema { found: u16, expected: u16 },
}

/// Lifecycle phase of a round as recorded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// No statement yet; the round may still accept members.
    Open,
    /// Statement fixed, proof not yet persisted.
    Executing,
    /// Proof persisted but not yet acknowledged by the broadcaster.
    Finished,
}

/// Persisted round metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub schema_version: u16,
    pub id: RoundId,
    pub opened_at_ms: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<Label>,
    #[serde(default)]
    pub proof_persisted: bool,
}

impl RoundRecord {
    pub fn new(id: RoundId, opened_at_ms: u64, duration_ms: u64) -> Self {
        Self {
            schema_version: ROUND_SCHEMA_VERSION,
            id,
            opened_at_ms,
            duration_ms,
            statement: None,
            proof_persisted: false,
        }
    }

    pub fn phase(&self) -> RoundPhase {
        match (self.statement, self.proof_persisted) {
            (None, _) => RoundPhase::Open,
            (Some(_), false) => RoundPhase::Executing,
            (Some(_), true) => RoundPhase::Finished,
        }
    }

    /// Wall-clock instant (ms since UNIX epoch) at which the round closes.
    pub fn deadline_ms(&self) -> u64 {
        self.opened_at_ms.saturating_add(self.duration_ms)
    }
}

/// Hash identifying a member within its round.
pub fn member_key(member: &[u8]) -> [u8; 32] {
    *blake3::hash(member).as_bytes()
}

/// Abstract round persistence.
///
/// Every write must be durable when the call returns.
pub trait RoundStore: Send + Sync {
    /// Allocate the next round ID. IDs are never handed out twice.
    fn next_round_id(&self) -> Result<RoundId, StorageError>;
    fn put_round(&self, record: &RoundRecord) -> Result<(), StorageError>;
    fn get_round(&self, id: RoundId) -> Result<Option<RoundRecord>, StorageError>;
    /// All persisted rounds, ascending by ID.
    fn list_rounds(&self) -> Result<Vec<RoundRecord>, StorageError>;
    /// Record a member. Returns `false` when the member was already present.
    fn append_member(&self, id: RoundId, member: &[u8]) -> Result<bool, StorageError>;
    /// Members of a round, ordered by [`member_key`].
    fn members(&self, id: RoundId) -> Result<Vec<Vec<u8>>, StorageError>;
    /// Persist the encoded proof message and mark the round finished.
    fn put_proof(&self, id: RoundId, message: &[u8]) -> Result<(), StorageError>;
    fn get_proof(&self, id: RoundId) -> Result<Option<Vec<u8>>, StorageError>;
    /// Remove the record, members and proof of a round.
    fn remove_round(&self, id: RoundId) -> Result<(), StorageError>;
}

/// Sled-backed implementation
pub struct SledRoundStore {
    db: Db,
    rounds: Tree,
    members: Tree,
    proofs: Tree,
    metadata: Tree,
}

impl SledRoundStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let rounds = db.open_tree("rounds")?;
        let members = db.open_tree("members")?;
        let proofs = db.open_tree("proofs")?;
        let metadata = db.open_tree("metadata")?;
        Ok(Self {
            db,
            rounds,
            members,
            proofs,
            metadata,
        })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_record(bytes: &[u8]) -> Result<RoundRecord, StorageError> {
    let record: RoundRecord = serde_json::from_slice(bytes)?;
    if record.schema_version != ROUND_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchema {
            found: record.schema_version,
            expected: ROUND_SCHEMA_VERSION,
        });
    }
    Ok(record)
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    bytes.try_into().ok().map(u64::from_be_bytes)
}

fn member_tree_key(id: RoundId, member: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(&id.to_be_bytes());
    key.extend_from_slice(&member_key(member));
    key
}

impl RoundStore for SledRoundStore {
    fn next_round_id(&self) -> Result<RoundId, StorageError> {
        let previous = self.metadata.fetch_and_update(NEXT_ROUND_KEY, |old| {
            let next = old.and_then(decode_u64).unwrap_or(0).saturating_add(1);
            Some(next.to_be_bytes().to_vec())
        })?;
        self.flush()?;
        Ok(RoundId(previous.as_deref().and_then(decode_u64).unwrap_or(0)))
    }

    fn put_round(&self, record: &RoundRecord) -> Result<(), StorageError> {
        self.rounds
            .insert(record.id.to_be_bytes(), serde_json::to_vec(record)?)?;
        self.flush()
    }

    fn get_round(&self, id: RoundId) -> Result<Option<RoundRecord>, StorageError> {
        self.rounds
            .get(id.to_be_bytes())?
            .map(|v| decode_record(&v))
            .transpose()
    }

    fn list_rounds(&self) -> Result<Vec<RoundRecord>, StorageError> {
        self.rounds
            .iter()
            .map(|entry| {
                let (_, v) = entry?;
                decode_record(&v)
            })
            .collect()
    }

    fn append_member(&self, id: RoundId, member: &[u8]) -> Result<bool, StorageError> {
        let previous = self.members.insert(member_tree_key(id, member), member)?;
        self.flush()?;
        Ok(previous.is_none())
    }

    fn members(&self, id: RoundId) -> Result<Vec<Vec<u8>>, StorageError> {
        self.members
            .scan_prefix(id.to_be_bytes())
            .map(|entry| {
                let (_, v) = entry?;
                Ok(v.to_vec())
            })
            .collect()
    }

    fn put_proof(&self, id: RoundId, message: &[u8]) -> Result<(), StorageError> {
        let mut record = self.get_round(id)?.ok_or(StorageError::RoundNotFound(id))?;
        self.proofs.insert(id.to_be_bytes(), message)?;
        record.proof_persisted = true;
        self.put_round(&record)
    }

    fn get_proof(&self, id: RoundId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.proofs.get(id.to_be_bytes())?.map(|v| v.to_vec()))
    }

    fn remove_round(&self, id: RoundId) -> Result<(), StorageError> {
        let mut batch = Batch::default();
        for entry in self.members.scan_prefix(id.to_be_bytes()).keys() {
            batch.remove(entry?);
        }
        self.members.apply_batch(batch)?;
        self.proofs.remove(id.to_be_bytes())?;
        self.rounds.remove(id.to_be_bytes())?;
        self.flush()
    }
}

/// In-memory testing backend
#[derive(Default)]
pub struct MemoryRoundStore {
    rounds: RwLock<BTreeMap<RoundId, RoundRecord>>,
    members: RwLock<BTreeMap<RoundId, BTreeMap<[u8; 32], Vec<u8>>>>,
    proofs: RwLock<BTreeMap<RoundId, Vec<u8>>>,
    next_id: Mutex<u64>,
}

impl RoundStore for MemoryRoundStore {
    fn next_round_id(&self) -> Result<RoundId, StorageError> {
        let mut next = self.next_id.lock();
        let id = RoundId(*next);
        *next += 1;
        Ok(id)
    }

    fn put_round(&self, record: &RoundRecord) -> Result<(), StorageError> {
        self.rounds.write().insert(record.id, record.clone());
        Ok(())
    }

    fn get_round(&self, id: RoundId) -> Result<Option<RoundRecord>, StorageError> {
        Ok(self.rounds.read().get(&id).cloned())
    }

    fn list_rounds(&self) -> Result<Vec<RoundRecord>, StorageError> {
        Ok(self.rounds.read().values().cloned().collect())
    }

    fn append_member(&self, id: RoundId, member: &[u8]) -> Result<bool, StorageError> {
        Ok(self
            .members
            .write()
            .entry(id)
            .or_default()
            .insert(member_key(member), member.to_vec())
            .is_none())
    }

    fn members(&self, id: RoundId) -> Result<Vec<Vec<u8>>, StorageError> {
        Ok(self
            .members
            .read()
            .get(&id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default())
    }

    fn put_proof(&self, id: RoundId, message: &[u8]) -> Result<(), StorageError> {
        let mut rounds = self.rounds.write();
        let record = rounds.get_mut(&id).ok_or(StorageError::RoundNotFound(id))?;
        self.proofs.write().insert(id, message.to_vec());
        record.proof_persisted = true;
        Ok(())
    }

    fn get_proof(&self, id: RoundId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.proofs.read().get(&id).cloned())
    }

    fn remove_round(&self, id: RoundId) -> Result<(), StorageError> {
        self.members.write().remove(&id);
        self.proofs.write().remove(&id);
        self.rounds.write().remove(&id);
        Ok(())
    }
}
