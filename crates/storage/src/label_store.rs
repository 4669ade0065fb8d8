//! Append-only label log backing one round's DAG computation.
//!
//! Each record is the 32-byte label followed by an 8-byte checksum bound to
//! the record's position. Appends are buffered; [`LabelStore::sync`] writes
//! and fsyncs them. On open, the tail of the file is re-verified and any
//! torn or corrupted suffix is truncated away, so `len()` of a freshly
//! opened store is always a known-good resume point.

use parking_lot::Mutex;
use poet_types::{Label, LABEL_SIZE};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::StorageError;

const CHECKSUM_SIZE: usize = 8;

/// Bytes occupied by one label record on disk.
pub const RECORD_SIZE: usize = LABEL_SIZE + CHECKSUM_SIZE;

/// Number of trailing records re-verified when a store is opened.
pub const TAIL_VERIFY_WINDOW: u64 = 1024;

const WRITE_BUFFER_RECORDS: usize = 8192;

/// Durable, position-addressed sequence of labels.
pub struct LabelStore {
    path: PathBuf,
    /// `None` once the store has been deleted.
    file: Mutex<Option<File>>,
    pending: Vec<u8>,
    /// Records written to the file.
    persisted: u64,
    /// Records known to have reached the disk.
    synced: u64,
}

impl LabelStore {
    /// Open (or create) the label log at `path`, repairing a damaged tail.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let size = file.metadata()?.len();

        let mut store = Self {
            path,
            file: Mutex::new(Some(file)),
            pending: Vec::new(),
            persisted: size / RECORD_SIZE as u64,
            synced: 0,
        };

        if size % RECORD_SIZE as u64 != 0 {
            warn!(
                path = %store.path.display(),
                size,
                "discarding partially written label record"
            );
            store.truncate_file(store.persisted)?;
        }
        store.verify_tail()?;
        store.synced = store.persisted;

        debug!(path = %store.path.display(), labels = store.persisted, "label store opened");
        Ok(store)
    }

    /// Remove the log at `path` without opening it. Missing files are fine.
    pub fn remove<P: AsRef<Path>>(path: P) -> Result<(), StorageError> {
        match fs::remove_file(path.as_ref()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of labels appended, including ones still buffered. This is the
    /// position the next [`append`](Self::append) writes; see
    /// [`durable_len`](Self::durable_len) for what survives a crash.
    pub fn len(&self) -> u64 {
        self.persisted + (self.pending.len() / RECORD_SIZE) as u64
    }

    /// Number of labels made durable by the last [`sync`](Self::sync) or
    /// found intact when the store was opened.
    pub fn durable_len(&self) -> u64 {
        self.synced
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_deleted(&self) -> bool {
        self.file.lock().is_none()
    }

    /// Append the label for position `len()`.
    pub fn append(&mut self, label: &Label) -> Result<(), StorageError> {
        if self.is_deleted() {
            return Err(self.missing());
        }
        let index = self.len();
        self.pending.extend_from_slice(label);
        self.pending
            .extend_from_slice(&record_checksum(index, label));
        if self.pending.len() >= WRITE_BUFFER_RECORDS * RECORD_SIZE {
            self.write_pending()?;
        }
        Ok(())
    }

    /// Write buffered labels and fsync them.
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.write_pending()?;
        {
            let guard = self.file.lock();
            let file = guard.as_ref().ok_or_else(|| self.missing())?;
            file.sync_data()?;
        }
        self.synced = self.persisted;
        Ok(())
    }

    /// Read the label stored at `index`.
    pub fn read(&self, index: u64) -> Result<Label, StorageError> {
        if self.is_deleted() {
            return Err(self.missing());
        }
        let len = self.len();
        if index >= len {
            return Err(StorageError::NotFound { index, len });
        }

        if index >= self.persisted {
            let offset = (index - self.persisted) as usize * RECORD_SIZE;
            let mut label = [0u8; LABEL_SIZE];
            label.copy_from_slice(&self.pending[offset..offset + LABEL_SIZE]);
            return Ok(label);
        }

        let (label, checksum) = self.read_record(index)?;
        if checksum != record_checksum(index, &label) {
            return Err(StorageError::Corrupted { index });
        }
        Ok(label)
    }

    /// Drop every label at position `len` and beyond.
    pub fn truncate(&mut self, len: u64) -> Result<(), StorageError> {
        if len >= self.len() {
            return Ok(());
        }
        if len >= self.persisted {
            let keep = (len - self.persisted) as usize * RECORD_SIZE;
            self.pending.truncate(keep);
            return Ok(());
        }
        self.pending.clear();
        self.truncate_file(len)
    }

    /// Irreversibly remove all stored labels. Calling it again is a no-op.
    pub fn delete(&mut self) -> Result<(), StorageError> {
        let file = self.file.lock().take();
        self.pending.clear();
        self.persisted = 0;
        self.synced = 0;
        if file.is_some() {
            drop(file);
            debug!(path = %self.path.display(), "label store deleted");
        }
        Self::remove(&self.path)
    }

    fn verify_tail(&mut self) -> Result<(), StorageError> {
        let start = self.persisted.saturating_sub(TAIL_VERIFY_WINDOW);
        for index in start..self.persisted {
            let (label, checksum) = self.read_record(index)?;
            if checksum != record_checksum(index, &label) {
                warn!(
                    path = %self.path.display(),
                    index,
                    stored = self.persisted,
                    "label checksum mismatch, truncating to last valid entry"
                );
                return self.truncate_file(index);
            }
        }
        Ok(())
    }

    fn read_record(&self, index: u64) -> Result<(Label, [u8; CHECKSUM_SIZE]), StorageError> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| self.missing())?;
        let mut record = [0u8; RECORD_SIZE];
        file.seek(SeekFrom::Start(index * RECORD_SIZE as u64))?;
        file.read_exact(&mut record)?;

        let mut label = [0u8; LABEL_SIZE];
        let mut checksum = [0u8; CHECKSUM_SIZE];
        label.copy_from_slice(&record[..LABEL_SIZE]);
        checksum.copy_from_slice(&record[LABEL_SIZE..]);
        Ok((label, checksum))
    }

    fn write_pending(&mut self) -> Result<(), StorageError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| self.missing())?;
        file.seek(SeekFrom::Start(self.persisted * RECORD_SIZE as u64))?;
        file.write_all(&self.pending)?;
        self.persisted += (self.pending.len() / RECORD_SIZE) as u64;
        self.pending.clear();
        Ok(())
    }

    fn truncate_file(&mut self, len: u64) -> Result<(), StorageError> {
        let guard = self.file.lock();
        let file = guard.as_ref().ok_or_else(|| self.missing())?;
        file.set_len(len * RECORD_SIZE as u64)?;
        file.sync_data()?;
        drop(guard);
        self.persisted = len;
        self.synced = self.synced.min(len);
        Ok(())
    }

    fn missing(&self) -> StorageError {
        StorageError::StoreMissing {
            path: self.path.clone(),
        }
    }
}

impl Drop for LabelStore {
    fn drop(&mut self) {
        if let Err(err) = self.write_pending() {
            if !matches!(err, StorageError::StoreMissing { .. }) {
                warn!(path = %self.path.display(), "failed to flush label store: {}", err);
            }
        }
    }
}

fn record_checksum(index: u64, label: &Label) -> [u8; CHECKSUM_SIZE] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&index.to_be_bytes());
    hasher.update(label);
    let mut checksum = [0u8; CHECKSUM_SIZE];
    checksum.copy_from_slice(&hasher.finalize().as_bytes()[..CHECKSUM_SIZE]);
    checksum
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn label(i: u64) -> Label {
        let mut l = [0u8; LABEL_SIZE];
        l[..8].copy_from_slice(&i.to_le_bytes());
        l
    }

    #[test]
    fn appends_are_readable_before_and_after_sync() {
        let dir = tempdir().unwrap();
        let mut store = LabelStore::open(dir.path().join("labels")).unwrap();
        assert!(store.is_empty());

        for i in 0..10 {
            store.append(&label(i)).unwrap();
        }
        assert_eq!(store.len(), 10);
        assert_eq!(store.read(3).unwrap(), label(3));

        store.sync().unwrap();
        store.append(&label(10)).unwrap();
        assert_eq!(store.read(3).unwrap(), label(3));
        assert_eq!(store.read(10).unwrap(), label(10));
    }

    #[test]
    fn durable_length_advances_only_on_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels");
        let mut store = LabelStore::open(&path).unwrap();
        for i in 0..5 {
            store.append(&label(i)).unwrap();
        }
        assert_eq!(store.len(), 5);
        assert_eq!(store.durable_len(), 0);

        store.sync().unwrap();
        assert_eq!(store.durable_len(), 5);
        store.append(&label(5)).unwrap();
        assert_eq!(store.len(), 6);
        assert_eq!(store.durable_len(), 5);

        store.truncate(3).unwrap();
        assert_eq!(store.durable_len(), 3);
        drop(store);

        let reopened = LabelStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.durable_len(), 3);
    }

    #[test]
    fn read_past_end_is_not_found() {
        let dir = tempdir().unwrap();
        let mut store = LabelStore::open(dir.path().join("labels")).unwrap();
        store.append(&label(0)).unwrap();
        assert!(matches!(
            store.read(1),
            Err(StorageError::NotFound { index: 1, len: 1 })
        ));
    }

    #[test]
    fn truncate_spans_buffer_and_file() {
        let dir = tempdir().unwrap();
        let mut store = LabelStore::open(dir.path().join("labels")).unwrap();
        for i in 0..6 {
            store.append(&label(i)).unwrap();
        }
        store.sync().unwrap();
        for i in 6..9 {
            store.append(&label(i)).unwrap();
        }

        store.truncate(7).unwrap();
        assert_eq!(store.len(), 7);
        store.truncate(4).unwrap();
        assert_eq!(store.len(), 4);
        store.append(&label(99)).unwrap();
        assert_eq!(store.read(4).unwrap(), label(99));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels");
        let mut store = LabelStore::open(&path).unwrap();
        store.append(&label(0)).unwrap();
        store.sync().unwrap();

        store.delete().unwrap();
        store.delete().unwrap();
        assert!(store.is_deleted());
        assert!(!path.exists());
        assert!(matches!(store.read(0), Err(StorageError::StoreMissing { .. })));
        assert!(matches!(
            store.append(&label(1)),
            Err(StorageError::StoreMissing { .. })
        ));
        LabelStore::remove(&path).unwrap();
    }
}
