use parking_lot::RwLock;
use poet_storage::RoundRecord;
use poet_types::RoundId;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The round currently accepting submissions.
///
/// Submissions run under the read side of `accepting`; closing takes the
/// write side, so once [`OpenRound::seal`] returns no submission is still in
/// flight and every acknowledged member is in the store.
#[derive(Debug)]
pub(crate) struct OpenRound {
    record: RoundRecord,
    accepting: RwLock<bool>,
}

impl OpenRound {
    pub(crate) fn new(record: RoundRecord) -> Self {
        Self {
            record,
            accepting: RwLock::new(true),
        }
    }

    pub(crate) fn id(&self) -> RoundId {
        self.record.id
    }

    pub(crate) fn record(&self) -> &RoundRecord {
        &self.record
    }

    /// Time left until the close deadline; zero once it has passed.
    pub(crate) fn remaining(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.record.deadline_ms().saturating_sub(now_ms))
    }

    /// Run `admit` while the round is still accepting. `None` once sealed.
    pub(crate) fn admit<T>(&self, admit: impl FnOnce() -> T) -> Option<T> {
        let accepting = self.accepting.read();
        if !*accepting {
            return None;
        }
        Some(admit())
    }

    pub(crate) fn seal(&self) {
        *self.accepting.write() = false;
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
