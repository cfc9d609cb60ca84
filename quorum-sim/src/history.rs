// Append-only audit trail of election attempts.
//
// The list lock covers id assignment and append only; each record carries
// its own mutex, so processes updating different records never contend.

use crate::data_structures::{ElectionId, Epoch, Frequency, ProcessId};
use crate::election::state::ProcessStateSnapshot;
use crate::network::NetworkMessage;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

// A poisoned lock means a panic already happened mid-update; the data is
// still the best view we have, so keep serving it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A ballot received in the context of an election, with the receiver's
/// state at the moment it was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedBallot {
    pub message: NetworkMessage,
    pub receiver_state: ProcessStateSnapshot,
    // ElectMe: the receiver granted its vote. VoteGranted: the vote counted.
    pub granted: bool,
}

#[derive(Debug, Default)]
struct RecordLog {
    sent: Vec<NetworkMessage>,
    received: Vec<ReceivedBallot>,
    successful: bool,
    concluded_at: Option<DateTime<Utc>>,
}

/// One election attempt. Immutable identity, lock-protected log.
#[derive(Debug)]
pub struct ElectionRecord {
    pub id: ElectionId,
    pub elector_id: ProcessId,
    pub requested_frequency: Frequency,
    pub epoch: Epoch,
    pub opened_at: DateTime<Utc>,
    log: Mutex<RecordLog>,
}

impl ElectionRecord {
    pub fn record_sent(&self, message: NetworkMessage) {
        lock(&self.log).sent.push(message);
    }

    pub fn record_received(&self, message: NetworkMessage, receiver_state: ProcessStateSnapshot, granted: bool) {
        lock(&self.log).received.push(ReceivedBallot { message, receiver_state, granted });
    }

    /// Concludes the attempt. A won election stays won.
    pub fn mark_outcome(&self, success: bool) {
        let mut log = lock(&self.log);
        if log.successful && !success {
            debug!("[Ledger] Election {} already succeeded, ignoring failure outcome", self.id);
            return;
        }
        log.successful = success;
        log.concluded_at = Some(Utc::now());
    }

    pub fn is_successful(&self) -> bool {
        lock(&self.log).successful
    }

    pub fn snapshot(&self) -> ElectionRecordSnapshot {
        let log = lock(&self.log);
        ElectionRecordSnapshot {
            id: self.id,
            elector_id: self.elector_id,
            requested_frequency: self.requested_frequency,
            epoch: self.epoch,
            opened_at: self.opened_at,
            sent: log.sent.clone(),
            received: log.received.clone(),
            successful: log.successful,
            concluded_at: log.concluded_at,
        }
    }
}

/// Point-in-time copy of a record, for rendering and assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionRecordSnapshot {
    pub id: ElectionId,
    pub elector_id: ProcessId,
    pub requested_frequency: Frequency,
    pub epoch: Epoch,
    pub opened_at: DateTime<Utc>,
    pub sent: Vec<NetworkMessage>,
    pub received: Vec<ReceivedBallot>,
    pub successful: bool,
    pub concluded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct ElectionLedger {
    records: Mutex<Vec<Arc<ElectionRecord>>>,
}

impl ElectionLedger {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a new attempt and returns its handle.
    pub fn open(&self, elector_id: ProcessId, requested_frequency: Frequency, epoch: Epoch) -> Arc<ElectionRecord> {
        let mut records = lock(&self.records);
        let id = records.len() as ElectionId;
        let record = Arc::new(ElectionRecord {
            id,
            elector_id,
            requested_frequency,
            epoch,
            opened_at: Utc::now(),
            log: Mutex::new(RecordLog::default()),
        });
        records.push(Arc::clone(&record));
        assert_eq!(records[id as usize].id, id, "ledger id must equal its index");
        debug!("[Ledger] Opened election {} for process {} (epoch {}, frequency {})",
            id, elector_id, epoch, requested_frequency);
        record
    }

    pub fn get(&self, id: ElectionId) -> Option<Arc<ElectionRecord>> {
        let records = lock(&self.records);
        usize::try_from(id).ok().and_then(|idx| records.get(idx)).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records_by(&self, elector_id: ProcessId) -> Vec<Arc<ElectionRecord>> {
        lock(&self.records)
            .iter()
            .filter(|r| r.elector_id == elector_id)
            .cloned()
            .collect()
    }

    /// Copies every record. The list lock is released before the records
    /// are locked one by one.
    pub fn snapshot_all(&self) -> Vec<ElectionRecordSnapshot> {
        let records: Vec<Arc<ElectionRecord>> = lock(&self.records).clone();
        records.iter().map(|r| r.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::messages::Ballot;
    use crate::network::LinkConditions;
    use std::thread;

    fn elect_me(from: ProcessId, to: ProcessId, election: ElectionId) -> NetworkMessage {
        NetworkMessage {
            sender: from,
            receiver: to,
            ballot: Ballot::elect_me(1, 33, 0, election),
            link: LinkConditions::HEALTHY,
        }
    }

    fn state(id: ProcessId) -> ProcessStateSnapshot {
        ProcessStateSnapshot { id, current_epoch: 1, frequency_epoch: 0, last_vote_epoch: 1 }
    }

    #[test]
    fn ids_are_sequential_and_lookup_works() {
        let ledger = ElectionLedger::new();
        let a = ledger.open(0, 10, 1);
        let b = ledger.open(2, 20, 1);
        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get(1).unwrap().elector_id, 2);
        assert!(ledger.get(2).is_none());
        assert!(ledger.get(u64::MAX).is_none());
        assert_eq!(ledger.records_by(2).len(), 1);
    }

    #[test]
    fn record_keeps_order_and_outcome() {
        let ledger = ElectionLedger::new();
        let record = ledger.open(1, 55, 3);
        record.record_sent(elect_me(1, 0, record.id));
        record.record_sent(elect_me(1, 2, record.id));
        record.record_received(elect_me(1, 0, record.id), state(0), true);
        record.record_received(elect_me(1, 2, record.id), state(2), false);
        assert!(!record.is_successful());
        record.mark_outcome(true);

        let snap = record.snapshot();
        assert_eq!(snap.sent.iter().map(|m| m.receiver).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(snap.received.len(), 2);
        assert!(snap.received[0].granted);
        assert!(!snap.received[1].granted);
        assert_eq!(snap.received[1].receiver_state.id, 2);
        assert!(snap.successful);
        assert!(snap.concluded_at.is_some());
    }

    #[test]
    fn success_is_sticky() {
        let ledger = ElectionLedger::new();
        let record = ledger.open(0, 1, 1);
        record.mark_outcome(true);
        record.mark_outcome(false);
        assert!(record.is_successful());
    }

    #[test]
    fn concurrent_opens_never_collide() {
        let ledger = Arc::new(ElectionLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|elector| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let record = ledger.open(elector, 0, 1);
                        record.record_sent(elect_me(elector, 0, record.id));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let all = ledger.snapshot_all();
        assert_eq!(all.len(), 400);
        for (idx, record) in all.iter().enumerate() {
            assert_eq!(record.id, idx as ElectionId);
            assert_eq!(record.sent.len(), 1);
        }
    }
}
