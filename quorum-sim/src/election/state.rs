// Per-process protocol state and its read-only views.

use crate::data_structures::{ElectionId, Epoch, Frequency, ProcessId, ProcessRole};
use crate::history::ElectionRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A candidacy in flight, owned by the candidate.
#[derive(Debug, Clone)]
pub struct Election {
    pub new_frequency: Frequency,
    pub epoch: Epoch,
    // Includes the self-vote
    pub votes: usize,
    // Quorum denominator (cluster size when the election started)
    pub electors: usize,
    pub record: Arc<ElectionRecord>,
}

impl Election {
    pub fn has_quorum(&self) -> bool {
        self.votes * 2 > self.electors
    }
}

/// Full protocol state of one process.
#[derive(Debug)]
pub struct ProcessState {
    pub id: ProcessId,
    pub current_epoch: Epoch,
    pub last_vote_epoch: Epoch,
    // None until a first election outcome is learned
    pub frequency: Option<Frequency>,
    pub frequency_epoch: Epoch,
    pub election: Option<Election>,
    pub next_election_deadline: Instant,
    pub election_forced: bool,
}

impl ProcessState {
    pub fn new(id: ProcessId, first_deadline: Instant) -> Self {
        ProcessState {
            id,
            current_epoch: 0,
            last_vote_epoch: 0,
            frequency: None,
            frequency_epoch: 0,
            election: None,
            next_election_deadline: first_deadline,
            election_forced: false,
        }
    }

    pub fn role(&self) -> ProcessRole {
        if self.election.is_some() {
            ProcessRole::Candidate
        } else {
            ProcessRole::Follower
        }
    }

    /// The fields the ledger stores next to every received ballot.
    pub fn state_snapshot(&self) -> ProcessStateSnapshot {
        ProcessStateSnapshot {
            id: self.id,
            current_epoch: self.current_epoch,
            frequency_epoch: self.frequency_epoch,
            last_vote_epoch: self.last_vote_epoch,
        }
    }

    pub fn snapshot(&self, now: Instant) -> ProcessSnapshot {
        ProcessSnapshot {
            id: self.id,
            role: self.role(),
            current_epoch: self.current_epoch,
            last_vote_epoch: self.last_vote_epoch,
            frequency: self.frequency,
            frequency_epoch: self.frequency_epoch,
            election: self.election.as_ref().map(|e| CandidacySnapshot {
                election_id: e.record.id,
                new_frequency: e.new_frequency,
                epoch: e.epoch,
                votes: e.votes,
                electors: e.electors,
            }),
            election_forced: self.election_forced,
            next_election_in: self.next_election_deadline.saturating_duration_since(now),
        }
    }
}

/// Receiver state captured in the ledger alongside a received ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStateSnapshot {
    pub id: ProcessId,
    pub current_epoch: Epoch,
    pub frequency_epoch: Epoch,
    pub last_vote_epoch: Epoch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidacySnapshot {
    pub election_id: ElectionId,
    pub new_frequency: Frequency,
    pub epoch: Epoch,
    pub votes: usize,
    pub electors: usize,
}

/// Everything a renderer shows about a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub id: ProcessId,
    pub role: ProcessRole,
    pub current_epoch: Epoch,
    pub last_vote_epoch: Epoch,
    pub frequency: Option<Frequency>,
    pub frequency_epoch: Epoch,
    pub election: Option<CandidacySnapshot>,
    pub election_forced: bool,
    #[serde(with = "humantime_serde")]
    pub next_election_in: Duration,
}
