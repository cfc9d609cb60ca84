use crate::data_structures::{ElectionId, Epoch, Frequency};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BallotKind {
    // Carries the sender's adopted frequency
    Heartbeat,
    // Candidate asks for a vote
    ElectMe,
    // Voter grants the candidate its vote for the epoch
    VoteGranted,
}

/// Protocol payload exchanged between processes.
///
/// Every ballot carries the sender's epoch so that receivers can order
/// information without relying on delivery order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub kind: BallotKind,
    pub epoch: Epoch,
    // Heartbeat: adopted value. ElectMe: proposed value. VoteGranted: unused.
    pub frequency: Option<Frequency>,
    // Epoch at which the sender last adopted a frequency
    pub frequency_epoch: Epoch,
    // Ledger record this ballot belongs to, if any
    pub election: Option<ElectionId>,
}

impl Ballot {
    pub fn heartbeat(epoch: Epoch, frequency: Option<Frequency>, frequency_epoch: Epoch) -> Self {
        Ballot { kind: BallotKind::Heartbeat, epoch, frequency, frequency_epoch, election: None }
    }

    pub fn elect_me(epoch: Epoch, proposed: Frequency, frequency_epoch: Epoch, election: ElectionId) -> Self {
        Ballot {
            kind: BallotKind::ElectMe,
            epoch,
            frequency: Some(proposed),
            frequency_epoch,
            election: Some(election),
        }
    }

    pub fn vote_granted(epoch: Epoch, frequency_epoch: Epoch, election: Option<ElectionId>) -> Self {
        Ballot { kind: BallotKind::VoteGranted, epoch, frequency: None, frequency_epoch, election }
    }

    /// Tags a ballot with the election whose outcome it propagates.
    pub fn for_election(mut self, election: ElectionId) -> Self {
        self.election = Some(election);
        self
    }
}
