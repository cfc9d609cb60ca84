// Identifiers shared by the election protocol, the network layer and the ledger.

use serde::{Deserialize, Serialize};

/// Index of a simulated process. Ids run from `0` to `cluster_size - 1`.
pub type ProcessId = usize;

/// Logical clock of the protocol. A candidacy contests exactly one epoch.
pub type Epoch = u64;

/// The value the cluster elects. Stands in for "leader parameter".
pub type Frequency = u32;

/// Ledger key of an election attempt, equal to its position in the ledger.
pub type ElectionId = u64;

/// Role of a process in the election protocol.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum ProcessRole {
    Follower,
    Candidate,
}

/// A split of the cluster into two sides that cannot talk to each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub left: Vec<ProcessId>,
    pub right: Vec<ProcessId>,
}

/// Parses a comma separated id list such as `"0, 2"`.
///
/// Empty segments are rejected, so `"0,,1"` and `""` are errors.
pub fn parse_id_list(input: &str) -> Result<Vec<ProcessId>, String> {
    input
        .split(',')
        .map(|part| {
            let trimmed = part.trim();
            trimmed
                .parse::<ProcessId>()
                .map_err(|e| format!("`{}` is not a process id ({})", trimmed, e))
        })
        .collect()
}
