use crate::data_structures::{ElectionId, ProcessId};
use thiserror::Error;

/// Validation failures reported by the administrative control surface.
///
/// Protocol-level outcomes (dropped ballots, stale votes, abandoned
/// candidacies) are not errors and never show up here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    #[error("process id {id} is out of range (cluster size {cluster_size})")]
    InvalidProcessId { id: ProcessId, cluster_size: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("partition must place every process on exactly one side (left: {left:?}, right: {right:?})")]
    PartitionCoverageError {
        left: Vec<ProcessId>,
        right: Vec<ProcessId>,
    },

    #[error("election {0} not found")]
    NotFound(ElectionId),

    #[error("process {0} is no longer accepting commands")]
    ProcessUnavailable(ProcessId),
}

pub type SimResult<T> = Result<T, SimulationError>;
